//! Optional Content Group registry.
//!
//! Reads and edits the catalog's `/OCProperties`: the `OCGs` set, and the
//! default configuration `D` with its `ON`, `OFF` and `Order` arrays. Any of
//! those may be stored inline or as indirect objects; edits are written back
//! to wherever the value lives so untouched objects stay untouched.

use std::collections::BTreeSet;

use log::{debug, warn};
use lopdf::{Dictionary, Object, ObjectId, dictionary};
use serde::Serialize;

use crate::document::{Document, decode_text, encode_text};
use crate::error::{Error, Result};
use crate::params::{MatchMode, OcgSpec};

/// Written as `/Usage /CreatorInfo /Creator` on groups this crate creates.
pub const CREATOR: &str = "ocg-compose";

/// One registered optional content group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcgInfo {
    pub id: ObjectId,
    pub name: String,
    pub intents: Vec<String>,
    /// `/Usage /CreatorInfo /Subtype`, if present.
    pub usage: Option<String>,
    /// Visibility under the default configuration.
    pub visible: bool,
}

/// List registered groups in `OCGs` order.
///
/// Entries that are not references to dictionaries are skipped; a missing or
/// malformed `/OCProperties` yields an empty list.
pub fn list(doc: &Document) -> Vec<OcgInfo> {
    let Some(props) = oc_properties(doc) else {
        return Vec::new();
    };
    let config = props
        .get(b"D")
        .ok()
        .and_then(|d| doc.resolve(d).ok())
        .and_then(|d| d.as_dict().ok());

    let base_on = config
        .and_then(|d| d.get(b"BaseState").ok())
        .and_then(|s| s.as_name().ok())
        .is_none_or(|state| state != b"OFF");
    let on = id_set(doc, config, b"ON");
    let off = id_set(doc, config, b"OFF");

    let mut layers = Vec::new();
    for id in registered_ids(doc, props) {
        let dict = match doc.get_dict(id) {
            Ok(dict) => dict,
            Err(e) => {
                warn!("skipping OCG entry {} {} R: {}", id.0, id.1, e);
                continue;
            }
        };
        let name = dict
            .get(b"Name")
            .ok()
            .and_then(|n| doc.resolve(n).ok())
            .and_then(|n| n.as_str().ok())
            .map(decode_text)
            .unwrap_or_default();
        let visible = if base_on {
            !off.contains(&id)
        } else {
            on.contains(&id)
        };
        layers.push(OcgInfo {
            id,
            name,
            intents: intents(doc, dict),
            usage: usage_subtype(doc, dict),
            visible,
        });
    }
    layers
}

/// Resolve a layer name to a registered group.
pub fn find_by_name(doc: &Document, query: &str, mode: MatchMode) -> Option<ObjectId> {
    match_name(&list(doc), query, mode).map(|layer| layer.id)
}

/// Name matching over an already listed registry.
///
/// Case-insensitive exact match wins. Under [`MatchMode::Lenient`], the
/// fallback is the first group (in `OCGs` order) whose name contains the
/// query or is contained in it. Several substring hits are ambiguous; the
/// first one is returned regardless.
pub fn match_name<'a>(layers: &'a [OcgInfo], query: &str, mode: MatchMode) -> Option<&'a OcgInfo> {
    let query = query.to_lowercase();
    if let Some(hit) = layers.iter().find(|l| l.name.to_lowercase() == query) {
        return Some(hit);
    }
    if mode == MatchMode::Exact || query.is_empty() {
        return None;
    }
    layers.iter().find(|l| {
        let name = l.name.to_lowercase();
        !name.is_empty() && (name.contains(&query) || query.contains(&name))
    })
}

/// Create a new group and register it in the catalog.
///
/// The group is appended to `OCGs` and `D.Order`, and to `D.ON` when
/// default-visible (`D.OFF` otherwise).
pub fn create(doc: &mut Document, spec: &OcgSpec) -> Result<ObjectId> {
    let mut dict = dictionary! {
        "Type" => "OCG",
        "Name" => encode_text(&spec.name),
    };
    if let Some(intent) = &spec.intent {
        dict.set("Intent", Object::Name(intent.as_bytes().to_vec()));
    }
    if let Some(usage) = &spec.usage {
        dict.set(
            "Usage",
            dictionary! {
                "CreatorInfo" => dictionary! {
                    "Creator" => Object::string_literal(CREATOR),
                    "Subtype" => Object::Name(usage.as_bytes().to_vec()),
                },
            },
        );
    }

    // Validate the catalog side before allocating anything.
    let edit = ConfigEdit::load(doc)?;
    let id = doc.add(dict);
    edit.register(doc, id, Some(spec.default_visible))?;
    debug!("created OCG '{}' as {} {} R", spec.name, id.0, id.1);
    Ok(id)
}

/// Make sure `id` is an OCG dictionary listed in `OCGs`.
///
/// Content may only reference groups the catalog knows about; an OCG object
/// that exists but is missing from the set is added to it.
pub fn ensure_registered(doc: &mut Document, id: ObjectId) -> Result<()> {
    let is_ocg = doc
        .get_dict(id)
        .ok()
        .and_then(|d| d.get(b"Type").ok())
        .and_then(|t| t.as_name().ok())
        == Some(b"OCG".as_slice());
    if !is_ocg {
        return Err(Error::Insertion(format!(
            "object {} {} R is not an optional content group",
            id.0, id.1
        )));
    }
    let edit = ConfigEdit::load(doc)?;
    if holds(&edit.ocgs, id) {
        return Ok(());
    }
    warn!("OCG {} {} R was not registered in OCGs; adding it", id.0, id.1);
    edit.register(doc, id, None)
}

/// Find a group by name, creating it from `spec` when nothing matches.
///
/// Returns the identity and whether it was created.
pub fn find_or_create(doc: &mut Document, spec: &OcgSpec, mode: MatchMode) -> Result<(ObjectId, bool)> {
    match find_by_name(doc, &spec.name, mode) {
        Some(id) => Ok((id, false)),
        None => create(doc, spec).map(|id| (id, true)),
    }
}

fn oc_properties(doc: &Document) -> Option<&Dictionary> {
    let props = doc.catalog().ok()?.get(b"OCProperties").ok()?;
    doc.resolve(props).ok()?.as_dict().ok()
}

fn registered_ids(doc: &Document, props: &Dictionary) -> Vec<ObjectId> {
    let items = props
        .get(b"OCGs")
        .ok()
        .and_then(|o| doc.resolve(o).ok())
        .and_then(|o| o.as_array().ok());
    let mut seen = BTreeSet::new();
    let mut ids = Vec::new();
    for item in items.into_iter().flatten() {
        match item {
            Object::Reference(id) if seen.insert(*id) => ids.push(*id),
            Object::Reference(_) => {}
            other => debug!("ignoring non-reference OCGs entry {:?}", other),
        }
    }
    ids
}

fn id_set(doc: &Document, config: Option<&Dictionary>, key: &[u8]) -> BTreeSet<ObjectId> {
    config
        .and_then(|d| d.get(key).ok())
        .and_then(|o| doc.resolve(o).ok())
        .and_then(|o| o.as_array().ok())
        .map(|items| items.iter().filter_map(|o| o.as_reference().ok()).collect())
        .unwrap_or_default()
}

fn intents(doc: &Document, dict: &Dictionary) -> Vec<String> {
    let Some(intent) = dict.get(b"Intent").ok().and_then(|i| doc.resolve(i).ok()) else {
        return Vec::new();
    };
    match intent {
        Object::Name(name) => vec![String::from_utf8_lossy(name).into_owned()],
        Object::Array(items) => items
            .iter()
            .filter_map(|i| i.as_name().ok())
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .collect(),
        _ => Vec::new(),
    }
}

fn usage_subtype(doc: &Document, dict: &Dictionary) -> Option<String> {
    let usage = doc.resolve(dict.get(b"Usage").ok()?).ok()?.as_dict().ok()?;
    let info = doc.resolve(usage.get(b"CreatorInfo").ok()?).ok()?.as_dict().ok()?;
    let subtype = info.get(b"Subtype").ok()?.as_name().ok()?;
    Some(String::from_utf8_lossy(subtype).into_owned())
}

/// Where a value read out of the catalog lives.
#[derive(Debug, Clone, Copy)]
enum Home {
    Inline,
    Indirect(ObjectId),
}

/// Owned working copy of `/OCProperties`, written back by [`ConfigEdit::register`].
struct ConfigEdit {
    catalog_id: ObjectId,
    props_home: Home,
    props: Dictionary,
    ocgs_home: Home,
    ocgs: Vec<Object>,
    config_home: Home,
    config: Dictionary,
}

impl ConfigEdit {
    fn load(doc: &Document) -> Result<Self> {
        let catalog_id = doc.catalog_id()?;
        let catalog = doc.get_dict(catalog_id)?;
        let (props_home, props) = dict_field(doc, catalog, b"OCProperties")?;
        let (ocgs_home, ocgs) = array_field(doc, &props, b"OCGs")?;
        let (config_home, config) = dict_field(doc, &props, b"D")?;
        Ok(Self {
            catalog_id,
            props_home,
            props,
            ocgs_home,
            ocgs,
            config_home,
            config,
        })
    }

    fn register(mut self, doc: &mut Document, id: ObjectId, visible: Option<bool>) -> Result<()> {
        push_unique(&mut self.ocgs, id);

        if let Some(visible) = visible {
            let (keep, other): (&[u8], &[u8]) = if visible { (b"ON", b"OFF") } else { (b"OFF", b"ON") };
            let (other_home, mut others) = array_field(doc, &self.config, other)?;
            if holds(&others, id) {
                others.retain(|o| o.as_reference().ok() != Some(id));
                store(doc, &mut self.config, other, other_home, Object::Array(others));
            }
            let (keep_home, mut kept) = array_field(doc, &self.config, keep)?;
            push_unique(&mut kept, id);
            store(doc, &mut self.config, keep, keep_home, Object::Array(kept));
        }

        let (order_home, mut order) = array_field(doc, &self.config, b"Order")?;
        push_unique(&mut order, id);
        store(doc, &mut self.config, b"Order", order_home, Object::Array(order));

        store(doc, &mut self.props, b"OCGs", self.ocgs_home, Object::Array(self.ocgs));
        store(doc, &mut self.props, b"D", self.config_home, Object::Dictionary(self.config));
        match self.props_home {
            Home::Indirect(props_id) => doc.set(props_id, self.props),
            Home::Inline => {
                let catalog = doc.get_mut(self.catalog_id)?.as_dict_mut()?;
                catalog.set("OCProperties", self.props);
            }
        }
        Ok(())
    }
}

fn holds(items: &[Object], id: ObjectId) -> bool {
    items.iter().any(|o| o.as_reference().ok() == Some(id))
}

fn push_unique(items: &mut Vec<Object>, id: ObjectId) {
    if !holds(items, id) {
        items.push(Object::Reference(id));
    }
}

fn store(doc: &mut Document, parent: &mut Dictionary, key: &[u8], home: Home, value: Object) {
    match home {
        Home::Indirect(id) => doc.set(id, value),
        Home::Inline => parent.set(key.to_vec(), value),
    }
}

fn dict_field(doc: &Document, parent: &Dictionary, key: &[u8]) -> Result<(Home, Dictionary)> {
    match parent.get(key) {
        Err(_) => Ok((Home::Inline, Dictionary::new())),
        Ok(Object::Dictionary(dict)) => Ok((Home::Inline, dict.clone())),
        Ok(Object::Reference(id)) => match doc.get(*id)? {
            Object::Dictionary(dict) => Ok((Home::Indirect(*id), dict.clone())),
            _ => Err(malformed_entry(key, "dictionary")),
        },
        Ok(_) => Err(malformed_entry(key, "dictionary")),
    }
}

fn array_field(doc: &Document, parent: &Dictionary, key: &[u8]) -> Result<(Home, Vec<Object>)> {
    match parent.get(key) {
        Err(_) => Ok((Home::Inline, Vec::new())),
        Ok(Object::Array(items)) => Ok((Home::Inline, items.clone())),
        Ok(Object::Reference(id)) => match doc.get(*id)? {
            Object::Array(items) => Ok((Home::Indirect(*id), items.clone())),
            _ => Err(malformed_entry(key, "array")),
        },
        Ok(_) => Err(malformed_entry(key, "array")),
    }
}

fn malformed_entry(key: &[u8], expected: &str) -> Error {
    Error::Insertion(format!(
        "/{} in optional content properties is not an {}",
        String::from_utf8_lossy(key),
        expected
    ))
}
