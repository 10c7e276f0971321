//! In-memory object graph of a parsed PDF.
//!
//! [`Document`] wraps a `lopdf::Document` and adds what an editing pipeline
//! needs on top of it: the original bytes and `startxref` location (for
//! incremental updates), a record of every object touched since parsing, and
//! a mark phase over the reference graph.

use std::collections::BTreeSet;

use log::debug;
use lopdf::{Dictionary, Object, ObjectId, StringFormat};

use crate::error::{Error, Result};

const DEREF_LIMIT: usize = 32;

/// Storage form of the cross-reference section `startxref` points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefKind {
    /// Classic `xref` table followed by a `trailer` dictionary.
    Table,
    /// `/Type /XRef` cross-reference stream.
    Stream,
}

/// Location and kind of the most recent cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XrefInfo {
    pub start: usize,
    pub kind: XrefKind,
}

/// A parsed PDF document that can be edited in place.
#[derive(Debug, Clone)]
pub struct Document {
    inner: lopdf::Document,
    source: Vec<u8>,
    xref: Option<XrefInfo>,
    source_max_id: u32,
    dirty: BTreeSet<ObjectId>,
}

impl Document {
    /// Parse template bytes into an object graph.
    ///
    /// Fails with [`Error::MalformedDocument`] when lopdf cannot load the file
    /// or when the trailer does not lead to a catalog dictionary.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut inner = lopdf::Document::load_mem(bytes)?;

        if inner.trailer.has(b"Encrypt") {
            return Err(Error::MalformedDocument(
                "encrypted documents are not supported".to_string(),
            ));
        }

        let root = inner
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|_| Error::MalformedDocument("trailer has no /Root reference".to_string()))?;
        if inner.get_dictionary(root).is_err() {
            return Err(Error::MalformedDocument(format!(
                "root catalog {} {} R is missing or not a dictionary",
                root.0, root.1
            )));
        }

        // Never hand out numbers the previous xref already accounted for.
        if let Ok(size) = inner.trailer.get(b"Size").and_then(Object::as_i64) {
            if size > 0 {
                inner.max_id = inner.max_id.max((size - 1) as u32);
            }
        }

        let xref = locate_xref(bytes);
        debug!(
            "parsed {} objects, max id {}, xref {:?}",
            inner.objects.len(),
            inner.max_id,
            xref
        );

        Ok(Self {
            source_max_id: inner.max_id,
            inner,
            source: bytes.to_vec(),
            xref,
            dirty: BTreeSet::new(),
        })
    }

    /// The underlying lopdf document (read-only).
    pub fn inner(&self) -> &lopdf::Document {
        &self.inner
    }

    /// The bytes this document was parsed from.
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    pub fn xref_info(&self) -> Option<XrefInfo> {
        self.xref
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.inner.trailer
    }

    pub fn max_id(&self) -> u32 {
        self.inner.max_id
    }

    /// Highest object number accounted for by the source file.
    pub fn source_max_id(&self) -> u32 {
        self.source_max_id
    }

    /// Identities mutated or created since parsing.
    pub fn dirty(&self) -> &BTreeSet<ObjectId> {
        &self.dirty
    }

    pub fn catalog_id(&self) -> Result<ObjectId> {
        self.inner
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|_| Error::MalformedDocument("trailer has no /Root reference".to_string()))
    }

    pub fn catalog(&self) -> Result<&Dictionary> {
        let id = self.catalog_id()?;
        self.get_dict(id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.inner.objects.contains_key(&id)
    }

    /// Look up an object by identity, following reference chains.
    pub fn get(&self, id: ObjectId) -> Result<&Object> {
        let object = self.inner.objects.get(&id).ok_or_else(|| missing(id))?;
        self.resolve(object)
    }

    pub fn get_dict(&self, id: ObjectId) -> Result<&Dictionary> {
        self.get(id)?.as_dict().map_err(|_| {
            Error::MalformedDocument(format!("object {} {} R is not a dictionary", id.0, id.1))
        })
    }

    /// Mutable access to a stored object. The identity is recorded as dirty.
    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut Object> {
        let object = self.inner.objects.get_mut(&id).ok_or_else(|| missing(id))?;
        self.dirty.insert(id);
        Ok(object)
    }

    /// Follow `object` through indirect references to a direct value.
    pub fn resolve<'a>(&'a self, mut object: &'a Object) -> Result<&'a Object> {
        let mut hops = 0;
        while let Object::Reference(id) = object {
            object = self.inner.objects.get(id).ok_or_else(|| missing(*id))?;
            hops += 1;
            if hops > DEREF_LIMIT {
                return Err(Error::MalformedDocument(format!(
                    "reference chain from {} {} R is too deep",
                    id.0, id.1
                )));
            }
        }
        Ok(object)
    }

    /// Resolve `object` and return an owned copy of it if it is a dictionary.
    pub fn dict_owned(&self, object: &Object) -> Option<Dictionary> {
        match self.resolve(object).ok()? {
            Object::Dictionary(dict) => Some(dict.clone()),
            _ => None,
        }
    }

    /// Reserve a fresh object identity.
    pub fn allocate(&mut self) -> ObjectId {
        self.inner.new_object_id()
    }

    /// Store `object` under `id`, replacing any previous value.
    pub fn set<T: Into<Object>>(&mut self, id: ObjectId, object: T) {
        self.inner.objects.insert(id, object.into());
        self.inner.max_id = self.inner.max_id.max(id.0);
        self.dirty.insert(id);
    }

    /// Allocate an identity and store `object` under it.
    pub fn add<T: Into<Object>>(&mut self, object: T) -> ObjectId {
        let id = self.allocate();
        self.set(id, object);
        id
    }

    /// Page identities in document order.
    pub fn page_ids(&self) -> Vec<ObjectId> {
        self.inner.get_pages().values().cloned().collect()
    }

    pub fn page_id(&self, index: usize) -> Result<ObjectId> {
        let pages = self.page_ids();
        pages.get(index).copied().ok_or(Error::PageNotFound {
            index,
            count: pages.len(),
        })
    }

    /// Mark phase: every live identity reachable from the trailer.
    pub fn reachable(&self) -> BTreeSet<ObjectId> {
        let mut seen = BTreeSet::new();
        let mut pending = Vec::new();
        for (_, value) in self.inner.trailer.iter() {
            collect_refs(value, &mut pending);
        }
        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(object) = self.inner.objects.get(&id) {
                collect_refs(object, &mut pending);
            }
        }
        seen.retain(|id| self.inner.objects.contains_key(id));
        seen
    }
}

fn missing(id: ObjectId) -> Error {
    Error::MalformedDocument(format!("object {} {} R not found", id.0, id.1))
}

fn collect_refs(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter() {
                collect_refs(value, out);
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter() {
                collect_refs(value, out);
            }
        }
        _ => {}
    }
}

/// Find the last `startxref` and classify the section it points at.
pub(crate) fn locate_xref(bytes: &[u8]) -> Option<XrefInfo> {
    let tail_start = bytes.len().saturating_sub(4096);
    let tail = &bytes[tail_start..];
    let pos = tail.windows(9).rposition(|w| w == b"startxref")?;
    let digits: String = tail[pos + 9..]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .map(|&b| b as char)
        .collect();
    let start: usize = digits.parse().ok()?;

    let section = bytes.get(start..)?;
    let section = &section[section.iter().take_while(|b| b.is_ascii_whitespace()).count()..];
    let kind = if section.starts_with(b"xref") {
        XrefKind::Table
    } else if section.first().is_some_and(u8::is_ascii_digit) {
        XrefKind::Stream
    } else {
        return None;
    };
    Some(XrefInfo { start, kind })
}

/// Decode a PDF text string (UTF-16BE with BOM, UTF-8 with BOM, or PDFDocEncoding).
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    // Latin-1 agrees with PDFDocEncoding on the printable range.
    bytes.iter().map(|&b| b as char).collect()
}

/// Encode `text` as a PDF text string object.
pub fn encode_text(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}
