use log::{debug, info, warn};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Object, ObjectId, Stream};
use serde::Serialize;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::ocg;
use crate::params::{OcgSpec, Rect, StackOrder};
use crate::raster::{self, RasterImage};

/// What to paint, where, and under which layer.
#[derive(Debug, Clone)]
pub struct InsertRequest<'a> {
    pub page_index: usize,
    pub image: &'a RasterImage,
    /// Existing group to tag the artwork with; `None` creates one from `layer`.
    pub target: Option<ObjectId>,
    /// Attributes for the group created when `target` is `None`.
    pub layer: OcgSpec,
    /// Placement rectangle; `None` covers the page MediaBox.
    pub rect: Option<Rect>,
    pub stack_order: StackOrder,
    pub keep_proportion: bool,
}

/// Outcome of one insertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertionReport {
    pub page_id: ObjectId,
    pub xobject_id: ObjectId,
    /// Resource name of the image under the page's `/XObject`.
    pub image_name: String,
    /// Content stream holding the paint operators.
    pub content_id: ObjectId,
    /// Group the artwork was tagged with; `None` after an untagged fallback.
    pub ocg: Option<ObjectId>,
    /// Whether the group was created by this insertion.
    pub created_ocg: bool,
    pub rect: Rect,
}

impl InsertionReport {
    pub fn tagged(&self) -> bool {
        self.ocg.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Tagged,
    Untagged,
}

/// Paint `request.image` onto one page inside an optional content section.
///
/// Runs as a two-step state machine: a tagged attempt that resolves (or
/// creates) the target group and wraps the paint operators in
/// `/OC /name BDC ... EMC`; if that wiring fails, an untagged attempt that
/// paints the same XObject without layer association. A failing untagged
/// attempt is fatal.
pub fn insert_image(doc: &mut Document, request: &InsertRequest) -> Result<InsertionReport> {
    let page_id = doc.page_id(request.page_index)?;
    let media_box = effective_mediabox(doc, page_id)
        .ok_or_else(|| Error::Insertion("page has no usable MediaBox".to_string()))?;
    let rect = request.rect.unwrap_or(media_box);
    if rect.is_empty() {
        return Err(Error::Insertion(format!("placement rectangle {rect} is empty")));
    }

    let xobject_id = raster::add_image_xobject(doc, request.image)?;
    let matrix = placement_matrix(
        &rect,
        request.image.width(),
        request.image.height(),
        request.keep_proportion,
    );

    let mut attempt = Attempt::Tagged;
    let mut created_ocg = false;
    loop {
        let result = match attempt {
            Attempt::Tagged => check_page_wiring(doc, page_id)
                .and_then(|()| tag_target(doc, request))
                .and_then(|(ocg, created)| {
                    created_ocg = created;
                    paint(doc, page_id, xobject_id, &matrix, Some(ocg), request.stack_order)
                })
                .map_err(|e| match e {
                    Error::Insertion(_) => e,
                    other => Error::Insertion(other.to_string()),
                }),
            Attempt::Untagged => paint(doc, page_id, xobject_id, &matrix, None, request.stack_order),
        };
        match (attempt, result) {
            (_, Ok((image_name, content_id, ocg))) => {
                return Ok(InsertionReport {
                    page_id,
                    xobject_id,
                    image_name,
                    content_id,
                    ocg,
                    created_ocg,
                    rect,
                });
            }
            (Attempt::Tagged, Err(e)) => {
                warn!("Error inserting image with OCG: {e}");
                info!("Trying without OCG association...");
                attempt = Attempt::Untagged;
            }
            (Attempt::Untagged, Err(e)) => return Err(e),
        }
    }
}

/// Transform mapping the unit image square onto `rect`.
///
/// Stretches independently on each axis unless `keep_proportion` is set, in
/// which case the image is scaled uniformly to fit and centered.
pub fn placement_matrix(rect: &Rect, width: u32, height: u32, keep_proportion: bool) -> [f64; 6] {
    let (w, h) = (rect.width(), rect.height());
    if !keep_proportion || width == 0 || height == 0 {
        return [w, 0.0, 0.0, h, rect.x0, rect.y0];
    }
    let aspect = width as f64 / height as f64;
    let (fit_w, fit_h) = if w / h > aspect {
        (h * aspect, h)
    } else {
        (w, w / aspect)
    };
    [
        fit_w,
        0.0,
        0.0,
        fit_h,
        rect.x0 + (w - fit_w) / 2.0,
        rect.y0 + (h - fit_h) / 2.0,
    ]
}

/// Catalog side of a tagged attempt; the flag tells whether a group was created.
fn tag_target(doc: &mut Document, request: &InsertRequest) -> Result<(ObjectId, bool)> {
    match request.target {
        Some(id) => {
            ocg::ensure_registered(doc, id)?;
            Ok((id, false))
        }
        None => {
            info!("Layer '{}' not found. Creating new OCG...", request.layer.name);
            let id = ocg::create(doc, &request.layer)?;
            info!("Created new OCG with xref={}", id.0);
            Ok((id, true))
        }
    }
}

/// Page-side lookups a tagged attempt depends on.
///
/// Runs before the catalog is touched, so a page that cannot carry the tag
/// never leaves behind a freshly registered group.
fn check_page_wiring(doc: &Document, page_id: ObjectId) -> Result<()> {
    let page = doc.get_dict(page_id)?;
    let resources = effective_resources(doc, page_id).unwrap_or_default();
    sub_dict(doc, &resources, b"XObject")?;
    sub_dict(doc, &resources, b"Properties")?;
    content_items(doc, page)?;
    Ok(())
}

/// Wire the XObject into the page. The page is only written once every lookup succeeds.
fn paint(
    doc: &mut Document,
    page_id: ObjectId,
    xobject_id: ObjectId,
    matrix: &[f64; 6],
    ocg: Option<ObjectId>,
    stack_order: StackOrder,
) -> Result<(String, ObjectId, Option<ObjectId>)> {
    let page = doc.get_dict(page_id)?.clone();

    let mut resources = effective_resources(doc, page_id).unwrap_or_default();
    let mut xobjects = sub_dict(doc, &resources, b"XObject")?;
    let image_name = unused_name(&xobjects, "Im");
    xobjects.set(image_name.as_bytes(), Object::Reference(xobject_id));
    resources.set("XObject", xobjects);

    let tag = match ocg {
        Some(ocg_id) => {
            let mut properties = sub_dict(doc, &resources, b"Properties")?;
            let existing = properties
                .iter()
                .find(|(_, v)| v.as_reference().ok() == Some(ocg_id))
                .map(|(k, _)| String::from_utf8_lossy(k).into_owned());
            let name = existing.unwrap_or_else(|| unused_name(&properties, "OC"));
            properties.set(name.as_bytes(), Object::Reference(ocg_id));
            resources.set("Properties", properties);
            Some(name)
        }
        None => None,
    };

    let existing = content_refs(doc, &page)?;
    let operations = paint_operations(&image_name, matrix, tag.as_deref());
    let mut content = Content { operations }
        .encode()
        .map_err(|e| Error::Insertion(format!("cannot encode content stream: {e}")))?;
    // Streams in a /Contents array are concatenated; keep EMC a separate token.
    content.push(b'\n');

    // Commit.
    let content_id = doc.add(Stream::new(Dictionary::new(), content));
    let contents = stack_contents(doc, existing, content_id, stack_order);
    let page = doc.get_mut(page_id)?.as_dict_mut()?;
    page.set("Resources", resources);
    page.set("Contents", Object::Array(contents));

    debug!(
        "painted /{} on page {} {} R via content {} {} R (tag {:?})",
        image_name, page_id.0, page_id.1, content_id.0, content_id.1, tag
    );
    Ok((image_name, content_id, ocg))
}

/// `[/OC /tag BDC] q w 0 0 h x y cm /Im Do Q [EMC]`
fn paint_operations(image_name: &str, matrix: &[f64; 6], tag: Option<&str>) -> Vec<Operation> {
    let mut operations = Vec::with_capacity(6);
    if let Some(tag) = tag {
        operations.push(Operation::new(
            "BDC",
            vec![Object::Name(b"OC".to_vec()), Object::Name(tag.as_bytes().to_vec())],
        ));
    }
    operations.push(Operation::new("q", vec![]));
    operations.push(Operation::new(
        "cm",
        matrix.iter().map(|v| Object::from(*v)).collect(),
    ));
    operations.push(Operation::new(
        "Do",
        vec![Object::Name(image_name.as_bytes().to_vec())],
    ));
    operations.push(Operation::new("Q", vec![]));
    if tag.is_some() {
        operations.push(Operation::new("EMC", vec![]));
    }
    operations
}

/// New `/Contents` array with the artwork stream before or after `existing`.
fn stack_contents(
    doc: &mut Document,
    existing: Vec<Object>,
    content_id: ObjectId,
    stack_order: StackOrder,
) -> Vec<Object> {
    let artwork = Object::Reference(content_id);
    if existing.is_empty() {
        return vec![artwork];
    }
    match stack_order {
        StackOrder::Under => std::iter::once(artwork).chain(existing).collect(),
        StackOrder::Over => {
            // Isolate prior content so its graphics state cannot leak into the artwork.
            let save = doc.add(Stream::new(Dictionary::new(), b"q\n".to_vec()));
            let restore = doc.add(Stream::new(Dictionary::new(), b"\nQ\n".to_vec()));
            std::iter::once(Object::Reference(save))
                .chain(existing)
                .chain([Object::Reference(restore), artwork])
                .collect()
        }
    }
}

/// Content stream references of a page, in paint order.
///
/// Inline streams are moved into their own objects so they can sit in an array.
fn content_refs(doc: &mut Document, page: &Dictionary) -> Result<Vec<Object>> {
    let items = content_items(doc, page)?;
    let mut refs = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Object::Reference(id) => refs.push(Object::Reference(id)),
            Object::Stream(stream) => refs.push(Object::Reference(doc.add(stream))),
            _ => {}
        }
    }
    Ok(refs)
}

fn content_items(doc: &Document, page: &Dictionary) -> Result<Vec<Object>> {
    let Ok(contents) = page.get(b"Contents") else {
        return Ok(Vec::new());
    };
    let items = match contents {
        Object::Reference(id) => match doc.get(*id)? {
            Object::Stream(_) => vec![Object::Reference(*id)],
            Object::Array(items) => items.clone(),
            _ => return Err(Error::Insertion("page /Contents is not a stream".to_string())),
        },
        Object::Array(items) => items.clone(),
        Object::Stream(stream) => vec![Object::Stream(stream.clone())],
        _ => return Err(Error::Insertion("page /Contents is not a stream".to_string())),
    };
    Ok(items)
}

/// Owned copy of `resources[key]`, which must be a dictionary if present.
fn sub_dict(doc: &Document, resources: &Dictionary, key: &[u8]) -> Result<Dictionary> {
    match resources.get(key) {
        Err(_) => Ok(Dictionary::new()),
        Ok(obj) => doc.dict_owned(obj).ok_or_else(|| {
            Error::Insertion(format!(
                "page /Resources /{} is not a dictionary",
                String::from_utf8_lossy(key)
            ))
        }),
    }
}

/// First `{prefix}{n}` not already a key of `dict`.
fn unused_name(dict: &Dictionary, prefix: &str) -> String {
    let mut n = 0usize;
    loop {
        let name = format!("{prefix}{n}");
        if !dict.has(name.as_bytes()) {
            return name;
        }
        n += 1;
    }
}

#[inline]
fn dict_get<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok()
}

/// Page `/Resources`, following `/Parent` inheritance.
fn effective_resources(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
    let mut cur = doc.get_dict(page_id).ok()?;
    loop {
        if let Some(obj) = dict_get(cur, b"Resources") {
            return doc.dict_owned(obj);
        }
        match dict_get(cur, b"Parent") {
            Some(Object::Reference(pid)) => cur = doc.get_dict(*pid).ok()?,
            _ => return None,
        }
    }
}

fn as_f64(n: &Object) -> Option<f64> {
    match n {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// Page `/MediaBox`, following `/Parent` inheritance.
pub fn effective_mediabox(doc: &Document, page_id: ObjectId) -> Option<Rect> {
    let mut cur = doc.get_dict(page_id).ok()?;
    loop {
        if let Some(obj) = dict_get(cur, b"MediaBox") {
            if let Ok(Object::Array(a)) = doc.resolve(obj) {
                if a.len() == 4 {
                    let v: Vec<f64> = a
                        .iter()
                        .filter_map(|o| doc.resolve(o).ok().and_then(as_f64))
                        .collect();
                    if v.len() == 4 {
                        return Some(Rect::new(v[0], v[1], v[2], v[3]));
                    }
                }
            }
        }
        match dict_get(cur, b"Parent") {
            Some(Object::Reference(pid)) => cur = doc.get_dict(*pid).ok()?,
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocg::list;
    use crate::testing::{TEMPLATE_CONTENT, png_bytes, template_with_layers};
    use lopdf::dictionary;

    fn request<'a>(image: &'a RasterImage) -> InsertRequest<'a> {
        InsertRequest {
            page_index: 0,
            image,
            target: None,
            layer: OcgSpec::artwork("ARTWORK HERE"),
            rect: None,
            stack_order: StackOrder::Under,
            keep_proportion: false,
        }
    }

    fn page_operators(doc: &Document, page_id: ObjectId) -> Vec<String> {
        let bytes = doc.inner().get_page_content(page_id).unwrap();
        Content::decode(&bytes)
            .unwrap()
            .operations
            .into_iter()
            .map(|op| op.operator)
            .collect()
    }

    fn artwork() -> RasterImage {
        RasterImage::decode(&png_bytes(20, 10, None)).unwrap()
    }

    #[test]
    fn test_stretch_matrix_fills_rect() {
        let rect = Rect::new(10.0, 20.0, 110.0, 70.0);
        assert_eq!(
            placement_matrix(&rect, 1000, 1000, false),
            [100.0, 0.0, 0.0, 50.0, 10.0, 20.0]
        );
    }

    #[test]
    fn test_proportional_matrix_centers() {
        let rect = Rect::new(0.0, 0.0, 100.0, 50.0);
        // Square image in a wide box: height-bound, centered horizontally.
        assert_eq!(
            placement_matrix(&rect, 10, 10, true),
            [50.0, 0.0, 0.0, 50.0, 25.0, 0.0]
        );
        // Wide image in a tall box: width-bound, centered vertically.
        let tall = Rect::new(0.0, 0.0, 40.0, 100.0);
        assert_eq!(
            placement_matrix(&tall, 20, 10, true),
            [40.0, 0.0, 0.0, 20.0, 0.0, 40.0]
        );
    }

    #[test]
    fn test_unused_name_skips_taken() {
        let dict = dictionary! { "Im0" => Object::Null, "Im1" => Object::Null, "Im3" => Object::Null };
        assert_eq!(unused_name(&dict, "Im"), "Im2");
        assert_eq!(unused_name(&Dictionary::new(), "OC"), "OC0");
    }

    #[test]
    fn test_insert_under_precedes_existing_content() {
        let bytes = template_with_layers(&["BACKGROUND", "TEMPLATE MASK"]);
        let mut doc = Document::parse(&bytes).unwrap();
        let image = artwork();

        let report = insert_image(&mut doc, &request(&image)).unwrap();
        assert!(report.tagged());
        assert_eq!(report.image_name, "Im0");
        assert_eq!(report.rect, Rect::new(0.0, 0.0, 612.0, 792.0));

        let ops = page_operators(&doc, report.page_id);
        assert_eq!(&ops[..6], &["BDC", "q", "cm", "Do", "Q", "EMC"]);
        assert_eq!(ops.len(), 6 + 6);

        let content = doc.inner().get_page_content(report.page_id).unwrap();
        let template_at = content
            .windows(TEMPLATE_CONTENT.len())
            .position(|w| w == TEMPLATE_CONTENT)
            .unwrap();
        let emc_at = content.windows(3).position(|w| w == b"EMC").unwrap();
        assert!(emc_at < template_at);

        let layers = list(&doc);
        assert_eq!(layers.len(), 3);
        assert_eq!(Some(layers[2].id), report.ocg);
    }

    #[test]
    fn test_insert_over_wraps_existing_content() {
        let bytes = template_with_layers(&["BACKGROUND"]);
        let mut doc = Document::parse(&bytes).unwrap();
        let image = artwork();
        let mut req = request(&image);
        req.stack_order = StackOrder::Over;

        let report = insert_image(&mut doc, &req).unwrap();
        let page = doc.get_dict(report.page_id).unwrap();
        let contents = page.get(b"Contents").unwrap().as_array().unwrap();
        assert_eq!(contents.len(), 4);
        assert_eq!(contents[3].as_reference().unwrap(), report.content_id);

        let ops = page_operators(&doc, report.page_id);
        assert_eq!(ops.first().map(String::as_str), Some("q"));
        assert_eq!(&ops[ops.len() - 6..], &["BDC", "q", "cm", "Do", "Q", "EMC"]);
    }

    #[test]
    fn test_insert_registers_resources() {
        let bytes = template_with_layers(&["BACKGROUND"]);
        let mut doc = Document::parse(&bytes).unwrap();
        let image = artwork();
        let target = list(&doc)[0].id;
        let mut req = request(&image);
        req.target = Some(target);

        let report = insert_image(&mut doc, &req).unwrap();
        assert_eq!(report.ocg, Some(target));
        assert_eq!(list(&doc).len(), 1);

        let resources = effective_resources(&doc, report.page_id).unwrap();
        let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
        assert_eq!(xobjects.len(), 1);
        assert_eq!(xobjects.get(b"Im0").unwrap().as_reference().unwrap(), report.xobject_id);
        let properties = resources.get(b"Properties").unwrap().as_dict().unwrap();
        assert_eq!(properties.get(b"OC0").unwrap().as_reference().unwrap(), target);

        // A second insertion picks the next image name and reuses the property name.
        let second = insert_image(&mut doc, &req).unwrap();
        assert_eq!(second.image_name, "Im1");
        let resources = effective_resources(&doc, report.page_id).unwrap();
        assert_eq!(resources.get(b"Properties").unwrap().as_dict().unwrap().len(), 1);
    }

    #[test]
    fn test_non_ocg_target_falls_back_to_untagged() {
        let bytes = template_with_layers(&["BACKGROUND"]);
        let mut doc = Document::parse(&bytes).unwrap();
        let image = artwork();
        let mut req = request(&image);
        req.target = Some(doc.page_id(0).unwrap());

        let report = insert_image(&mut doc, &req).unwrap();
        assert!(!report.tagged());
        let ops = page_operators(&doc, report.page_id);
        assert_eq!(&ops[..4], &["q", "cm", "Do", "Q"]);
        assert!(!ops.iter().any(|op| op == "BDC"));
        assert_eq!(list(&doc).len(), 1);
        assert!(!report.created_ocg);
    }

    #[test]
    fn test_concatenated_contents_keep_emc_separate() {
        let bytes = template_with_layers(&["BACKGROUND"]);
        let mut doc = Document::parse(&bytes).unwrap();
        let image = artwork();
        let report = insert_image(&mut doc, &request(&image)).unwrap();
        assert!(report.created_ocg);

        // Join the raw stream bytes exactly as a reader concatenates the array.
        let page = doc.get_dict(report.page_id).unwrap();
        let mut joined = Vec::new();
        for item in page.get(b"Contents").unwrap().as_array().unwrap() {
            let id = item.as_reference().unwrap();
            joined.extend_from_slice(&doc.get(id).unwrap().as_stream().unwrap().content);
        }
        let text = String::from_utf8(joined).unwrap();
        let tokens: Vec<&str> = text.split_ascii_whitespace().collect();
        let emc = tokens.iter().position(|t| *t == "EMC").unwrap();
        assert_eq!(tokens[emc + 1], "q");
        assert_eq!(tokens.iter().filter(|t| **t == "BDC").count(), 1);
    }

    #[test]
    fn test_malformed_properties_creates_no_group() {
        let bytes = template_with_layers(&["BACKGROUND"]);
        let mut doc = Document::parse(&bytes).unwrap();
        let page_id = doc.page_id(0).unwrap();
        doc.get_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Resources", dictionary! { "Properties" => Object::Integer(7) });
        let image = artwork();

        let report = insert_image(&mut doc, &request(&image)).unwrap();
        assert!(!report.tagged());
        assert!(!report.created_ocg);
        let names: Vec<String> = list(&doc).into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["BACKGROUND"]);
        let ops = page_operators(&doc, report.page_id);
        assert_eq!(&ops[..4], &["q", "cm", "Do", "Q"]);
    }

    #[test]
    fn test_page_out_of_range() {
        let bytes = template_with_layers(&[]);
        let mut doc = Document::parse(&bytes).unwrap();
        let image = artwork();
        let mut req = request(&image);
        req.page_index = 1;
        let err = insert_image(&mut doc, &req).unwrap_err();
        assert!(matches!(err, Error::PageNotFound { index: 1, count: 1 }));
    }

    #[test]
    fn test_inherited_mediabox_and_resources() {
        let bytes = template_with_layers(&[]);
        let mut doc = Document::parse(&bytes).unwrap();
        let page_id = doc.page_id(0).unwrap();
        let parent = doc
            .get_dict(page_id)
            .unwrap()
            .get(b"Parent")
            .unwrap()
            .as_reference()
            .unwrap();
        {
            let page = doc.get_mut(page_id).unwrap().as_dict_mut().unwrap();
            page.remove(b"MediaBox");
            page.remove(b"Resources");
        }
        {
            let pages = doc.get_mut(parent).unwrap().as_dict_mut().unwrap();
            pages.set(
                "MediaBox",
                vec![Object::Integer(0), Object::Integer(0), Object::Integer(300), Object::Integer(200)],
            );
            pages.set(
                "Resources",
                dictionary! { "XObject" => dictionary! { "Im0" => Object::Null } },
            );
        }

        assert_eq!(effective_mediabox(&doc, page_id), Some(Rect::new(0.0, 0.0, 300.0, 200.0)));
        let image = artwork();
        let report = insert_image(&mut doc, &request(&image)).unwrap();
        assert_eq!(report.image_name, "Im1");

        // The shared parent resources are left alone.
        let pages = doc.get_dict(parent).unwrap();
        let shared = pages.get(b"Resources").unwrap().as_dict().unwrap();
        assert_eq!(shared.get(b"XObject").unwrap().as_dict().unwrap().len(), 1);
    }
}
