//! Fixture builders for integration tests.

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use lopdf::{Dictionary, Object, ObjectId, Stream, dictionary};

pub const PAGE_CONTENT: &[u8] = b"0 0 1 rg 36 36 540 720 re f";

/// One-page 612x792 PDF with a visible OCG per name.
pub fn template(layers: &[&str]) -> Vec<u8> {
    let mut doc = build(layers);
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

/// Same document saved with object streams and a cross-reference stream.
pub fn modern_template(layers: &[&str]) -> Vec<u8> {
    let mut doc = build(layers);
    let mut bytes = Vec::new();
    doc.save_modern(&mut bytes).unwrap();
    bytes
}

/// Template whose `OCProperties`, `D`, `OCGs` and `ON` are all indirect
/// objects, with `/BaseState /OFF` in the default configuration.
pub fn indirect_template(layers: &[&str]) -> Vec<u8> {
    let mut doc = build(&[]);
    let ocgs: Vec<Object> = layers
        .iter()
        .map(|name| {
            Object::Reference(doc.add_object(dictionary! {
                "Type" => "OCG",
                "Name" => Object::string_literal(*name),
            }))
        })
        .collect();
    let ocgs_id = doc.add_object(ocgs.clone());
    let on_id = doc.add_object(ocgs);
    let d_id = doc.add_object(dictionary! {
        "BaseState" => "OFF",
        "ON" => on_id,
    });
    let props_id = doc.add_object(dictionary! {
        "OCGs" => ocgs_id,
        "D" => d_id,
    });
    let catalog_id = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
    doc.get_object_mut(catalog_id)
        .unwrap()
        .as_dict_mut()
        .unwrap()
        .set("OCProperties", props_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

fn build(layers: &[&str]) -> lopdf::Document {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let ocgs: Vec<Object> = layers
        .iter()
        .map(|name| {
            let id: ObjectId = doc.add_object(dictionary! {
                "Type" => "OCG",
                "Name" => Object::string_literal(*name),
            });
            Object::Reference(id)
        })
        .collect();

    let content_id = doc.add_object(Stream::new(Dictionary::new(), PAGE_CONTENT.to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => dictionary! {},
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    if !ocgs.is_empty() {
        catalog.set(
            "OCProperties",
            dictionary! {
                "OCGs" => ocgs.clone(),
                "D" => dictionary! { "Order" => ocgs.clone(), "ON" => ocgs },
            },
        );
    }
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", catalog_id);
    doc
}

/// Opaque RGB PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    RgbImage::from_pixel(width, height, Rgb([10, 120, 240]))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
