//! In-memory fixtures shared by unit tests.

use std::io::{Cursor, Write};

use flate2::Compression;
use flate2::write::ZlibEncoder;
use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use lopdf::{Dictionary, Object, ObjectId, Stream, dictionary};

/// Line-art drawn by every fixture page.
pub(crate) const TEMPLATE_CONTENT: &[u8] = b"q 0 0 0 RG 10 10 m 600 780 l S Q";

/// Single-page 612x792 template whose catalog lists one OCG per name,
/// all default-visible, saved with a classic xref table.
pub(crate) fn template_with_layers(names: &[&str]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    doc.reference_table.cross_reference_type = lopdf::xref::XrefType::CrossReferenceTable;
    let pages_id = doc.new_object_id();

    let ocg_ids: Vec<ObjectId> = names
        .iter()
        .map(|name| {
            doc.add_object(dictionary! {
                "Type" => "OCG",
                "Name" => Object::string_literal(*name),
            })
        })
        .collect();

    let content_id = doc.add_object(Stream::new(Dictionary::new(), TEMPLATE_CONTENT.to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(612),
            Object::Integer(792),
        ],
        "Resources" => Dictionary::new(),
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => Object::Integer(1),
        }),
    );

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    if !names.is_empty() {
        let refs: Vec<Object> = ocg_ids.iter().map(|id| Object::Reference(*id)).collect();
        catalog.set(
            "OCProperties",
            dictionary! {
                "OCGs" => refs.clone(),
                "D" => dictionary! {
                    "Order" => refs.clone(),
                    "ON" => refs,
                },
            },
        );
    }
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture saves");
    bytes
}

/// Single-page template with one OCG whose only cross-reference section is a
/// compressed `/Type /XRef` stream.
pub(crate) fn template_with_xref_stream(layer: &str) -> Vec<u8> {
    let bodies = [
        "<< /Type /Catalog /Pages 2 0 R /OCProperties << /OCGs [4 0 R] /D << /ON [4 0 R] /Order [4 0 R] >> >> >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 200 100] /Resources << >> /Contents 5 0 R >>".to_string(),
        format!("<< /Type /OCG /Name ({layer}) >>"),
    ];

    let mut out = b"%PDF-1.5\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in bodies.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    offsets.push(out.len());
    out.extend_from_slice(
        format!("5 0 obj\n<< /Length {} >>\nstream\n", TEMPLATE_CONTENT.len()).as_bytes(),
    );
    out.extend_from_slice(TEMPLATE_CONTENT);
    out.extend_from_slice(b"\nendstream\nendobj\n");

    let xref_offset = out.len();
    offsets.push(xref_offset);
    let mut rows = vec![0u8, 0, 0, 0, 0, 0xFF, 0xFF];
    for offset in &offsets {
        rows.push(1);
        rows.extend_from_slice(&(*offset as u32).to_be_bytes());
        rows.extend_from_slice(&[0, 0]);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&rows).expect("in-memory write");
    let data = encoder.finish().expect("in-memory write");

    out.extend_from_slice(
        format!(
            "6 0 obj\n<< /Type /XRef /Size 7 /W [1 4 2] /Root 1 0 R /Filter /FlateDecode /Length {} >>\nstream\n",
            data.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&data);
    out.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{xref_offset}\n%%EOF\n").as_bytes());
    out
}

/// PNG-encoded solid image; `alpha` adds an alpha channel with that value.
pub(crate) fn png_bytes(width: u32, height: u32, alpha: Option<u8>) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    match alpha {
        Some(a) => RgbaImage::from_pixel(width, height, Rgba([200, 30, 30, a]))
            .write_to(&mut out, ImageFormat::Png)
            .expect("png encodes"),
        None => RgbImage::from_pixel(width, height, Rgb([200, 30, 30]))
            .write_to(&mut out, ImageFormat::Png)
            .expect("png encodes"),
    }
    out.into_inner()
}
