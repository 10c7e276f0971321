//! Writes an edited [`Document`] back to bytes.
//!
//! Two strategies:
//! - full rewrite: every live object is written into a fresh file with a new
//!   cross-reference table (lopdf's writer does the layout);
//! - incremental update: the original bytes are kept verbatim and only
//!   touched objects are appended, followed by a cross-reference section of
//!   the same kind as the original with `/Prev` chaining to it.

use std::collections::BTreeMap;
use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use log::{debug, warn};
use lopdf::{Dictionary, Object, ObjectId, Stream, StringFormat};

use crate::document::{Document, XrefInfo, XrefKind};
use crate::error::{Error, Result};
use crate::params::SaveOptions;

/// Serialize `doc` according to `options`.
pub fn serialize(doc: &Document, options: &SaveOptions) -> Result<Vec<u8>> {
    if options.rebuild_xref {
        return rewrite(doc, options);
    }
    match doc.xref_info() {
        Some(info) => incremental(doc, info, options),
        None => {
            warn!("source has no usable startxref; writing a full rewrite instead");
            rewrite(doc, options)
        }
    }
}

/// Zlib-compress `data` for a `/FlateDecode` stream.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Serialization(format!("deflate failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::Serialization(format!("deflate failed: {e}")))
}

fn rewrite(doc: &Document, options: &SaveOptions) -> Result<Vec<u8>> {
    let live = doc.reachable();
    let mut out = doc.inner().clone();

    let before = out.objects.len();
    out.objects.retain(|id, object| {
        !is_xref_container(object) && (!options.compact_unreferenced || live.contains(id))
    });
    debug!("rewrite keeps {} of {} objects", out.objects.len(), before);

    // Cross-reference stream keys and /Prev describe the old file layout.
    let mut trailer = Dictionary::new();
    for key in ["Root", "Info", "ID"] {
        if let Ok(value) = out.trailer.get(key.as_bytes()) {
            trailer.set(key, value.clone());
        }
    }
    out.trailer = trailer;

    if options.recompress_streams {
        for object in out.objects.values_mut() {
            if let Object::Stream(stream) = object {
                deflate_stream(stream)?;
            }
        }
    }

    let mut bytes = Vec::new();
    out.save_to(&mut bytes)
        .map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    InUse { offset: usize, generation: u16 },
    Free { next: u32, generation: u16 },
}

fn incremental(doc: &Document, info: XrefInfo, options: &SaveOptions) -> Result<Vec<u8>> {
    let live = options.compact_unreferenced.then(|| doc.reachable());
    let is_live = |id: &ObjectId| live.as_ref().is_none_or(|set| set.contains(id));

    let mut out = doc.source().to_vec();
    if !out.ends_with(b"\n") {
        out.push(b'\n');
    }

    let mut entries: BTreeMap<u32, Entry> = BTreeMap::new();
    for &id in doc.dirty() {
        let Some(object) = doc.inner().objects.get(&id) else {
            continue;
        };
        if !is_live(&id) {
            continue;
        }
        let mut object = object.clone();
        if options.recompress_streams {
            if let Object::Stream(stream) = &mut object {
                deflate_stream(stream)?;
            }
        }
        let offset = out.len();
        write_indirect(&mut out, id, &object);
        entries.insert(
            id.0,
            Entry::InUse {
                offset,
                generation: id.1,
            },
        );
    }

    if live.is_some() {
        let freed: Vec<ObjectId> = doc
            .inner()
            .objects
            .iter()
            .filter(|&(id, object)| {
                id.0 != 0
                    && id.0 <= doc.source_max_id()
                    && !is_live(id)
                    && !is_xref_container(object)
                    && !entries.contains_key(&id.0)
            })
            .map(|(id, _)| *id)
            .collect();
        link_free_entries(&mut entries, &freed);
        debug!("incremental update frees {} objects", freed.len());
    }

    let trailer_size = doc
        .trailer()
        .get(b"Size")
        .and_then(Object::as_i64)
        .unwrap_or(0)
        .max(0) as u32;
    let last = entries.keys().next_back().copied().unwrap_or(0);
    let size = trailer_size.max(doc.max_id() + 1).max(last + 1);

    let mut trailer = Dictionary::new();
    for key in ["Root", "Info", "ID"] {
        if let Ok(value) = doc.trailer().get(key.as_bytes()) {
            trailer.set(key, value.clone());
        }
    }
    trailer.set("Prev", Object::Integer(info.start as i64));

    match info.kind {
        XrefKind::Table => {
            trailer.set("Size", Object::Integer(size as i64));
            write_xref_table(&mut out, &entries, &trailer);
        }
        XrefKind::Stream => write_xref_stream(&mut out, entries, trailer, size)?,
    }
    Ok(out)
}

/// Record `freed` as free entries with bumped generations, chained from
/// object 0 in ascending order.
fn link_free_entries(entries: &mut BTreeMap<u32, Entry>, freed: &[ObjectId]) {
    if freed.is_empty() {
        return;
    }
    let mut freed = freed.to_vec();
    freed.sort();
    entries.insert(
        0,
        Entry::Free {
            next: freed[0].0,
            generation: u16::MAX,
        },
    );
    for (i, id) in freed.iter().enumerate() {
        let next = freed.get(i + 1).map_or(0, |n| n.0);
        entries.insert(
            id.0,
            Entry::Free {
                next,
                generation: id.1.saturating_add(1),
            },
        );
    }
}

/// Group entries into runs of consecutive object numbers.
fn subsections(entries: &BTreeMap<u32, Entry>) -> Vec<(u32, Vec<Entry>)> {
    let mut runs: Vec<(u32, Vec<Entry>)> = Vec::new();
    for (&number, &entry) in entries {
        match runs.last_mut() {
            Some((start, run)) if *start + run.len() as u32 == number => run.push(entry),
            _ => runs.push((number, vec![entry])),
        }
    }
    runs
}

fn write_xref_table(out: &mut Vec<u8>, entries: &BTreeMap<u32, Entry>, trailer: &Dictionary) {
    let start = out.len();
    out.extend_from_slice(b"xref\n");
    for (first, run) in subsections(entries) {
        out.extend_from_slice(format!("{} {}\n", first, run.len()).as_bytes());
        for entry in run {
            let line = match entry {
                Entry::InUse { offset, generation } => format!("{offset:010} {generation:05} n\r\n"),
                Entry::Free { next, generation } => format!("{next:010} {generation:05} f\r\n"),
            };
            out.extend_from_slice(line.as_bytes());
        }
    }
    out.extend_from_slice(b"trailer\n");
    write_dictionary(out, trailer);
    out.extend_from_slice(format!("\nstartxref\n{start}\n%%EOF\n").as_bytes());
}

fn write_xref_stream(
    out: &mut Vec<u8>,
    mut entries: BTreeMap<u32, Entry>,
    mut dict: Dictionary,
    size: u32,
) -> Result<()> {
    // The stream needs an entry for itself.
    let xref_id = (size, 0);
    let start = out.len();
    entries.insert(
        xref_id.0,
        Entry::InUse {
            offset: start,
            generation: 0,
        },
    );

    let mut rows = Vec::with_capacity(entries.len() * 7);
    for entry in entries.values() {
        match *entry {
            Entry::InUse { offset, generation } => {
                let offset = u32::try_from(offset).map_err(|_| {
                    Error::Serialization(format!("offset {offset} does not fit a 4-byte xref field"))
                })?;
                rows.push(1);
                rows.extend_from_slice(&offset.to_be_bytes());
                rows.extend_from_slice(&generation.to_be_bytes());
            }
            Entry::Free { next, generation } => {
                rows.push(0);
                rows.extend_from_slice(&next.to_be_bytes());
                rows.extend_from_slice(&generation.to_be_bytes());
            }
        }
    }

    let index: Vec<Object> = subsections(&entries)
        .into_iter()
        .flat_map(|(first, run)| {
            [
                Object::Integer(first as i64),
                Object::Integer(run.len() as i64),
            ]
        })
        .collect();

    dict.set("Type", "XRef");
    dict.set("Size", Object::Integer(size as i64 + 1));
    dict.set(
        "W",
        vec![Object::Integer(1), Object::Integer(4), Object::Integer(2)],
    );
    dict.set("Index", index);
    dict.set("Filter", "FlateDecode");
    let stream = Stream::new(dict, deflate(&rows)?);

    write_indirect(out, xref_id, &Object::Stream(stream));
    out.extend_from_slice(format!("startxref\n{start}\n%%EOF\n").as_bytes());
    Ok(())
}

fn is_xref_container(object: &Object) -> bool {
    let Object::Stream(stream) = object else {
        return false;
    };
    matches!(
        stream.dict.get(b"Type").and_then(Object::as_name),
        Ok(b"XRef") | Ok(b"ObjStm")
    )
}

/// Flate-compress an unfiltered stream in place when that makes it smaller.
fn deflate_stream(stream: &mut Stream) -> Result<()> {
    if !stream.allows_compression || stream.dict.has(b"Filter") || stream.content.is_empty() {
        return Ok(());
    }
    let compressed = deflate(&stream.content)?;
    if compressed.len() < stream.content.len() {
        stream.dict.set("Filter", "FlateDecode");
        stream.dict.set("Length", Object::Integer(compressed.len() as i64));
        stream.content = compressed;
    }
    Ok(())
}

/// Write `n g obj ... endobj`.
pub fn write_indirect(out: &mut Vec<u8>, id: ObjectId, object: &Object) {
    out.extend_from_slice(format!("{} {} obj\n", id.0, id.1).as_bytes());
    write_object(out, object);
    out.extend_from_slice(b"\nendobj\n");
}

/// Write a direct object in PDF syntax.
pub fn write_object(out: &mut Vec<u8>, object: &Object) {
    match object {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(value) => out.extend_from_slice(if *value { b"true" } else { b"false" }),
        Object::Integer(value) => out.extend_from_slice(value.to_string().as_bytes()),
        Object::Real(value) => write_real(out, f64::from(*value)),
        Object::Name(name) => write_name(out, name),
        Object::String(bytes, StringFormat::Literal) => write_literal(out, bytes),
        Object::String(bytes, StringFormat::Hexadecimal) => {
            out.push(b'<');
            for byte in bytes {
                out.extend_from_slice(format!("{byte:02X}").as_bytes());
            }
            out.push(b'>');
        }
        Object::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_object(out, item);
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => write_dictionary(out, dict),
        Object::Stream(stream) => {
            let mut dict = stream.dict.clone();
            dict.set("Length", Object::Integer(stream.content.len() as i64));
            write_dictionary(out, &dict);
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(&stream.content);
            out.extend_from_slice(b"\nendstream");
        }
        Object::Reference(id) => out.extend_from_slice(format!("{} {} R", id.0, id.1).as_bytes()),
    }
}

fn write_dictionary(out: &mut Vec<u8>, dict: &Dictionary) {
    out.extend_from_slice(b"<<");
    for (key, value) in dict.iter() {
        write_name(out, key);
        out.push(b' ');
        write_object(out, value);
        out.push(b' ');
    }
    out.extend_from_slice(b">>");
}

fn write_real(out: &mut Vec<u8>, value: f64) {
    if !value.is_finite() {
        out.push(b'0');
        return;
    }
    let text = format!("{value:.5}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    let text = if text == "-0" { "0" } else { text };
    out.extend_from_slice(text.as_bytes());
}

fn write_name(out: &mut Vec<u8>, name: &[u8]) {
    out.push(b'/');
    for &byte in name {
        let regular = (0x21..=0x7E).contains(&byte) && !b"()<>[]{}/%#".contains(&byte);
        if regular {
            out.push(byte);
        } else {
            out.extend_from_slice(format!("#{byte:02X}").as_bytes());
        }
    }
}

fn write_literal(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'(');
    for &byte in bytes {
        match byte {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(byte);
            }
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            _ => out.push(byte),
        }
    }
    out.push(b')');
}
