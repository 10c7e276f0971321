//! # ocg_compose
//!
//! Composite raster artwork into a PDF template page under a named
//! optional content group (OCG, a "layer").
//!
//! The pipeline is parse, mutate, serialize: the template is loaded into an
//! editable object graph, the target layer is resolved by name (or created),
//! the image is painted onto the page inside an `/OC` marked-content
//! section, and the result is written either as a full rewrite or as an
//! incremental update appended to the original bytes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ocg_compose::{compose_files, ComposeOptions};
//!
//! fn main() -> ocg_compose::Result<()> {
//!     let options = ComposeOptions::default();
//!     let report = compose_files("template.pdf", "artwork.png", "output.pdf", &options)?;
//!     println!("layers: {:?}", report.layers_after);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Layer lookup**: case-insensitive exact match, then substring fallback
//! - **Stacking**: artwork beneath (default) or above existing page content
//! - **Graceful fallback**: paints untagged if the layer wiring fails
//! - **Incremental saves**: original bytes and object numbers preserved

pub mod document;
pub mod error;
pub mod insert;
pub mod ocg;
pub mod params;
pub mod raster;
pub mod serialize;

#[cfg(test)]
mod testing;

pub use document::Document;
pub use error::{Error, Result};
pub use insert::{InsertRequest, InsertionReport, insert_image};
pub use ocg::OcgInfo;
pub use params::{
    ComposeOptions, DEFAULT_LAYER_NAME, MatchMode, OcgSpec, Rect, SaveOptions, StackOrder,
};
pub use raster::RasterImage;
pub use serialize::serialize;

use std::io::Write;
use std::path::Path;

use log::{debug, info};
use lopdf::ObjectId;
use serde::Serialize;

/// Summary of one composition run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposeReport {
    pub page_index: usize,
    /// Layer names in registry order before the edit.
    pub layers_before: Vec<String>,
    /// Layer names in registry order after the edit.
    pub layers_after: Vec<String>,
    /// Group the artwork was tagged with; `None` after an untagged fallback.
    pub ocg: Option<ObjectId>,
    /// Whether the group was created by this run.
    pub created: bool,
    pub image_name: String,
    pub rect: Rect,
}

impl ComposeReport {
    pub fn tagged(&self) -> bool {
        self.ocg.is_some()
    }
}

/// Serialized output plus what was done to produce it.
#[derive(Debug, Clone)]
pub struct Composition {
    pub bytes: Vec<u8>,
    pub report: ComposeReport,
}

/// Run the whole pipeline in memory.
///
/// # Arguments
///
/// * `template` - PDF bytes of the template
/// * `artwork` - encoded raster image (PNG, JPEG, ...)
/// * `options` - layer, placement and save options
pub fn compose(template: &[u8], artwork: &[u8], options: &ComposeOptions) -> Result<Composition> {
    let mut doc = Document::parse(template)?;

    let layers_before: Vec<String> = ocg::list(&doc).into_iter().map(|l| l.name).collect();
    info!("Found {} OCG layers:", layers_before.len());
    for name in &layers_before {
        info!("  - {name}");
    }

    let page_id = doc.page_id(options.page_index)?;
    if let Some(media_box) = insert::effective_mediabox(&doc, page_id) {
        info!(
            "Page {} size: {} x {}",
            options.page_index,
            media_box.width(),
            media_box.height()
        );
    }

    let image = RasterImage::decode(artwork)?;
    debug!(
        "artwork {}x{} {:?}",
        image.width(),
        image.height(),
        image.format()
    );

    let target = ocg::find_by_name(&doc, &options.layer.name, options.match_mode);
    if let Some(id) = target {
        info!("Found target OCG '{}' (xref={})", options.layer.name, id.0);
    }

    let request = InsertRequest {
        page_index: options.page_index,
        image: &image,
        target,
        layer: options.layer.clone(),
        rect: options.rect,
        stack_order: options.stack_order,
        keep_proportion: options.keep_proportion,
    };
    let inserted = insert_image(&mut doc, &request)?;
    if inserted.tagged() {
        info!("Image inserted with OCG association");
    } else {
        info!("Image inserted without OCG association");
    }

    let layers_after: Vec<String> = ocg::list(&doc).into_iter().map(|l| l.name).collect();
    info!("Final document has {} OCG layers:", layers_after.len());
    for name in &layers_after {
        info!("  - {name}");
    }

    let bytes = serialize(&doc, &options.save)?;
    Ok(Composition {
        bytes,
        report: ComposeReport {
            page_index: options.page_index,
            layers_before,
            layers_after,
            created: inserted.created_ocg,
            ocg: inserted.ocg,
            image_name: inserted.image_name,
            rect: inserted.rect,
        },
    })
}

/// Run the pipeline on files.
///
/// The output is written to a temporary file next to `output` and moved
/// into place only once fully written, so a failed run never leaves a
/// partial file behind or touches an existing one.
pub fn compose_files(
    template: impl AsRef<Path>,
    artwork: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: &ComposeOptions,
) -> Result<ComposeReport> {
    let template = std::fs::read(template.as_ref())?;
    let artwork_path = artwork.as_ref();
    let artwork = std::fs::read(artwork_path).map_err(|e| {
        Error::UnreadableImage(format!("cannot read {}: {e}", artwork_path.display()))
    })?;

    let composition = compose(&template, &artwork, options)?;

    let output = output.as_ref();
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::Serialization(format!("cannot create {}: {e}", dir.display())))?;
    file.write_all(&composition.bytes)
        .and_then(|_| file.as_file().sync_all())
        .map_err(|e| Error::Serialization(e.to_string()))?;
    file.persist(output)
        .map_err(|e| Error::Serialization(format!("cannot write {}: {}", output.display(), e.error)))?;

    info!("Saved to {}", output.display());
    Ok(composition.report)
}
