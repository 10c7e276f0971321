//! Error types for layer composition.

use std::io;
use thiserror::Error;

/// Result type alias for composition operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while compositing artwork into a template.
#[derive(Error, Debug)]
pub enum Error {
    /// The template could not be parsed, or its trailer/catalog is missing.
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// The artwork could not be decoded to known dimensions and pixel format.
    #[error("Unreadable image: {0}")]
    UnreadableImage(String),

    /// The requested page index does not exist.
    #[error("Page {index} not found (document has {count} pages)")]
    PageNotFound { index: usize, count: usize },

    /// Wiring the image or its layer association into the page failed.
    #[error("Insertion failed: {0}")]
    Insertion(String),

    /// The output document could not be produced or written.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// I/O error when reading inputs.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Taxonomy name reported in the structured result.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedDocument(_) => "MalformedDocument",
            Error::UnreadableImage(_) => "UnreadableImage",
            Error::PageNotFound { .. } => "PageNotFound",
            Error::Insertion(_) => "InsertionError",
            Error::Serialization(_) => "SerializationError",
            Error::Io(_) => "IoError",
        }
    }
}

impl From<lopdf::Error> for Error {
    fn from(err: lopdf::Error) -> Self {
        Error::MalformedDocument(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::UnreadableImage(err.to_string())
    }
}
