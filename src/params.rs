use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Layer used when the caller does not name one.
pub const DEFAULT_LAYER_NAME: &str = "ARTWORK HERE";

/// Where inserted artwork goes relative to the page's existing content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum StackOrder {
    /// Paint before existing content (renders beneath template line-art).
    #[default]
    Under,
    /// Paint after existing content.
    Over,
}

/// How a requested layer name is matched against existing OCG names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum MatchMode {
    /// Case-insensitive exact match, then substring match in either direction.
    #[default]
    Lenient,
    /// Case-insensitive exact match only.
    Exact,
}

/// Rectangle in page space (points), normalized so that x0 <= x1 and y0 <= y1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x0, self.y0, self.x1, self.y1)
    }
}

/// Parses `x0,y0,x1,y1`.
impl FromStr for Rect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid rectangle '{s}': {e}"))?;
        match values.as_slice() {
            [x0, y0, x1, y1] => Ok(Rect::new(*x0, *y0, *x1, *y1)),
            _ => Err(format!("invalid rectangle '{s}': expected x0,y0,x1,y1")),
        }
    }
}

/// Attributes for a newly created optional content group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcgSpec {
    pub name: String,
    pub default_visible: bool,
    /// `/Intent` name, e.g. `Design` or `View`.
    pub intent: Option<String>,
    /// `/Usage /CreatorInfo /Subtype`, e.g. `Artwork`.
    pub usage: Option<String>,
}

impl OcgSpec {
    /// Visible design layer tagged as artwork.
    pub fn artwork(name: &str) -> OcgSpec {
        OcgSpec {
            name: name.to_string(),
            default_visible: true,
            intent: Some("Design".to_string()),
            usage: Some("Artwork".to_string()),
        }
    }
}

impl Default for OcgSpec {
    fn default() -> Self {
        OcgSpec::artwork(DEFAULT_LAYER_NAME)
    }
}

/// Output serialization switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOptions {
    /// Drop objects unreachable from the trailer.
    pub compact_unreferenced: bool,
    /// Flate-compress streams that carry no filter.
    pub recompress_streams: bool,
    /// Write a fresh file with a new cross-reference table instead of
    /// appending an incremental update to the original bytes.
    pub rebuild_xref: bool,
}

impl SaveOptions {
    /// Append-only update that keeps the original bytes and object numbers.
    pub fn incremental() -> SaveOptions {
        SaveOptions {
            compact_unreferenced: false,
            recompress_streams: false,
            rebuild_xref: false,
        }
    }
}

impl Default for SaveOptions {
    fn default() -> Self {
        SaveOptions {
            compact_unreferenced: true,
            recompress_streams: true,
            rebuild_xref: true,
        }
    }
}

/// Everything one composition run needs besides its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeOptions {
    /// Target layer; also the attributes used if it has to be created.
    pub layer: OcgSpec,
    pub match_mode: MatchMode,
    pub page_index: usize,
    /// Placement rectangle; `None` covers the page MediaBox.
    pub rect: Option<Rect>,
    pub stack_order: StackOrder,
    /// Fit inside `rect` with the image's aspect ratio instead of stretching.
    pub keep_proportion: bool,
    pub save: SaveOptions,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        ComposeOptions {
            layer: OcgSpec::default(),
            match_mode: MatchMode::Lenient,
            page_index: 0,
            rect: None,
            stack_order: StackOrder::Under,
            keep_proportion: false,
            save: SaveOptions::default(),
        }
    }
}
