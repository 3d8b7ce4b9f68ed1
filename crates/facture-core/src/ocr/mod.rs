//! Per-page extraction: layout detection, region text recognition, and
//! whole-page structured field extraction.

mod layout;
mod preprocessing;
mod region_text;
mod structured;

pub use layout::{LayoutDetector, draw_regions};
pub use preprocessing::ImagePreprocessor;
pub use region_text::RegionTextExtractor;
pub use structured::{StructuredFieldExtractor, parse_field_markup};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a detected layout region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// Free-text paragraph block.
    Paragraph,
    /// Tabular block.
    Table,
}

impl RegionKind {
    /// Short lowercase name, used in region keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionKind::Paragraph => "paragraph",
            RegionKind::Table => "table",
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned bounding box in page pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Get the width of the box.
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    /// Get the height of the box.
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Get the area of the box.
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Clamp coordinates to image dimensions.
    pub fn clamp(&self, width: u32, height: u32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width as f32),
            y1: self.y1.clamp(0.0, height as f32),
            x2: self.x2.clamp(0.0, width as f32),
            y2: self.y2.clamp(0.0, height as f32),
        }
    }

    /// Calculate IoU (Intersection over Union) with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 < x1 || y2 < y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 { intersection / union } else { 0.0 }
    }
}

/// A detected layout region on one page.
///
/// `local_index` is 1-based and unique only within `(page_index, kind)`, in
/// the detector's emission order, not spatially sorted; consumers needing
/// reading order must re-sort on `bbox`. The globally unique identity of a
/// region is its [`RegionKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// 1-based page position within the document.
    pub page_index: u32,

    /// 1-based index within (page, kind), detector emission order.
    pub local_index: u32,

    /// Region kind.
    pub kind: RegionKind,

    /// Bounding box in page pixel coordinates.
    pub bbox: BoundingBox,

    /// Detection confidence score.
    pub confidence: f32,
}

impl Region {
    /// The globally unique key for this region.
    pub fn key(&self) -> RegionKey {
        RegionKey {
            page_index: self.page_index,
            kind: self.kind,
            local_index: self.local_index,
        }
    }
}

/// Globally unique region key: `(page_index, kind, local_index)`.
///
/// Two pages that each number a region "1" locally must never collide when
/// their results are merged into one document bundle, so the page index and
/// kind are part of the key. Serializes as its `"p{page}-{kind}-{index}"`
/// display form so it can key JSON maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionKey {
    pub page_index: u32,
    pub kind: RegionKind,
    pub local_index: u32,
}

impl RegionKey {
    pub fn new(page_index: u32, kind: RegionKind, local_index: u32) -> Self {
        Self {
            page_index,
            kind,
            local_index,
        }
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}-{}-{}", self.page_index, self.kind, self.local_index)
    }
}

impl std::str::FromStr for RegionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('p')
            .ok_or_else(|| format!("invalid region key: {}", s))?;
        let mut parts = rest.splitn(3, '-');

        let page_index = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| format!("invalid region key: {}", s))?;
        let kind = match parts.next() {
            Some("paragraph") => RegionKind::Paragraph,
            Some("table") => RegionKind::Table,
            _ => return Err(format!("invalid region key: {}", s)),
        };
        let local_index = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| format!("invalid region key: {}", s))?;

        Ok(Self {
            page_index,
            kind,
            local_index,
        })
    }
}

impl Serialize for RegionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RegionKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One recognized text fragment inside a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    /// Recognized text.
    pub text: String,

    /// Recognition confidence (0.0 - 1.0).
    pub confidence: f32,
}

/// All recognized text for one region. Empty is a valid result (blank crop
/// or nothing recognized), not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionText {
    /// Recognized fragments in band order (top to bottom within the crop).
    pub fragments: Vec<TextFragment>,
}

impl RegionText {
    /// Whether nothing was recognized.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// All fragment texts space-joined.
    pub fn joined(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
