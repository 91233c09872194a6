// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk page engine.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bbox::BboxTree;

/// Points per inch, the PDF user-space unit.
pub const POINTS_PER_INCH: f64 = 72.0;

/// Centimetres per inch.
pub const CM_PER_INCH: f64 = 2.54;

/// Stable identity of a page, independent of its position or page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Units in which an image resolution is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionUnit {
    PixelsPerInch,
    PixelsPerCentimeter,
}

/// Horizontal and vertical resolution of a page image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
    pub unit: ResolutionUnit,
}

impl Resolution {
    /// Same resolution on both axes, in pixels per inch.
    pub fn ppi(value: f64) -> Self {
        Self {
            x: value,
            y: value,
            unit: ResolutionUnit::PixelsPerInch,
        }
    }

    /// Resolution in pixels per inch, converting if necessary.
    pub fn to_ppi(self) -> Self {
        match self.unit {
            ResolutionUnit::PixelsPerInch => self,
            ResolutionUnit::PixelsPerCentimeter => Self {
                x: self.x * CM_PER_INCH,
                y: self.y * CM_PER_INCH,
                unit: ResolutionUnit::PixelsPerInch,
            },
        }
    }

    /// Exchange the x and y axes (after a quarter-turn rotation).
    pub fn swapped(self) -> Self {
        Self {
            x: self.y,
            y: self.x,
            unit: self.unit,
        }
    }

    /// Unit keyword understood by ImageMagick-style tools.
    pub fn unit_keyword(&self) -> &'static str {
        match self.unit {
            ResolutionUnit::PixelsPerInch => "PixelsPerInch",
            ResolutionUnit::PixelsPerCentimeter => "PixelsPerCentimeter",
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::ppi(POINTS_PER_INCH)
    }
}

/// One scanned page: its backing image plus everything known about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    /// Image file in the session directory backing this page.
    pub filename: PathBuf,
    pub width: u32,
    pub height: u32,
    pub resolution: Resolution,
    /// OCR text layer.
    pub text_layer: Option<BboxTree>,
    /// Annotation layer.
    pub annotations: Option<BboxTree>,
    /// When the pixels last changed.
    pub dirty_time: DateTime<Utc>,
    pub analyse_time: Option<DateTime<Utc>>,
    pub ocr_time: Option<DateTime<Utc>>,
    /// Whether the current pixels have been exported since they last changed.
    pub saved: bool,
    /// Per-channel mean, filled in by the analyse handler.
    pub mean: Option<Vec<f64>>,
    /// Per-channel standard deviation, filled in by the analyse handler.
    pub std_dev: Option<Vec<f64>>,
}

impl Page {
    /// Create a page with a fresh identity.
    pub fn new(filename: impl Into<PathBuf>, width: u32, height: u32, resolution: Resolution) -> Self {
        Self {
            id: PageId::new(),
            filename: filename.into(),
            width,
            height,
            resolution,
            text_layer: None,
            annotations: None,
            dirty_time: Utc::now(),
            analyse_time: None,
            ocr_time: None,
            saved: false,
            mean: None,
            std_dev: None,
        }
    }

    /// Copy of this page backed by a new file, keeping the identity.
    ///
    /// The dirty-time is refreshed and the saved flag cleared.
    pub fn derive(&self, filename: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        let mut page = self.clone();
        page.filename = filename.into();
        page.width = width;
        page.height = height;
        page.touch();
        page
    }

    /// Flag the page as modified.
    pub fn touch(&mut self) {
        self.dirty_time = Utc::now();
        self.saved = false;
    }

    /// Whether the backing image still exists on disk.
    pub fn file_exists(&self) -> bool {
        self.filename.is_file()
    }

    /// Extension of the backing file, including the dot, if any.
    pub fn suffix(&self) -> String {
        suffix_of(&self.filename)
    }

    /// Whether analysis results are newer than the last pixel change.
    pub fn is_analysed(&self) -> bool {
        matches!(self.analyse_time, Some(t) if t >= self.dirty_time)
    }

    /// Plain text of the OCR layer, empty if none.
    pub fn export_text(&self) -> String {
        self.text_layer
            .as_ref()
            .map(BboxTree::to_text)
            .unwrap_or_default()
    }

    /// Page size in PDF points, derived from pixel size and resolution.
    pub fn size_in_points(&self) -> (f64, f64) {
        let res = self.resolution.to_ppi();
        (
            self.width as f64 / res.x * POINTS_PER_INCH,
            self.height as f64 / res.y * POINTS_PER_INCH,
        )
    }
}

/// File suffix (".png") of a path, or ".png" when it has none.
pub fn suffix_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_else(|| ".png".to_string())
}

/// Where a new page goes in the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageRef {
    /// Append at the end, numbered one past the current count.
    Append,
    /// Swap in place of the page with this identity, keeping its number.
    Replace(PageId),
    /// Splice in directly after the page with this identity.
    InsertAfter(PageId),
}

/// Which pages an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selection {
    All,
    Selected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_keeps_identity_and_clears_saved() {
        let mut page = Page::new("/tmp/a.png", 100, 50, Resolution::ppi(300.0));
        page.saved = true;
        let derived = page.derive("/tmp/b.png", 50, 100);
        assert_eq!(derived.id, page.id);
        assert!(!derived.saved);
        assert!(derived.dirty_time >= page.dirty_time);
        assert_eq!(derived.filename, PathBuf::from("/tmp/b.png"));
    }

    #[test]
    fn centimetre_resolution_converts_to_ppi() {
        let res = Resolution {
            x: 100.0,
            y: 50.0,
            unit: ResolutionUnit::PixelsPerCentimeter,
        }
        .to_ppi();
        assert!((res.x - 254.0).abs() < 1e-9);
        assert!((res.y - 127.0).abs() < 1e-9);
    }

    #[test]
    fn size_in_points_uses_resolution() {
        let page = Page::new("/tmp/a.png", 600, 300, Resolution::ppi(300.0));
        assert_eq!(page.size_in_points(), (144.0, 72.0));
    }

    #[test]
    fn suffix_defaults_to_png() {
        assert_eq!(suffix_of(Path::new("/tmp/scan")), ".png");
        assert_eq!(suffix_of(Path::new("/tmp/scan.tif")), ".tif");
    }

    #[test]
    fn analysis_goes_stale_after_touch() {
        let mut page = Page::new("/tmp/a.png", 1, 1, Resolution::default());
        page.analyse_time = Some(Utc::now());
        assert!(page.is_analysed());
        std::thread::sleep(std::time::Duration::from_millis(2));
        page.touch();
        assert!(!page.is_analysed());
    }
}
