// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Requests sent to the worker and the responses it sends back.

use std::path::PathBuf;

use scanwerk_core::error::{ErrorKind, Result, ScanwerkError};
use scanwerk_core::types::{Page, PageId, PageRef};
use scanwerk_document::{PdfMetadata, SplitDirection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation token tying responses to the request that caused them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which OCR engine recognises a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OcrBackend {
    /// The `tesseract` command, producing hOCR.
    #[default]
    Tesseract,
    /// The in-process `ocrs` engine. Requires the `ocrs` feature.
    Ocrs,
}

/// Compression applied by `tiffcp` when writing a TIFF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TiffCompression {
    #[default]
    None,
    Lzw,
    Packbits,
    Deflate,
    Jpeg,
}

impl TiffCompression {
    /// Argument to `tiffcp -c`.
    pub fn tiffcp_arg(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lzw => "lzw",
            Self::Packbits => "packbits",
            Self::Deflate => "zip",
            Self::Jpeg => "jpeg",
        }
    }
}

/// Destination of an export, plus the command to run once it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTarget {
    pub path: PathBuf,
    /// Shell command run after a successful save; `%i` is replaced by the
    /// written file.
    pub post_save_hook: Option<String>,
}

impl ExportTarget {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            post_save_hook: None,
        }
    }

    pub fn with_hook(mut self, hook: impl Into<String>) -> Self {
        self.post_save_hook = Some(hook.into());
        self
    }
}

/// One operation, with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    Import {
        paths: Vec<PathBuf>,
        /// `Append`, or `InsertAfter` an existing page.
        placement: PageRef,
    },
    Rotate {
        page: PageId,
        /// Clockwise, in degrees.
        angle: i32,
    },
    Crop {
        page: PageId,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    Split {
        page: PageId,
        direction: SplitDirection,
        position: u32,
    },
    Threshold {
        page: PageId,
        /// 0-100.
        percent: f32,
    },
    BrightnessContrast {
        page: PageId,
        brightness: f32,
        contrast: f32,
    },
    Negate {
        page: PageId,
    },
    Unsharp {
        page: PageId,
        radius: f32,
        percent: f32,
        threshold: u8,
    },
    Analyse {
        pages: Vec<PageId>,
    },
    Ocr {
        page: PageId,
        language: String,
        backend: OcrBackend,
    },
    UserDefined {
        page: PageId,
        /// Shell command; `%i` input, `%o` output, `%r` resolution.
        command: String,
    },
    SavePdf {
        pages: Vec<PageId>,
        target: ExportTarget,
        metadata: PdfMetadata,
        downsample_dpi: Option<f64>,
    },
    SaveDjvu {
        pages: Vec<PageId>,
        target: ExportTarget,
        metadata: PdfMetadata,
    },
    SaveTiff {
        pages: Vec<PageId>,
        target: ExportTarget,
        compression: TiffCompression,
    },
    SaveImage {
        pages: Vec<PageId>,
        /// With several pages, `%d` (or `%0Nd`) is replaced by the 1-based
        /// page index.
        target: ExportTarget,
    },
    SaveText {
        pages: Vec<PageId>,
        target: ExportTarget,
    },
    SaveHocr {
        pages: Vec<PageId>,
        target: ExportTarget,
    },
    /// Acknowledges a cancellation and clears the cancellation flag.
    Cancel,
}

impl Action {
    /// Verb used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Import { .. } => "import",
            Self::Rotate { .. } => "rotate",
            Self::Crop { .. } => "crop",
            Self::Split { .. } => "split",
            Self::Threshold { .. } => "threshold",
            Self::BrightnessContrast { .. } => "brightness-contrast",
            Self::Negate { .. } => "negate",
            Self::Unsharp { .. } => "unsharp",
            Self::Analyse { .. } => "analyse",
            Self::Ocr { .. } => "ocr",
            Self::UserDefined { .. } => "user-defined",
            Self::SavePdf { .. } => "save-pdf",
            Self::SaveDjvu { .. } => "save-djvu",
            Self::SaveTiff { .. } => "save-tiff",
            Self::SaveImage { .. } => "save-image",
            Self::SaveText { .. } => "save-text",
            Self::SaveHocr { .. } => "save-hocr",
            Self::Cancel => "cancel",
        }
    }

    /// Identities of every page the action reads.
    pub fn pages(&self) -> Vec<PageId> {
        match self {
            Self::Import { .. } | Self::Cancel => Vec::new(),
            Self::Rotate { page, .. }
            | Self::Crop { page, .. }
            | Self::Split { page, .. }
            | Self::Threshold { page, .. }
            | Self::BrightnessContrast { page, .. }
            | Self::Negate { page }
            | Self::Unsharp { page, .. }
            | Self::Ocr { page, .. }
            | Self::UserDefined { page, .. } => vec![*page],
            Self::Analyse { pages }
            | Self::SavePdf { pages, .. }
            | Self::SaveDjvu { pages, .. }
            | Self::SaveTiff { pages, .. }
            | Self::SaveImage { pages, .. }
            | Self::SaveText { pages, .. }
            | Self::SaveHocr { pages, .. } => pages.clone(),
        }
    }

    /// Whether the action writes a file outside the session.
    pub fn is_export(&self) -> bool {
        matches!(
            self,
            Self::SavePdf { .. }
                | Self::SaveDjvu { .. }
                | Self::SaveTiff { .. }
                | Self::SaveImage { .. }
                | Self::SaveText { .. }
                | Self::SaveHocr { .. }
        )
    }

    /// Reject parameters no handler could act on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ScanwerkError::InvalidRequest(format!("{}: {msg}", self.name())));
        match self {
            Self::Import { paths, placement } => {
                if paths.is_empty() {
                    return invalid("no files given".into());
                }
                if matches!(placement, PageRef::Replace(_)) {
                    return invalid("imported pages cannot replace an existing page".into());
                }
            }
            Self::Crop { width, height, .. } if *width == 0 || *height == 0 => {
                return invalid(format!("empty region {width}x{height}"));
            }
            Self::Split { position: 0, .. } => return invalid("split position must be positive".into()),
            Self::Threshold { percent, .. } if !(0.0..=100.0).contains(percent) => {
                return invalid(format!("threshold {percent} outside 0-100"));
            }
            Self::BrightnessContrast {
                brightness,
                contrast,
                ..
            } if *brightness < 0.0 || *contrast < 0.0 => {
                return invalid("enhancement factors must not be negative".into());
            }
            Self::Unsharp { radius, percent, .. } if *radius <= 0.0 || *percent < 0.0 => {
                return invalid(format!("radius {radius}, percent {percent}"));
            }
            Self::Ocr { language, .. } if language.trim().is_empty() => {
                return invalid("no language given".into());
            }
            Self::UserDefined { command, .. } if command.trim().is_empty() => {
                return invalid("empty command".into());
            }
            Self::Analyse { pages } if pages.is_empty() => return invalid("no pages given".into()),
            _ => {}
        }
        if self.is_export() {
            if self.pages().is_empty() {
                return invalid("no pages given".into());
            }
            if let Self::SavePdf {
                downsample_dpi: Some(dpi),
                ..
            } = self
                && *dpi <= 0.0
            {
                return invalid(format!("downsample resolution {dpi}"));
            }
        }
        Ok(())
    }
}

/// A tagged request on its way to the worker.
#[derive(Debug, Clone)]
pub struct Request {
    pub token: RequestId,
    pub action: Action,
}

/// What a response reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    /// Accepted onto the queue.
    Queued,
    /// The worker picked the request up.
    Started,
    /// Progress, 0.0 to 1.0, with an optional message.
    Running {
        progress: Option<f64>,
        message: Option<String>,
    },
    /// A new or replacement page to splice into the collection. `sequence`
    /// counts pages emitted by the worker and is acknowledged back once the
    /// page has been applied.
    Page {
        page: Box<Page>,
        placement: PageRef,
        sequence: u64,
    },
    Error {
        page: Option<PageId>,
        action: &'static str,
        message: String,
        kind: ErrorKind,
    },
    /// Terminal success. `saved` lists the pages an export wrote.
    Finished { saved: Vec<PageId> },
    Cancelled,
}

impl ResponseKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Finished { .. } | Self::Cancelled)
    }
}

/// A response on its way back to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub token: RequestId,
    pub kind: ResponseKind,
}

impl Response {
    pub fn new(token: RequestId, kind: ResponseKind) -> Self {
        Self { token, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_arguments_are_listed() {
        let page = PageId::new();
        let other = PageId::new();
        assert_eq!(Action::Negate { page }.pages(), vec![page]);
        let save = Action::SaveText {
            pages: vec![page, other],
            target: ExportTarget::new("/tmp/out.txt"),
        };
        assert_eq!(save.pages(), vec![page, other]);
        assert!(Action::Cancel.pages().is_empty());
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        let page = PageId::new();
        assert!(Action::Threshold { page, percent: 150.0 }.validate().is_err());
        assert!(Action::Threshold { page, percent: 60.0 }.validate().is_ok());
        assert!(Action::Crop {
            page,
            x: 0,
            y: 0,
            width: 0,
            height: 10
        }
        .validate()
        .is_err());
        assert!(Action::Import {
            paths: vec![],
            placement: PageRef::Append
        }
        .validate()
        .is_err());
        assert!(Action::SavePdf {
            pages: vec![],
            target: ExportTarget::new("/tmp/out.pdf"),
            metadata: PdfMetadata::default(),
            downsample_dpi: None,
        }
        .validate()
        .is_err());
    }

    #[test]
    fn invalid_request_message_names_the_action() {
        let err = Action::UserDefined {
            page: PageId::new(),
            command: "  ".into(),
        }
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("user-defined"));
    }

    #[test]
    fn only_outcomes_are_terminal() {
        assert!(ResponseKind::Cancelled.is_terminal());
        assert!(ResponseKind::Finished { saved: vec![] }.is_terminal());
        assert!(!ResponseKind::Started.is_terminal());
        assert!(!ResponseKind::Running {
            progress: Some(0.5),
            message: None
        }
        .is_terminal());
    }

    #[test]
    fn tiff_compression_maps_to_tiffcp_names() {
        assert_eq!(TiffCompression::Deflate.tiffcp_arg(), "zip");
        assert_eq!(TiffCompression::default().tiffcp_arg(), "none");
    }
}
