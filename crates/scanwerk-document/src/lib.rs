// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-document — In-process page image and document work for Scanwerk.
//
// Provides pixel operations on page images (rotate, crop, split, threshold,
// brightness/contrast, negate, unsharp, statistics), image-PDF output with an
// invisible OCR text layer, multi-page text/hOCR assembly, and optional
// in-process OCR.

pub mod image;
pub mod pdf;
pub mod text;

#[cfg(feature = "ocrs")]
pub mod ocr;

pub use crate::image::processor::{ChannelStats, ImageProcessor, SplitDirection, clamp_region};
pub use crate::pdf::reader::PdfReader;
pub use crate::pdf::writer::{PdfMetadata, PdfPageSource, PdfWriter};

#[cfg(feature = "ocrs")]
pub use ocr::OcrEngine;
