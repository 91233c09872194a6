// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF module — page-image PDF output and inspection of imported PDFs.

pub mod reader;
pub mod writer;

pub use reader::PdfReader;
pub use writer::{PdfMetadata, PdfPageSource, PdfWriter};
