// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OCR handler. Tesseract runs as a delegate and reports hOCR on stdout; the
// optional `ocrs` backend runs in-process on the worker thread.

use std::process::Command;

use chrono::Utc;
use scanwerk_core::bbox::BboxTree;
use scanwerk_core::error::Result;
use scanwerk_core::types::{Page, PageRef};
use tracing::{info, instrument};

use super::{HandlerCtx, Outcome};
use crate::request::OcrBackend;

#[instrument(skip_all, fields(page = %page.id, language, backend = ?backend))]
pub fn recognise(
    ctx: &HandlerCtx<'_>,
    page: &Page,
    language: &str,
    backend: OcrBackend,
) -> Result<Outcome> {
    ctx.message(format!("Recognising text on page {}", page.id));
    let layer = match backend {
        OcrBackend::Tesseract => tesseract(ctx, page, language)?,
        OcrBackend::Ocrs => ocrs(page)?,
    };
    ctx.check_cancelled()?;

    let mut new = page.clone();
    new.text_layer = Some(layer);
    new.ocr_time = Some(Utc::now());
    new.saved = false;
    info!(words = new.export_text().split_whitespace().count(), "recognised page");
    ctx.emit_page(new, PageRef::Replace(page.id));
    Ok(Outcome::default())
}

fn tesseract(ctx: &HandlerCtx<'_>, page: &Page, language: &str) -> Result<BboxTree> {
    let dpi = page.resolution.to_ppi().x.round() as u32;
    let mut command = Command::new(&ctx.config.tools.tesseract);
    command
        .arg(&page.filename)
        .arg("stdout")
        .args(["-l", language])
        .args(["--dpi", &dpi.to_string()])
        .arg("hocr");
    let output = ctx.run(command)?;
    BboxTree::from_hocr(&output.stdout)
}

#[cfg(feature = "ocrs")]
fn ocrs(page: &Page) -> Result<BboxTree> {
    use once_cell::unsync::OnceCell;
    use scanwerk_document::{ImageProcessor, OcrEngine};

    thread_local! {
        static ENGINE: OnceCell<OcrEngine> = OnceCell::new();
    }

    let image = ImageProcessor::open(&page.filename)?;
    ENGINE.with(|cell| {
        let engine = cell.get_or_try_init(OcrEngine::with_defaults)?;
        engine.recognize(image.as_dynamic())
    })
}

#[cfg(not(feature = "ocrs"))]
fn ocrs(_page: &Page) -> Result<BboxTree> {
    Err(scanwerk_core::ScanwerkError::OcrError(
        "built without the ocrs feature; use the tesseract backend".into(),
    ))
}
