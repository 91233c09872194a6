// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Import handler: turn image, TIFF and PDF files into session pages.
//
// Single images are copied into the session directory as they are.
// Multi-page TIFFs are split with `tiffcp`; PDF page images are extracted
// with `pdfimages` and given the resolution implied by the page size.

use std::path::{Path, PathBuf};
use std::process::Command;

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{POINTS_PER_INCH, Page, PageRef, Resolution, suffix_of};
use scanwerk_document::PdfReader;
use tracing::{debug, info, instrument, warn};

use super::{HandlerCtx, Outcome};
use crate::process::find_executable;

/// Kinds of input file recognised by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Pdf,
    Tiff,
    Image,
}

fn input_kind(path: &Path) -> Result<InputKind> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => Ok(InputKind::Pdf),
        "tif" | "tiff" => Ok(InputKind::Tiff),
        "png" | "jpg" | "jpeg" | "pnm" | "pbm" | "pgm" | "ppm" | "bmp" | "gif" | "webp" => {
            Ok(InputKind::Image)
        }
        _ => Err(ScanwerkError::UnsupportedFormat(path.display().to_string())),
    }
}

/// Emits imported pages so they keep their file order.
struct Placer {
    next: PageRef,
}

impl Placer {
    fn place(&mut self, ctx: &HandlerCtx<'_>, page: Page) {
        let id = page.id;
        ctx.emit_page(page, self.next);
        if !matches!(self.next, PageRef::Append) {
            self.next = PageRef::InsertAfter(id);
        }
    }
}

#[instrument(skip_all, fields(files = paths.len()))]
pub fn import_files(ctx: &HandlerCtx<'_>, paths: &[PathBuf], placement: PageRef) -> Result<Outcome> {
    let mut placer = Placer { next: placement };
    let total = paths.len() as f64;
    for (i, path) in paths.iter().enumerate() {
        ctx.check_cancelled()?;
        if !path.is_file() {
            return Err(ScanwerkError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            )));
        }
        ctx.progress(i as f64 / total, format!("Importing {}", path.display()));
        match input_kind(path)? {
            InputKind::Image => placer.place(ctx, import_image(ctx, path, Resolution::default())?),
            InputKind::Tiff => import_tiff(ctx, path, &mut placer)?,
            InputKind::Pdf => import_pdf(ctx, path, &mut placer)?,
        }
    }
    Ok(Outcome::default())
}

/// Copy `path` into the session and describe it as a page.
fn import_image(ctx: &HandlerCtx<'_>, path: &Path, resolution: Resolution) -> Result<Page> {
    let (width, height) = image::image_dimensions(path).map_err(|err| {
        ScanwerkError::UnsupportedFormat(format!("{}: {err}", path.display()))
    })?;
    let copy = ctx.temp_file(&suffix_of(path))?;
    std::fs::copy(path, &copy).map_err(|err| ScanwerkError::scratch(&copy, err))?;
    debug!(source = %path.display(), width, height, "imported image");
    Ok(Page::new(copy, width, height, resolution))
}

/// Number of images in a TIFF, as listed by `tiffinfo`.
fn tiff_page_count(ctx: &HandlerCtx<'_>, path: &Path) -> Result<usize> {
    if find_executable(&ctx.config.tools.tiffinfo).is_none() {
        debug!("tiffinfo unavailable, reading first page only");
        return Ok(1);
    }
    let mut command = Command::new(&ctx.config.tools.tiffinfo);
    command.arg(path);
    let output = ctx.run(command)?;
    Ok(count_tiff_directories(&output.stdout).max(1))
}

fn count_tiff_directories(tiffinfo: &str) -> usize {
    tiffinfo
        .lines()
        .filter(|line| line.starts_with("TIFF Directory at offset"))
        .count()
}

fn import_tiff(ctx: &HandlerCtx<'_>, path: &Path, placer: &mut Placer) -> Result<()> {
    let pages = tiff_page_count(ctx, path)?;
    if pages == 1 {
        placer.place(ctx, import_image(ctx, path, Resolution::default())?);
        return Ok(());
    }
    info!(pages, "splitting multi-page TIFF");
    for i in 0..pages {
        ctx.check_cancelled()?;
        ctx.message(format!("Extracting page {} of {}", i + 1, pages));
        let single = ctx.temp_file(".tif")?;
        let mut command = Command::new(&ctx.config.tools.tiffcp);
        command
            .arg(format!("{},{i}", path.display()))
            .arg(&single);
        ctx.run(command)?;
        let (width, height) = image::image_dimensions(&single)
            .map_err(|err| ScanwerkError::ImageError(format!("tiffcp output unreadable: {err}")))?;
        placer.place(ctx, Page::new(single, width, height, Resolution::default()));
    }
    Ok(())
}

fn import_pdf(ctx: &HandlerCtx<'_>, path: &Path, placer: &mut Placer) -> Result<()> {
    let reader = PdfReader::open(path)?;
    let sizes = reader.page_sizes();
    info!(pages = sizes.len(), "extracting PDF page images");

    let scratch = ctx.temp_dir()?;
    let prefix = scratch.path().join("page");
    let mut command = Command::new(&ctx.config.tools.pdfimages);
    command.arg("-png").arg(path).arg(&prefix);
    ctx.run(command)?;

    let mut images: Vec<PathBuf> = std::fs::read_dir(scratch.path())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    images.sort();
    if images.len() != sizes.len() {
        warn!(
            images = images.len(),
            pages = sizes.len(),
            "PDF does not hold exactly one image per page"
        );
    }

    for (i, image_path) in images.iter().enumerate() {
        ctx.check_cancelled()?;
        let (width, height) = image::image_dimensions(image_path)
            .map_err(|err| ScanwerkError::ImageError(format!("pdfimages output unreadable: {err}")))?;
        let resolution = sizes
            .get(i)
            .copied()
            .flatten()
            .map(|(w_pt, h_pt)| Resolution {
                x: width as f64 / (w_pt / POINTS_PER_INCH),
                y: height as f64 / (h_pt / POINTS_PER_INCH),
                ..Resolution::default()
            })
            .unwrap_or_default();
        placer.place(ctx, import_image(ctx, image_path, resolution)?);
    }
    Ok(())
}
