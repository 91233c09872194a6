// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Export handlers. They only read pages: progress is streamed while each page
// is written, and on success every exported page is reported as saved.

use std::path::{Path, PathBuf};
use std::process::Command;

use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use scanwerk_core::bbox::hocr_header;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::Page;
use scanwerk_document::text::{assemble_hocr, assemble_text};
use scanwerk_document::{ImageProcessor, PdfMetadata, PdfPageSource, PdfWriter};
use tracing::{debug, info, instrument};

use super::{HandlerCtx, Outcome, expand_placeholders, shell_quote};
use crate::request::{ExportTarget, TiffCompression};

/// `%d` or a zero-padded `%04d` in an image file name pattern.
static PAGE_NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"%(0?)(\d*)d").expect("valid regex"));

fn page_progress(ctx: &HandlerCtx<'_>, i: usize, total: usize) -> Result<()> {
    ctx.check_cancelled()?;
    ctx.progress(i as f64 / total as f64, format!("Saving page {} of {}", i + 1, total));
    Ok(())
}

fn dpi(page: &Page) -> String {
    format!("{}", page.resolution.to_ppi().x.round() as u32)
}

/// Run the target's post-save hook, if any, on the written file.
fn post_save_hook(ctx: &HandlerCtx<'_>, target: &ExportTarget, written: &Path) -> Result<()> {
    let Some(hook) = target.post_save_hook.as_deref() else {
        return Ok(());
    };
    let script = expand_placeholders(hook, &[('i', &shell_quote(&written.to_string_lossy()))]);
    debug!(script = %script, "running post-save hook");
    let output = ctx.run_shell(&script)?;
    if !output.stderr.trim().is_empty() {
        ctx.message(output.stderr.trim());
    }
    Ok(())
}

fn finish(ctx: &HandlerCtx<'_>, pages: &[Page], target: &ExportTarget) -> Result<Outcome> {
    post_save_hook(ctx, target, &target.path)?;
    info!(path = %target.path.display(), pages = pages.len(), "export complete");
    Ok(Outcome::saved(pages))
}

// -- PDF ----------------------------------------------------------------------

#[instrument(skip_all, fields(path = %target.path.display(), pages = pages.len()))]
pub fn save_pdf(
    ctx: &HandlerCtx<'_>,
    pages: &[Page],
    target: &ExportTarget,
    metadata: &PdfMetadata,
    downsample_dpi: Option<f64>,
) -> Result<Outcome> {
    let mut sources = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        page_progress(ctx, i, pages.len())?;
        sources.push(PdfPageSource {
            image: ImageProcessor::open(&page.filename)?.into_dynamic(),
            resolution: page.resolution,
            text_layer: page.text_layer.as_ref(),
        });
    }
    ctx.check_cancelled()?;
    PdfWriter::new(metadata.clone())
        .with_downsample(downsample_dpi.or(ctx.config.pdf_downsample_dpi))
        .write_to_file(sources, &target.path)?;
    finish(ctx, pages, target)
}

// -- DjVu ---------------------------------------------------------------------

#[instrument(skip_all, fields(path = %target.path.display(), pages = pages.len()))]
pub fn save_djvu(
    ctx: &HandlerCtx<'_>,
    pages: &[Page],
    target: &ExportTarget,
    metadata: &PdfMetadata,
) -> Result<Outcome> {
    let scratch = ctx.temp_dir()?;
    let mut encoded = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        page_progress(ctx, i, pages.len())?;
        let djvu = scratch.path().join(format!("page-{:04}.djvu", i + 1));
        encode_djvu_page(ctx, page, scratch.path(), &djvu)?;
        add_djvu_layers(ctx, page, scratch.path(), &djvu)?;
        encoded.push(djvu);
    }

    ctx.check_cancelled()?;
    let mut bundle = Command::new(&ctx.config.tools.djvm);
    bundle.arg("-c").arg(&target.path).args(&encoded);
    ctx.run(bundle)?;

    if let Some(meta) = djvu_metadata(metadata) {
        let meta_file = scratch.path().join("metadata.txt");
        std::fs::write(&meta_file, meta).map_err(|err| ScanwerkError::scratch(&meta_file, err))?;
        djvused(ctx, &target.path, &format!("set-meta {}", meta_file.display()))?;
    }
    finish(ctx, pages, target)
}

/// Bilevel pages go through `cjb2`, everything else through `c44`.
fn encode_djvu_page(ctx: &HandlerCtx<'_>, page: &Page, scratch: &Path, djvu: &Path) -> Result<()> {
    let image = ImageProcessor::open(&page.filename)?;
    let mut command;
    if image.is_bilevel() {
        let pbm = djvu.with_extension("pbm");
        std::fs::write(&pbm, image.to_pbm_bytes()).map_err(|err| ScanwerkError::scratch(scratch, err))?;
        command = Command::new(&ctx.config.tools.cjb2);
        command.args(["-dpi", &dpi(page)]).arg(&pbm).arg(djvu);
    } else {
        let ppm = djvu.with_extension("ppm");
        ImageProcessor::from_dynamic(DynamicImage::ImageRgb8(image.as_dynamic().to_rgb8())).save(&ppm)?;
        command = Command::new(&ctx.config.tools.c44);
        command.args(["-dpi", &dpi(page)]).arg(&ppm).arg(djvu);
    }
    ctx.run(command)?;
    Ok(())
}

fn add_djvu_layers(ctx: &HandlerCtx<'_>, page: &Page, scratch: &Path, djvu: &Path) -> Result<()> {
    let layers = [
        ("txt", page.text_layer.as_ref().map(|layer| layer.to_djvu_txt())),
        ("ant", page.annotations.as_ref().map(|layer| layer.to_djvu_ann())),
    ];
    for (kind, content) in layers {
        let Some(content) = content.filter(|c| !c.is_empty()) else {
            continue;
        };
        let file = djvu.with_extension(kind);
        std::fs::write(&file, content).map_err(|err| ScanwerkError::scratch(scratch, err))?;
        djvused(ctx, djvu, &format!("select 1; set-{kind} {}", file.display()))?;
    }
    Ok(())
}

fn djvused(ctx: &HandlerCtx<'_>, djvu: &Path, script: &str) -> Result<()> {
    let mut command = Command::new(&ctx.config.tools.djvused);
    command.arg(djvu).arg("-e").arg(script).arg("-s");
    ctx.run(command)?;
    Ok(())
}

/// `djvused` metadata file contents, or `None` if there is nothing to set.
fn djvu_metadata(metadata: &PdfMetadata) -> Option<String> {
    let quote = |s: &str| format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""));
    let mut lines = Vec::new();
    let text = [
        ("Title", &metadata.title),
        ("Author", &metadata.author),
        ("Subject", &metadata.subject),
        ("Keywords", &metadata.keywords),
    ];
    for (key, value) in text {
        if let Some(value) = value {
            lines.push(format!("{key}\t{}", quote(value)));
        }
    }
    let dates = [
        ("CreationDate", metadata.creation_date),
        ("ModDate", metadata.mod_date),
    ];
    for (key, value) in dates {
        if let Some(date) = value {
            lines.push(format!("{key}\t{}", quote(&date.format("%Y-%m-%d %H:%M:%S+00:00").to_string())));
        }
    }
    (!lines.is_empty()).then(|| lines.join("\n") + "\n")
}

// -- TIFF ---------------------------------------------------------------------

#[instrument(skip_all, fields(path = %target.path.display(), pages = pages.len(), compression = ?compression))]
pub fn save_tiff(
    ctx: &HandlerCtx<'_>,
    pages: &[Page],
    target: &ExportTarget,
    compression: TiffCompression,
) -> Result<Outcome> {
    let scratch = ctx.temp_dir()?;
    let mut singles = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        page_progress(ctx, i, pages.len())?;
        let image = ImageProcessor::open(&page.filename)?;
        // Drop alpha; grey stays grey.
        let flat = match image.as_dynamic().color().channel_count() {
            1 | 2 => DynamicImage::ImageLuma8(image.as_dynamic().to_luma8()),
            _ => DynamicImage::ImageRgb8(image.as_dynamic().to_rgb8()),
        };
        let single = scratch.path().join(format!("page-{:04}.tif", i + 1));
        ImageProcessor::from_dynamic(flat).save(&single)?;
        singles.push(single);
    }

    ctx.check_cancelled()?;
    if singles.len() == 1 && compression == TiffCompression::None {
        std::fs::copy(&singles[0], &target.path)?;
    } else {
        let mut command = Command::new(&ctx.config.tools.tiffcp);
        command
            .args(["-c", compression.tiffcp_arg()])
            .args(&singles)
            .arg(&target.path);
        ctx.run(command)?;
    }
    finish(ctx, pages, target)
}

// -- Images -------------------------------------------------------------------

/// File name for page `index` (1-based) of `count`.
///
/// A single page uses the pattern as is. Otherwise `%d`/`%0Nd` is replaced
/// by the index, or `-N` is added before the extension when the pattern has
/// no placeholder.
fn numbered_path(pattern: &Path, index: usize, count: usize) -> PathBuf {
    if count == 1 {
        return pattern.to_path_buf();
    }
    let text = pattern.to_string_lossy();
    if PAGE_NUMBER_RE.is_match(&text) {
        let replaced = PAGE_NUMBER_RE.replace(&text, |caps: &regex::Captures<'_>| {
            let width: usize = caps[2].parse().unwrap_or(0);
            if &caps[1] == "0" {
                format!("{index:0width$}")
            } else {
                format!("{index:width$}")
            }
        });
        return PathBuf::from(replaced.into_owned());
    }
    let stem = pattern
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match pattern.extension() {
        Some(ext) => format!("{stem}-{index}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{index}"),
    };
    pattern.with_file_name(name)
}

#[instrument(skip_all, fields(pattern = %target.path.display(), pages = pages.len()))]
pub fn save_image(ctx: &HandlerCtx<'_>, pages: &[Page], target: &ExportTarget) -> Result<Outcome> {
    let mut written = Vec::with_capacity(pages.len());
    for (i, page) in pages.iter().enumerate() {
        page_progress(ctx, i, pages.len())?;
        let path = numbered_path(&target.path, i + 1, pages.len());
        let suffix = scanwerk_core::types::suffix_of(&path).to_ascii_lowercase();
        if page.suffix().eq_ignore_ascii_case(&suffix) {
            std::fs::copy(&page.filename, &path)?;
        } else if suffix == ".jpg" || suffix == ".jpeg" {
            let bytes = ImageProcessor::open(&page.filename)?.to_jpeg_bytes(ctx.config.jpeg_quality)?;
            std::fs::write(&path, bytes)?;
        } else {
            ImageProcessor::open(&page.filename)?.save(&path)?;
        }
        written.push(path);
    }
    for path in &written {
        post_save_hook(ctx, target, path)?;
    }
    info!(files = written.len(), "images saved");
    Ok(Outcome::saved(pages))
}

// -- Text ---------------------------------------------------------------------

#[instrument(skip_all, fields(path = %target.path.display(), pages = pages.len()))]
pub fn save_text(ctx: &HandlerCtx<'_>, pages: &[Page], target: &ExportTarget) -> Result<Outcome> {
    ctx.progress(0.0, "Saving text");
    let text = assemble_text(pages.iter().map(|page| page.text_layer.as_ref()));
    std::fs::write(&target.path, text)?;
    finish(ctx, pages, target)
}

#[instrument(skip_all, fields(path = %target.path.display(), pages = pages.len()))]
pub fn save_hocr(ctx: &HandlerCtx<'_>, pages: &[Page], target: &ExportTarget) -> Result<Outcome> {
    ctx.progress(0.0, "Saving hOCR");
    let hocr = assemble_hocr(pages.iter().map(|page| page.text_layer.as_ref()))
        .unwrap_or_else(|| format!("{}\n</body>\n</html>\n", hocr_header()));
    std::fs::write(&target.path, hocr)?;
    finish(ctx, pages, target)
}
