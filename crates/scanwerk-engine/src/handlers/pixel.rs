// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pixel handlers: load the page image, transform it in-process, write the
// result to a fresh session file and send it back as a replacement.

use chrono::Utc;
use scanwerk_core::bbox::BboxTree;
use scanwerk_core::error::Result;
use scanwerk_core::types::{Page, PageId, PageRef};
use scanwerk_document::{ImageProcessor, SplitDirection, clamp_region};
use tracing::{debug, info, instrument};

use super::{HandlerCtx, Outcome};

/// Extensions the in-process encoder writes back unchanged.
const WRITABLE_SUFFIXES: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".tif", ".tiff", ".pnm", ".pbm", ".pgm", ".ppm", ".bmp",
];

fn working_suffix(page: &Page) -> String {
    let suffix = page.suffix().to_ascii_lowercase();
    if WRITABLE_SUFFIXES.contains(&suffix.as_str()) {
        suffix
    } else {
        ".png".into()
    }
}

/// Save `image` to a new session file and derive a page from it.
fn write_page(ctx: &HandlerCtx<'_>, page: &Page, image: &ImageProcessor) -> Result<Page> {
    ctx.check_cancelled()?;
    let path = ctx.temp_file(&working_suffix(page))?;
    image.save(&path)?;
    debug!(path = %path.display(), "wrote page image");
    Ok(page.derive(path, image.width(), image.height()))
}

/// Shared template for transforms that keep the geometry.
fn transform(
    ctx: &HandlerCtx<'_>,
    page: &Page,
    op: impl FnOnce(ImageProcessor) -> ImageProcessor,
) -> Result<Outcome> {
    let image = op(ImageProcessor::open(&page.filename)?);
    let new = write_page(ctx, page, &image)?;
    ctx.emit_page(new, PageRef::Replace(page.id));
    Ok(Outcome::default())
}

#[instrument(skip_all, fields(page = %page.id, angle))]
pub fn rotate(ctx: &HandlerCtx<'_>, page: &Page, angle: i32) -> Result<Outcome> {
    let image = ImageProcessor::open(&page.filename)?.rotate(angle as f32);
    let mut new = write_page(ctx, page, &image)?;

    let normalised = angle.rem_euclid(360);
    let (w, h) = (page.width as i64, page.height as i64);
    if normalised % 90 == 0 {
        if normalised % 180 == 90 {
            new.resolution = page.resolution.swapped();
        }
        new.text_layer = page.text_layer.as_ref().map(|layer| layer.rotate(angle, w, h));
        new.annotations = page.annotations.as_ref().map(|layer| layer.rotate(angle, w, h));
    } else {
        // Boxes cannot follow an arbitrary rotation.
        new.text_layer = None;
        new.annotations = None;
    }
    info!(width = new.width, height = new.height, "rotated page");
    ctx.emit_page(new, PageRef::Replace(page.id));
    Ok(Outcome::default())
}

#[instrument(skip_all, fields(page = %page.id, x, y, width, height))]
pub fn crop(ctx: &HandlerCtx<'_>, page: &Page, x: u32, y: u32, width: u32, height: u32) -> Result<Outcome> {
    let image = ImageProcessor::open(&page.filename)?;
    // Layers must follow the region the image was actually cut to.
    let (x, y, width, height) = clamp_region(image.width(), image.height(), x, y, width, height);
    let image = image.crop(x, y, width, height);
    let mut new = write_page(ctx, page, &image)?;
    let (x, y, w, h) = (i64::from(x), i64::from(y), i64::from(width), i64::from(height));
    new.text_layer = page.text_layer.as_ref().map(|layer| layer.crop(x, y, w, h));
    new.annotations = page.annotations.as_ref().map(|layer| layer.crop(x, y, w, h));
    ctx.emit_page(new, PageRef::Replace(page.id));
    Ok(Outcome::default())
}

/// Cut a page in two. The first part replaces the page; the second is a new
/// page inserted after it.
#[instrument(skip_all, fields(page = %page.id, direction = ?direction, position))]
pub fn split(
    ctx: &HandlerCtx<'_>,
    page: &Page,
    direction: SplitDirection,
    position: u32,
) -> Result<Outcome> {
    let (first_image, second_image) = ImageProcessor::open(&page.filename)?.split(direction, position)?;
    let mut first = write_page(ctx, page, &first_image)?;
    let mut second = write_page(ctx, page, &second_image)?;
    second.id = PageId::new();

    let (w, h) = (page.width as i64, page.height as i64);
    let pos = position as i64;
    let (first_rect, second_rect) = match direction {
        SplitDirection::Vertical => ([0, 0, pos, h], [pos, 0, w - pos, h]),
        SplitDirection::Horizontal => ([0, 0, w, pos], [0, pos, w, h - pos]),
    };
    let part = |layer: &Option<BboxTree>, [x, y, w, h]: [i64; 4]| {
        layer.as_ref().map(|layer| layer.crop(x, y, w, h))
    };
    first.text_layer = part(&page.text_layer, first_rect);
    first.annotations = part(&page.annotations, first_rect);
    second.text_layer = part(&page.text_layer, second_rect);
    second.annotations = part(&page.annotations, second_rect);

    info!(new_page = %second.id, "split page");
    ctx.emit_page(first, PageRef::Replace(page.id));
    ctx.emit_page(second, PageRef::InsertAfter(page.id));
    Ok(Outcome::default())
}

#[instrument(skip_all, fields(page = %page.id, percent))]
pub fn threshold(ctx: &HandlerCtx<'_>, page: &Page, percent: f32) -> Result<Outcome> {
    transform(ctx, page, |image| image.threshold(percent))
}

#[instrument(skip_all, fields(page = %page.id, brightness, contrast))]
pub fn brightness_contrast(
    ctx: &HandlerCtx<'_>,
    page: &Page,
    brightness: f32,
    contrast: f32,
) -> Result<Outcome> {
    transform(ctx, page, |image| image.brightness_contrast(brightness, contrast))
}

#[instrument(skip_all, fields(page = %page.id))]
pub fn negate(ctx: &HandlerCtx<'_>, page: &Page) -> Result<Outcome> {
    transform(ctx, page, ImageProcessor::negate)
}

#[instrument(skip_all, fields(page = %page.id, radius, percent, threshold))]
pub fn unsharp(
    ctx: &HandlerCtx<'_>,
    page: &Page,
    radius: f32,
    percent: f32,
    threshold: u8,
) -> Result<Outcome> {
    transform(ctx, page, |image| image.unsharp(radius, percent, threshold))
}

/// Fill in channel statistics for pages whose analysis is stale.
#[instrument(skip_all, fields(pages = pages.len()))]
pub fn analyse(ctx: &HandlerCtx<'_>, pages: &[Page]) -> Result<Outcome> {
    let total = pages.len() as f64;
    for (i, page) in pages.iter().enumerate() {
        ctx.check_cancelled()?;
        if page.is_analysed() {
            debug!(page = %page.id, "analysis up to date");
            continue;
        }
        ctx.progress(i as f64 / total, format!("Analysing page {} of {}", i + 1, pages.len()));
        let stats = ImageProcessor::open(&page.filename)?.channel_stats();
        let mut new = page.clone();
        new.mean = Some(stats.mean);
        new.std_dev = Some(stats.std_dev);
        new.analyse_time = Some(Utc::now());
        ctx.emit_page(new, PageRef::Replace(page.id));
    }
    Ok(Outcome::default())
}
