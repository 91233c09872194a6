// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// PDF writer — one page per scanned image, with the OCR text layer laid over
// it in invisible text, using `printpdf` 0.8.
//
// printpdf 0.8 uses a data-oriented API: documents are built by constructing
// `PdfPage` structs containing `Vec<Op>` operation lists, then serialised via
// `PdfDocument::save()`. Document metadata is stamped afterwards with `lopdf`.

use std::path::Path;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use lopdf::{Document, Object, dictionary};
use printpdf::{
    BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Point, Pt, RawImage,
    RawImageData, RawImageFormat, TextItem, TextRenderingMode, XObjectTransform,
};
use scanwerk_core::bbox::BboxTree;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::{POINTS_PER_INCH, Resolution};
use tracing::{debug, info, instrument};

/// Document information dictionary entries.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PdfMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub mod_date: Option<DateTime<Utc>>,
}

/// One page to be written: its pixels, resolution and optional text layer.
pub struct PdfPageSource<'a> {
    pub image: DynamicImage,
    pub resolution: Resolution,
    pub text_layer: Option<&'a BboxTree>,
}

/// Builds multi-page image PDFs.
pub struct PdfWriter {
    metadata: PdfMetadata,
    /// Resample page images down to this resolution if they exceed it.
    downsample_dpi: Option<f64>,
}

impl PdfWriter {
    pub fn new(metadata: PdfMetadata) -> Self {
        Self {
            metadata,
            downsample_dpi: None,
        }
    }

    pub fn with_downsample(mut self, dpi: Option<f64>) -> Self {
        self.downsample_dpi = dpi;
        self
    }

    // -- Pages ----------------------------------------------------------------

    /// Render all pages into PDF bytes.
    #[instrument(skip_all, fields(pages = pages.len()))]
    pub fn render(&self, pages: Vec<PdfPageSource<'_>>) -> Result<Vec<u8>> {
        let title = self.metadata.title.as_deref().unwrap_or("Scanwerk Document");
        let mut doc = PdfDocument::new(title);
        let mut pdf_pages = Vec::with_capacity(pages.len());

        for (index, source) in pages.into_iter().enumerate() {
            let res = source.resolution.to_ppi();
            let width_pt = source.image.width() as f64 / res.x * POINTS_PER_INCH;
            let height_pt = source.image.height() as f64 / res.y * POINTS_PER_INCH;

            let image = self.downsample(source.image, res);
            let embedded_dpi = image.width() as f64 / width_pt * POINTS_PER_INCH;
            let raw = to_raw_image(&image);
            let xobject_id = doc.add_image(&raw);

            let mut ops = vec![Op::UseXobject {
                id: xobject_id,
                transform: XObjectTransform {
                    translate_x: Some(Pt(0.0)),
                    translate_y: Some(Pt(0.0)),
                    scale_x: None,
                    // Non-square pixels: stretch vertically to the page height.
                    scale_y: Some((res.x / res.y) as f32),
                    dpi: Some(embedded_dpi as f32),
                    rotate: None,
                },
            }];
            if let Some(layer) = source.text_layer {
                ops.extend(text_layer_ops(layer, res, height_pt));
            }

            debug!(page = index + 1, width_pt, height_pt, embedded_dpi, "Page laid out");
            pdf_pages.push(PdfPage::new(
                Mm::from(Pt(width_pt as f32)),
                Mm::from(Pt(height_pt as f32)),
                ops,
            ));
        }

        doc.with_pages(pdf_pages);
        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        let bytes = doc.save(&PdfSaveOptions::default(), &mut warnings);
        if !warnings.is_empty() {
            debug!(warnings = warnings.len(), "printpdf reported warnings");
        }
        self.stamp_metadata(&bytes)
    }

    /// Render and write to `path`.
    pub fn write_to_file(&self, pages: Vec<PdfPageSource<'_>>, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.render(pages)?;
        std::fs::write(path.as_ref(), &bytes)?;
        info!(path = %path.as_ref().display(), bytes = bytes.len(), "Wrote PDF");
        Ok(())
    }

    fn downsample(&self, image: DynamicImage, res: Resolution) -> DynamicImage {
        match self.downsample_dpi {
            Some(target) if target > 0.0 && res.x > target => {
                let factor = target / res.x;
                let w = ((image.width() as f64 * factor).round() as u32).max(1);
                let h = ((image.height() as f64 * factor).round() as u32).max(1);
                debug!(from = res.x, to = target, "Downsampling page image");
                image.resize_exact(w, h, image::imageops::FilterType::Lanczos3)
            }
            _ => image,
        }
    }

    // -- Metadata -------------------------------------------------------------

    /// Replace the document information dictionary.
    fn stamp_metadata(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut doc = Document::load_mem(bytes)
            .map_err(|err| ScanwerkError::PdfError(format!("failed to reload PDF: {}", err)))?;

        let mut info = dictionary! {
            "Creator" => Object::string_literal(format!("scanwerk v{}", env!("CARGO_PKG_VERSION"))),
            "Producer" => Object::string_literal("printpdf"),
        };
        let text_fields = [
            ("Title", &self.metadata.title),
            ("Author", &self.metadata.author),
            ("Subject", &self.metadata.subject),
            ("Keywords", &self.metadata.keywords),
        ];
        for (key, value) in text_fields {
            if let Some(value) = value {
                info.set(key, Object::string_literal(value.as_str()));
            }
        }
        if let Some(date) = self.metadata.creation_date {
            info.set("CreationDate", Object::string_literal(pdf_date(date)));
        }
        if let Some(date) = self.metadata.mod_date {
            info.set("ModDate", Object::string_literal(pdf_date(date)));
        }

        let info_id = doc.add_object(info);
        doc.trailer.set("Info", info_id);

        let mut output = Vec::new();
        doc.save_to(&mut output)
            .map_err(|err| ScanwerkError::PdfError(format!("failed to serialise PDF: {}", err)))?;
        Ok(output)
    }
}

/// Invisible text operations positioning each box's text over its pixels.
fn text_layer_ops(layer: &BboxTree, res: Resolution, page_height_pt: f64) -> Vec<Op> {
    let mut ops = Vec::new();
    for bbox in layer.iter() {
        let Some(text) = bbox.text.as_deref().filter(|t| !t.is_empty()) else {
            continue;
        };
        let [x1, _, _, y2] = bbox.bbox;
        let x_pt = x1 as f64 / res.x * POINTS_PER_INCH;
        let y_pt = page_height_pt - y2 as f64 / res.y * POINTS_PER_INCH;
        let size_pt = (bbox.height() as f64 / res.y * POINTS_PER_INCH).max(1.0);

        ops.push(Op::StartTextSection);
        ops.push(Op::SetTextRenderingMode {
            mode: TextRenderingMode::Invisible,
        });
        ops.push(Op::SetFontSizeBuiltinFont {
            size: Pt(size_pt as f32),
            font: BuiltinFont::Helvetica,
        });
        ops.push(Op::SetTextCursor {
            pos: Point {
                x: Pt(x_pt as f32),
                y: Pt(y_pt as f32),
            },
        });
        ops.push(Op::WriteTextBuiltinFont {
            items: vec![TextItem::Text(text.to_string())],
            font: BuiltinFont::Helvetica,
        });
        ops.push(Op::EndTextSection);
    }
    ops
}

fn to_raw_image(image: &DynamicImage) -> RawImage {
    let rgb = image.to_rgb8();
    RawImage {
        width: rgb.width() as usize,
        height: rgb.height() as usize,
        pixels: RawImageData::U8(rgb.into_raw()),
        data_format: RawImageFormat::RGB8,
        tag: Vec::new(),
    }
}

/// PDF date string, `D:YYYYMMDDHHmmSS+00'00'`.
fn pdf_date(date: DateTime<Utc>) -> String {
    date.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::reader::PdfReader;
    use chrono::TimeZone;
    use image::{Rgb, RgbImage};

    fn page(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])))
    }

    #[test]
    fn one_pdf_page_per_image() {
        let layer = BboxTree::from_text("hello world", 300, 300);
        let pages = vec![
            PdfPageSource {
                image: page(300, 300),
                resolution: Resolution::ppi(300.0),
                text_layer: Some(&layer),
            },
            PdfPageSource {
                image: page(150, 300),
                resolution: Resolution::ppi(150.0),
                text_layer: None,
            },
        ];
        let bytes = PdfWriter::new(PdfMetadata::default()).render(pages).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert_eq!(PdfReader::from_bytes(&bytes).unwrap().page_count(), 2);
    }

    #[test]
    fn metadata_lands_in_info_dictionary() {
        let metadata = PdfMetadata {
            title: Some("Minutes".into()),
            author: Some("Clerk".into()),
            creation_date: Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
            ..PdfMetadata::default()
        };
        let pages = vec![PdfPageSource {
            image: page(10, 10),
            resolution: Resolution::default(),
            text_layer: None,
        }];
        let bytes = PdfWriter::new(metadata).render(pages).unwrap();
        let reader = PdfReader::from_bytes(&bytes).unwrap();
        assert_eq!(reader.info_string("Title").as_deref(), Some("Minutes"));
        assert_eq!(reader.info_string("Author").as_deref(), Some("Clerk"));
        assert_eq!(
            reader.info_string("CreationDate").as_deref(),
            Some("D:20260301120000+00'00'")
        );
    }

    #[test]
    fn page_size_follows_resolution() {
        let pages = vec![PdfPageSource {
            image: page(600, 300),
            resolution: Resolution::ppi(300.0),
            text_layer: None,
        }];
        let bytes = PdfWriter::new(PdfMetadata::default()).render(pages).unwrap();
        let sizes = PdfReader::from_bytes(&bytes).unwrap().page_sizes();
        let (w, h) = sizes[0].unwrap();
        assert!((w - 144.0).abs() < 0.5, "width {w}");
        assert!((h - 72.0).abs() < 0.5, "height {h}");
    }

    #[test]
    fn downsampling_shrinks_only_high_resolution_images() {
        let writer = PdfWriter::new(PdfMetadata::default()).with_downsample(Some(150.0));
        let shrunk = writer.downsample(page(600, 300), Resolution::ppi(300.0));
        assert_eq!((shrunk.width(), shrunk.height()), (300, 150));
        let kept = writer.downsample(page(100, 100), Resolution::ppi(100.0));
        assert_eq!(kept.width(), 100);
    }
}
