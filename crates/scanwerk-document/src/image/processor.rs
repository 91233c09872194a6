// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor — rotate, crop, split, threshold, brightness/contrast,
// negate, unsharp mask and channel statistics. Operates on in-memory images
// using the `image` and `imageproc` crates.

use std::path::Path;

use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use imageproc::geometric_transformations::{self, Interpolation};
use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, info, instrument};

/// Per-channel statistics of an image.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    pub mean: Vec<f64>,
    pub std_dev: Vec<f64>,
}

/// Direction of a page split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SplitDirection {
    /// Cut along a vertical line into left and right halves.
    Vertical,
    /// Cut along a horizontal line into top and bottom halves.
    Horizontal,
}

/// Image processing pipeline operating on a single in-memory image.
///
/// Each transformation consumes `self` and returns a new `ImageProcessor`
/// wrapping the transformed image, enabling method chaining.
///
/// ```ignore
/// ImageProcessor::open("scan.png")?
///     .rotate(90.0)
///     .threshold(60.0)
///     .save("out.png")?;
/// ```
pub struct ImageProcessor {
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Load an image from a file path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let img = image::open(path.as_ref()).map_err(|err| {
            ScanwerkError::ImageError(format!(
                "failed to open {}: {}",
                path.as_ref().display(),
                err
            ))
        })?;
        debug!(width = img.width(), height = img.height(), "Image loaded");
        Ok(Self { image: img })
    }

    /// Create a processor from raw encoded bytes (JPEG, PNG, etc.).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(data)
            .map_err(|err| ScanwerkError::ImageError(format!("failed to decode image: {}", err)))?;
        Ok(Self { image: img })
    }

    /// Wrap an already-decoded `DynamicImage`.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    /// Whether the image is bilevel (only pure black and white pixels).
    pub fn is_bilevel(&self) -> bool {
        self.image
            .to_luma8()
            .pixels()
            .all(|p| p.0[0] == 0 || p.0[0] == 255)
    }

    /// Mean and standard deviation of every channel.
    #[instrument(skip(self))]
    pub fn channel_stats(&self) -> ChannelStats {
        let channels = self.image.color().channel_count() as usize;
        let mut sum = vec![0f64; channels];
        let mut sum_sq = vec![0f64; channels];
        let pixels = (self.image.width() as f64 * self.image.height() as f64).max(1.0);

        match channels {
            1 | 2 => {
                for p in self.image.to_luma_alpha8().pixels() {
                    for (c, v) in p.0.iter().take(channels).enumerate() {
                        sum[c] += *v as f64;
                        sum_sq[c] += (*v as f64).powi(2);
                    }
                }
            }
            _ => {
                for (_, _, p) in self.image.pixels() {
                    for (c, v) in p.0.iter().take(channels).enumerate() {
                        sum[c] += *v as f64;
                        sum_sq[c] += (*v as f64).powi(2);
                    }
                }
            }
        }

        let mean: Vec<f64> = sum.iter().map(|s| s / pixels).collect();
        let std_dev = sum_sq
            .iter()
            .zip(&mean)
            .map(|(sq, m)| (sq / pixels - m * m).max(0.0).sqrt())
            .collect();
        debug!(?mean, "Channel statistics computed");
        ChannelStats { mean, std_dev }
    }

    // -- Transformations (consume self, return new Self) -----------------------

    /// Rotate clockwise by `degrees`, growing the canvas to hold the result.
    ///
    /// Quarter turns are lossless. Other angles use bilinear interpolation
    /// with a white background.
    #[instrument(skip(self), fields(degrees))]
    pub fn rotate(self, degrees: f32) -> Self {
        info!(degrees, "Rotating image");

        let normalised = degrees.rem_euclid(360.0);
        if (normalised - 90.0).abs() < 0.01 {
            return Self {
                image: self.image.rotate90(),
            };
        }
        if (normalised - 180.0).abs() < 0.01 {
            return Self {
                image: self.image.rotate180(),
            };
        }
        if (normalised - 270.0).abs() < 0.01 {
            return Self {
                image: self.image.rotate270(),
            };
        }
        if normalised.abs() < 0.01 || (normalised - 360.0).abs() < 0.01 {
            return self;
        }

        let radians = degrees.to_radians();
        let (w, h) = (self.image.width() as f32, self.image.height() as f32);
        let new_w = (w * radians.cos().abs() + h * radians.sin().abs()).ceil() as u32;
        let new_h = (w * radians.sin().abs() + h * radians.cos().abs()).ceil() as u32;
        let white = Rgba([255u8, 255, 255, 255]);

        let mut canvas = RgbaImage::from_pixel(new_w, new_h, white);
        let offset_x = ((new_w as f32 - w) / 2.0).round() as i64;
        let offset_y = ((new_h as f32 - h) / 2.0).round() as i64;
        image::imageops::overlay(&mut canvas, &self.image.to_rgba8(), offset_x, offset_y);

        let rotated = geometric_transformations::rotate_about_center(
            &canvas,
            radians,
            Interpolation::Bilinear,
            white,
        );
        debug!(new_w, new_h, "General rotation applied");
        Self {
            image: DynamicImage::ImageRgba8(rotated),
        }
    }

    /// Crop a rectangular region from the image.
    ///
    /// `x` and `y` are the top-left corner; values are clamped to image bounds.
    #[instrument(skip(self), fields(x, y, width, height))]
    pub fn crop(self, x: u32, y: u32, width: u32, height: u32) -> Self {
        let (safe_x, safe_y, safe_w, safe_h) =
            clamp_region(self.image.width(), self.image.height(), x, y, width, height);

        info!(safe_x, safe_y, safe_w, safe_h, "Cropping image");
        Self {
            image: self.image.crop_imm(safe_x, safe_y, safe_w, safe_h),
        }
    }

    /// Cut the image in two at `position` pixels from the left (vertical) or
    /// top (horizontal) edge.
    #[instrument(skip(self))]
    pub fn split(self, direction: SplitDirection, position: u32) -> Result<(Self, Self)> {
        let (w, h) = (self.image.width(), self.image.height());
        let limit = match direction {
            SplitDirection::Vertical => w,
            SplitDirection::Horizontal => h,
        };
        if position == 0 || position >= limit {
            return Err(ScanwerkError::InvalidRequest(format!(
                "split position {position} outside 1..{limit}"
            )));
        }
        let (first, second) = match direction {
            SplitDirection::Vertical => (
                self.image.crop_imm(0, 0, position, h),
                self.image.crop_imm(position, 0, w - position, h),
            ),
            SplitDirection::Horizontal => (
                self.image.crop_imm(0, 0, w, position),
                self.image.crop_imm(0, position, w, h - position),
            ),
        };
        Ok((Self { image: first }, Self { image: second }))
    }

    /// Convert the image to grayscale (luma).
    pub fn grayscale(self) -> Self {
        Self {
            image: self.image.grayscale(),
        }
    }

    /// Binarise: pixels brighter than `percent` of full scale become white,
    /// everything else black.
    #[instrument(skip(self), fields(percent))]
    pub fn threshold(self, percent: f32) -> Self {
        let level = (percent.clamp(0.0, 100.0) / 100.0 * 255.0).round() as u8;
        info!(level, "Thresholding image");
        let mut luma = self.image.to_luma8();
        for p in luma.pixels_mut() {
            p.0[0] = if p.0[0] > level { 255 } else { 0 };
        }
        Self {
            image: DynamicImage::ImageLuma8(luma),
        }
    }

    /// Scale brightness then contrast by the given enhancement factors.
    ///
    /// A factor of 1.0 leaves the image unchanged; contrast is stretched
    /// around the mean grey level.
    #[instrument(skip(self), fields(brightness, contrast))]
    pub fn brightness_contrast(self, brightness: f32, contrast: f32) -> Self {
        info!(brightness, contrast, "Adjusting brightness and contrast");
        let mut rgba = self.image.to_rgba8();
        for p in rgba.pixels_mut() {
            for c in p.0.iter_mut().take(3) {
                *c = (*c as f32 * brightness).round().clamp(0.0, 255.0) as u8;
            }
        }

        let luma = DynamicImage::ImageRgba8(rgba.clone()).to_luma8();
        let count = luma.pixels().len().max(1) as f64;
        let mean = (luma.pixels().map(|p| p.0[0] as f64).sum::<f64>() / count).round() as f32;
        for p in rgba.pixels_mut() {
            for c in p.0.iter_mut().take(3) {
                *c = (mean + contrast * (*c as f32 - mean)).round().clamp(0.0, 255.0) as u8;
            }
        }
        Self {
            image: DynamicImage::ImageRgba8(rgba),
        }
    }

    /// Invert every colour channel.
    #[instrument(skip(self))]
    pub fn negate(mut self) -> Self {
        info!("Inverting image");
        self.image.invert();
        self
    }

    /// Unsharp mask: add back `percent` of the difference from a Gaussian
    /// blur of the given radius, where that difference exceeds `threshold`.
    #[instrument(skip(self), fields(radius, percent, threshold))]
    pub fn unsharp(self, radius: f32, percent: f32, threshold: u8) -> Self {
        info!(radius, percent, threshold, "Applying unsharp mask");
        let original = self.image.to_rgba8();
        let blurred = self.image.blur(radius.max(0.1)).to_rgba8();
        let amount = percent / 100.0;
        let sharpened = RgbaImage::from_fn(original.width(), original.height(), |x, y| {
            let o = original.get_pixel(x, y);
            let b = blurred.get_pixel(x, y);
            let mut out = *o;
            for c in 0..3 {
                let diff = o.0[c] as f32 - b.0[c] as f32;
                if diff.abs() >= threshold as f32 {
                    out.0[c] = (o.0[c] as f32 + diff * amount).round().clamp(0.0, 255.0) as u8;
                }
            }
            out
        });
        Self {
            image: DynamicImage::ImageRgba8(sharpened),
        }
    }

    // -- Output ---------------------------------------------------------------

    /// Encode the current image as JPEG bytes with the given quality (1-100).
    pub fn to_jpeg_bytes(&self, quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let rgb = self.image.to_rgb8();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
        rgb.write_with_encoder(encoder)
            .map_err(|err| ScanwerkError::ImageError(format!("JPEG encoding failed: {}", err)))?;
        Ok(buffer)
    }

    /// Encode as a raw (P4) PBM bitmap. Pixels darker than mid-grey are black.
    pub fn to_pbm_bytes(&self) -> Vec<u8> {
        let luma = self.image.to_luma8();
        let (w, h) = luma.dimensions();
        let row_bytes = (w as usize).div_ceil(8);
        let mut out = format!("P4\n{w} {h}\n").into_bytes();
        out.reserve(row_bytes * h as usize);
        for y in 0..h {
            let mut row = vec![0u8; row_bytes];
            for x in 0..w {
                if luma.get_pixel(x, y).0[0] < 128 {
                    row[x as usize / 8] |= 0x80 >> (x % 8);
                }
            }
            out.extend_from_slice(&row);
        }
        out
    }

    /// Write the image to a file. The format is inferred from the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        // JPEG has no alpha channel.
        let result = match ImageFormat::from_path(path) {
            Ok(ImageFormat::Jpeg) => DynamicImage::ImageRgb8(self.image.to_rgb8()).save(path),
            _ => self.image.save(path),
        };
        result.map_err(|err| {
            ScanwerkError::ImageError(format!(
                "failed to save image to {}: {}",
                path.display(),
                err
            ))
        })
    }
}

/// The part of the region at `(x, y)` sized `width` x `height` that lies
/// on an `image_width` x `image_height` image, as `(x, y, width, height)`.
pub fn clamp_region(image_width: u32, image_height: u32, x: u32, y: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let x = x.min(image_width.saturating_sub(1));
    let y = y.min(image_height.saturating_sub(1));
    (x, y, width.min(image_width - x), height.min(image_height - y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn gradient(width: u32, height: u32) -> ImageProcessor {
        let img = GrayImage::from_fn(width, height, |x, _| Luma([(x * 255 / width.max(1)) as u8]));
        ImageProcessor::from_dynamic(DynamicImage::ImageLuma8(img))
    }

    #[test]
    fn regions_are_clamped_to_the_image() {
        assert_eq!(clamp_region(40, 20, 5, 5, 10, 10), (5, 5, 10, 10));
        assert_eq!(clamp_region(40, 20, 30, 5, 30, 30), (30, 5, 10, 15));
        assert_eq!(clamp_region(40, 20, 50, 0, 10, 20), (39, 0, 1, 20));
    }

    #[test]
    fn pbm_packs_black_pixels_msb_first() {
        let img = GrayImage::from_fn(9, 1, |x, _| Luma([if x == 0 || x == 8 { 0 } else { 255 }]));
        let pbm = ImageProcessor::from_dynamic(DynamicImage::ImageLuma8(img)).to_pbm_bytes();
        let header = b"P4\n9 1\n";
        assert_eq!(&pbm[..header.len()], header);
        assert_eq!(&pbm[header.len()..], &[0x80, 0x80]);
    }

    #[test]
    fn quarter_turn_swaps_dimensions() {
        let rotated = gradient(200, 100).rotate(90.0);
        assert_eq!((rotated.width(), rotated.height()), (100, 200));
        let half = gradient(200, 100).rotate(180.0);
        assert_eq!((half.width(), half.height()), (200, 100));
    }

    #[test]
    fn arbitrary_rotation_expands_canvas() {
        let rotated = gradient(100, 100).rotate(45.0);
        assert!(rotated.width() >= 141 && rotated.height() >= 141);
    }

    #[test]
    fn vertical_split_partitions_width() {
        let (left, right) = gradient(200, 100)
            .split(SplitDirection::Vertical, 100)
            .unwrap();
        assert_eq!((left.width(), left.height()), (100, 100));
        assert_eq!((right.width(), right.height()), (100, 100));
    }

    #[test]
    fn horizontal_split_partitions_height() {
        let (top, bottom) = gradient(50, 100)
            .split(SplitDirection::Horizontal, 30)
            .unwrap();
        assert_eq!(top.height(), 30);
        assert_eq!(bottom.height(), 70);
    }

    #[test]
    fn split_at_edge_is_rejected() {
        assert!(gradient(10, 10).split(SplitDirection::Vertical, 10).is_err());
        assert!(gradient(10, 10).split(SplitDirection::Horizontal, 0).is_err());
    }

    #[test]
    fn threshold_yields_bilevel_image() {
        let result = gradient(256, 4).threshold(50.0);
        assert!(result.is_bilevel());
        let luma = result.as_dynamic().to_luma8();
        assert_eq!(luma.get_pixel(0, 0).0[0], 0);
        assert_eq!(luma.get_pixel(255, 0).0[0], 255);
    }

    #[test]
    fn negate_inverts_pixels() {
        let img = RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]));
        let result = ImageProcessor::from_dynamic(DynamicImage::ImageRgb8(img)).negate();
        assert_eq!(result.as_dynamic().to_rgb8().get_pixel(0, 0).0, [245, 235, 225]);
    }

    #[test]
    fn unit_factors_leave_image_unchanged() {
        let img = RgbImage::from_fn(4, 4, |x, y| Rgb([(x * 40) as u8, (y * 40) as u8, 100]));
        let before = img.clone();
        let result = ImageProcessor::from_dynamic(DynamicImage::ImageRgb8(img))
            .brightness_contrast(1.0, 1.0);
        assert_eq!(result.as_dynamic().to_rgb8(), before);
    }

    #[test]
    fn flat_image_is_unchanged_by_unsharp() {
        let img = RgbImage::from_pixel(8, 8, Rgb([90, 90, 90]));
        let result = ImageProcessor::from_dynamic(DynamicImage::ImageRgb8(img)).unsharp(1.0, 150.0, 2);
        assert!(result.as_dynamic().to_rgb8().pixels().all(|p| p.0 == [90, 90, 90]));
    }

    #[test]
    fn stats_of_uniform_image() {
        let img = RgbImage::from_pixel(3, 3, Rgb([10, 20, 30]));
        let stats = ImageProcessor::from_dynamic(DynamicImage::ImageRgb8(img)).channel_stats();
        assert_eq!(stats.mean, vec![10.0, 20.0, 30.0]);
        assert!(stats.std_dev.iter().all(|s| *s < 1e-9));
    }

    #[test]
    fn save_and_reopen_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        gradient(20, 10).save(&path).unwrap();
        let reopened = ImageProcessor::open(&path).unwrap();
        assert_eq!((reopened.width(), reopened.height()), (20, 10));
    }
}
