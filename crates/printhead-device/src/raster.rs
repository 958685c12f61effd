// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Rasterizer: RGBA pixels to bit-packed monochrome rows at the head width.
//
// The default page pipeline is crop white borders -> scale to the print
// width -> threshold.  Trimming of trailing blank rows is applied by the
// caller, usually only on the last page of a job.

use image::{RgbaImage, imageops, imageops::FilterType};
use printhead_core::RasterImage;
use tracing::{debug, instrument};

/// Luminance below which a pixel is printed.
pub const INK_THRESHOLD: u32 = 128;

/// Luminance below which a pixel counts as content when cropping.
pub const CONTENT_THRESHOLD: u32 = 240;

/// Blank rows kept under the last inked row by default.
pub const DEFAULT_TRIM_MARGIN: usize = 16;

fn luminance(r: u8, g: u8, b: u8) -> u32 {
    (0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b)) as u32
}

/// Threshold an RGBA buffer (`width * height * 4` bytes, row-major) into
/// packed 1bpp rows of `ceil(width / 8)` bytes, MSB first.
///
/// Transparent pixels never print.  Missing trailing pixels are treated as
/// white.
pub fn to_monochrome(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let width = width as usize;
    let height = height as usize;
    let width_bytes = width.div_ceil(8);
    let mut out = vec![0u8; width_bytes * height];

    for y in 0..height {
        for x in 0..width {
            let offset = (y * width + x) * 4;
            let Some(px) = pixels.get(offset..offset + 4) else {
                continue;
            };
            if px[3] > 0 && luminance(px[0], px[1], px[2]) < INK_THRESHOLD {
                out[y * width_bytes + x / 8] |= 0x80 >> (x % 8);
            }
        }
    }
    out
}

/// Slice-level form of [`RasterImage::trimmed`].
///
/// A trailing partial row, or a zero width, leaves `data` untouched.
pub fn trim_trailing_white_rows(data: &[u8], width_bytes: usize, margin_rows: usize) -> Vec<u8> {
    match RasterImage::new(width_bytes, data.to_vec()) {
        Ok(raster) => raster.trimmed(margin_rows).into_data(),
        Err(_) => data.to_vec(),
    }
}

/// Crop to the bounding box of pixels darker than the content threshold.
///
/// A fully white (or fully transparent) image is returned unchanged.
#[instrument(skip_all, fields(width = image.width(), height = image.height()))]
pub fn crop_white_borders(image: RgbaImage) -> RgbaImage {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, px) in image.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        if a == 0 || luminance(r, g, b) >= CONTENT_THRESHOLD {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }

    let Some((x0, y0, x1, y1)) = bounds else {
        return image;
    };
    let (w, h) = (x1 - x0 + 1, y1 - y0 + 1);
    if w == image.width() && h == image.height() {
        return image;
    }
    debug!(x0, y0, w, h, "cropped white borders");
    imageops::crop_imm(&image, x0, y0, w, h).to_image()
}

/// Resize to `target_width`, preserving aspect ratio.
#[instrument(skip_all, fields(from = image.width(), to = target_width))]
pub fn scale_to_width(image: RgbaImage, target_width: u32) -> RgbaImage {
    if image.width() == target_width || image.width() == 0 || target_width == 0 {
        return image;
    }
    let ratio = f64::from(target_width) / f64::from(image.width());
    let height = ((f64::from(image.height()) * ratio) as u32).max(1);
    imageops::resize(&image, target_width, height, FilterType::Triangle)
}

/// Run the full page pipeline: crop, scale, threshold.
#[instrument(skip_all, fields(width = image.width(), height = image.height()))]
pub fn rasterize_page(image: RgbaImage, print_width_px: u32) -> RasterImage {
    let scaled = scale_to_width(crop_white_borders(image), print_width_px);
    let width_bytes = (scaled.width() as usize).div_ceil(8);
    let data = to_monochrome(scaled.as_raw(), scaled.width(), scaled.height());
    // to_monochrome always yields whole rows
    RasterImage::new(width_bytes, data).unwrap_or_else(|_| RasterImage::blank(width_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use printhead_core::{PRINT_WIDTH_BYTES, PRINT_WIDTH_PX};

    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    #[test]
    fn monochrome_length_rounds_width_up() {
        for (w, h) in [(1, 1), (7, 3), (8, 2), (9, 5), (576, 4)] {
            let pixels = vec![255u8; (w * h * 4) as usize];
            let out = to_monochrome(&pixels, w, h);
            assert_eq!(out.len(), (w as usize).div_ceil(8) * h as usize);
        }
    }

    #[test]
    fn monochrome_packs_msb_first() {
        let mut img = RgbaImage::from_pixel(10, 1, WHITE);
        img.put_pixel(0, 0, BLACK);
        img.put_pixel(9, 0, BLACK);
        assert_eq!(to_monochrome(img.as_raw(), 10, 1), [0x80, 0x40]);
    }

    #[test]
    fn transparent_and_light_pixels_do_not_print() {
        let img = RgbaImage::from_fn(3, 1, |x, _| match x {
            0 => Rgba([0, 0, 0, 0]),
            1 => Rgba([200, 200, 200, 255]),
            _ => Rgba([60, 60, 60, 255]),
        });
        assert_eq!(to_monochrome(img.as_raw(), 3, 1), [0b0010_0000]);
    }

    #[test]
    fn trim_is_idempotent() {
        let mut data = vec![0u8; PRINT_WIDTH_BYTES * 100];
        data[PRINT_WIDTH_BYTES * 10 + 3] = 0xFF;
        let once = trim_trailing_white_rows(&data, PRINT_WIDTH_BYTES, DEFAULT_TRIM_MARGIN);
        let twice = trim_trailing_white_rows(&once, PRINT_WIDTH_BYTES, DEFAULT_TRIM_MARGIN);
        assert_eq!(once.len(), PRINT_WIDTH_BYTES * 27);
        assert_eq!(once, twice);
    }

    #[test]
    fn blank_bitmap_trims_to_one_zero_row() {
        let img = RgbaImage::from_pixel(PRINT_WIDTH_PX, 50, Rgba([0, 0, 0, 0]));
        let mono = to_monochrome(img.as_raw(), PRINT_WIDTH_PX, 50);
        let trimmed = trim_trailing_white_rows(&mono, PRINT_WIDTH_BYTES, DEFAULT_TRIM_MARGIN);
        assert_eq!(trimmed, vec![0u8; PRINT_WIDTH_BYTES]);
    }

    #[test]
    fn crop_finds_content_box() {
        let mut img = RgbaImage::from_pixel(20, 20, WHITE);
        img.put_pixel(5, 6, BLACK);
        img.put_pixel(9, 12, BLACK);
        let cropped = crop_white_borders(img);
        assert_eq!(cropped.dimensions(), (5, 7));
    }

    #[test]
    fn crop_leaves_white_image_alone() {
        let img = RgbaImage::from_pixel(20, 10, Rgba([250, 250, 250, 255]));
        assert_eq!(crop_white_borders(img).dimensions(), (20, 10));
    }

    #[test]
    fn scale_preserves_aspect() {
        let img = RgbaImage::from_pixel(288, 100, WHITE);
        assert_eq!(scale_to_width(img, 576).dimensions(), (576, 200));
        let same = RgbaImage::from_pixel(576, 33, WHITE);
        assert_eq!(scale_to_width(same, 576).dimensions(), (576, 33));
    }

    #[test]
    fn rasterized_page_is_head_width() {
        let mut img = RgbaImage::from_pixel(100, 100, WHITE);
        for x in 10..90 {
            img.put_pixel(x, 50, BLACK);
        }
        let raster = rasterize_page(img, PRINT_WIDTH_PX);
        assert_eq!(raster.width_bytes(), PRINT_WIDTH_BYTES);
        assert!(raster.data().iter().any(|&b| b != 0));
    }
}
