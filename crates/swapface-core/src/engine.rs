//! Face swap: align the target face, run the swap model on the crop, and
//! composite the result back into the full frame.
//!
//! Compositing uses a soft mask: the crop footprint is thresholded, eroded
//! by a tenth of the face size and Gaussian-blurred by a twentieth of it, so
//! the swapped face fades into the original skin instead of leaving a seam.
//! Pixels outside the footprint are never touched.

use crate::alignment::{self, Affine};
use crate::raster::{ChannelOrder, Image, CHANNELS};
use crate::registry::{ModelRegistry, NotReady};
use crate::swapper::SwapperError;
use crate::types::FaceDescriptor;
use image::{GrayImage, Luma};
use std::sync::Arc;
use thiserror::Error;

/// Warped-mask values at or below this are treated as outside the face.
const MASK_THRESHOLD: u8 = 20;

#[derive(Error, Debug)]
pub enum SwapError {
    #[error(transparent)]
    ModelNotReady(#[from] NotReady),
    #[error("face alignment transform is degenerate")]
    DegenerateAlignment,
    #[error("swap model: {0}")]
    Model(#[from] SwapperError),
}

/// Renders a source identity onto a target face.
pub struct FaceSwapEngine {
    registry: Arc<ModelRegistry>,
}

impl FaceSwapEngine {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Replace `target_face` in `target` with the identity of `source_face`.
    ///
    /// The result has the target's dimensions and channel order.
    pub fn swap(
        &self,
        target: &Image,
        target_face: &FaceDescriptor,
        source_face: &FaceDescriptor,
    ) -> Result<Image, SwapError> {
        let (swapped, matrix) = self.registry.with_swapper(|model| {
            let size = model.crop_size();
            let (crop, matrix) = alignment::norm_crop(target, &target_face.landmarks, size);
            let swapped = model.swap_crop(&crop, &source_face.embedding)?;
            if swapped.dimensions() != (size, size) {
                return Err(SwapperError::CropSize {
                    expected: size,
                    width: swapped.width(),
                    height: swapped.height(),
                });
            }
            Ok((swapped, matrix))
        })??;

        paste_back(target, &swapped, &matrix)
    }
}

/// Target-image rectangle that compositing is confined to.
#[derive(Debug, Clone, Copy)]
struct Roi {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// Blend `fake` (a crop produced under `matrix`, target → crop) into `target`.
fn paste_back(target: &Image, fake: &Image, matrix: &Affine) -> Result<Image, SwapError> {
    let inverse = alignment::invert(matrix).ok_or(SwapError::DegenerateAlignment)?;
    let (tw, th) = target.dimensions();
    let (fw, fh) = fake.dimensions();

    let corners = [(0.0, 0.0), (fw as f32, 0.0), (0.0, fh as f32), (fw as f32, fh as f32)]
        .map(|(x, y)| alignment::apply(&inverse, x, y));
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
    let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
    let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);

    // Room for the blur to spread past the eroded edge.
    let footprint = ((max_x - min_x) * (max_y - min_y)).max(0.0).sqrt();
    let margin = (footprint / 20.0).max(5.0).ceil() + 2.0;
    let x0 = (min_x - margin).floor().max(0.0) as u32;
    let y0 = (min_y - margin).floor().max(0.0) as u32;
    let x1 = (max_x + margin).ceil().min(tw as f32) as u32;
    let y1 = (max_y + margin).ceil().min(th as f32) as u32;
    if x0 >= x1 || y0 >= y1 {
        return Ok(target.clone());
    }
    let roi = Roi { x: x0, y: y0, width: x1 - x0, height: y1 - y0 };

    let fake = fake.with_order(ChannelOrder::Rgb);
    let mut mask = GrayImage::new(roi.width, roi.height);
    let mut colors = vec![[0.0f32; CHANNELS]; roi.width as usize * roi.height as usize];
    for ry in 0..roi.height {
        for rx in 0..roi.width {
            let (cx, cy) = alignment::apply(matrix, (roi.x + rx) as f32, (roi.y + ry) as f32);
            let cover = coverage(fw, fh, cx, cy);
            let value = (cover * 255.0).round() as u8;
            mask.put_pixel(rx, ry, Luma([if value > MASK_THRESHOLD { 255 } else { 0 }]));
            if cover > 0.0 {
                colors[(ry * roi.width + rx) as usize] = alignment::sample_bilinear(&fake, cx, cy);
            }
        }
    }

    let Some(mask_size) = mask_extent(&mask) else {
        return Ok(target.clone());
    };
    erode(&mut mask, (mask_size / 10).max(10), roi, (tw, th));

    let ksize = 2 * (mask_size / 20).max(5) + 1;
    let sigma = 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let mask = image::imageops::blur(&mask, sigma);

    let mut out = target.clone();
    for ry in 0..roi.height {
        for rx in 0..roi.width {
            let alpha = mask.get_pixel(rx, ry)[0] as f32 / 255.0;
            if alpha <= 0.0 {
                continue;
            }
            let (x, y) = (roi.x + rx, roi.y + ry);
            let base = target.rgb_at(x, y);
            let fake_px = colors[(ry * roi.width + rx) as usize];
            let mut px = [0u8; 3];
            for c in 0..3 {
                px[c] = (alpha * fake_px[c] + (1.0 - alpha) * base[c] as f32)
                    .round()
                    .clamp(0.0, 255.0) as u8;
            }
            out.put_rgb(x, y, px);
        }
    }

    tracing::debug!(mask_size, roi = ?roi, "pasted swapped face");
    Ok(out)
}

/// Fraction of a bilinear tap at (`sx`, `sy`) that lands inside a `w × h` crop.
fn coverage(w: u32, h: u32, sx: f32, sy: f32) -> f32 {
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = sx - x0;
    let fy = sy - y0;
    let inside = |x: f32, y: f32| x >= 0.0 && y >= 0.0 && x < w as f32 && y < h as f32;

    let mut total = 0.0;
    for (x, y, weight) in [
        (x0, y0, (1.0 - fx) * (1.0 - fy)),
        (x0 + 1.0, y0, fx * (1.0 - fy)),
        (x0, y0 + 1.0, (1.0 - fx) * fy),
        (x0 + 1.0, y0 + 1.0, fx * fy),
    ] {
        if inside(x, y) {
            total += weight;
        }
    }
    total
}

/// `sqrt(rows × cols)` of the span covered by set mask pixels.
fn mask_extent(mask: &GrayImage) -> Option<u32> {
    let mut rows = (u32::MAX, 0u32);
    let mut cols = (u32::MAX, 0u32);
    for (x, y, px) in mask.enumerate_pixels() {
        if px[0] == 255 {
            rows = (rows.0.min(y), rows.1.max(y));
            cols = (cols.0.min(x), cols.1.max(x));
        }
    }
    if rows.0 == u32::MAX {
        return None;
    }
    let span = ((rows.1 - rows.0) as f64 * (cols.1 - cols.0) as f64).sqrt();
    Some(span as u32)
}

/// Binary erosion with a `k × k` square, done as a row pass then a column pass.
///
/// Pixels beyond the ROI but inside the image count as unset. Pixels beyond
/// the image itself never erode anything.
fn erode(mask: &mut GrayImage, k: u32, roi: Roi, image: (u32, u32)) {
    let (w, h) = (roi.width as usize, roi.height as usize);
    let unset_left = roi.x > 0;
    let unset_right = roi.x + roi.width < image.0;
    let unset_top = roi.y > 0;
    let unset_bottom = roi.y + roi.height < image.1;

    let mut line = Vec::with_capacity(w.max(h));
    for y in 0..h {
        line.clear();
        line.extend((0..w).map(|x| mask.get_pixel(x as u32, y as u32)[0]));
        for (x, v) in erode_line(&line, k as usize, unset_left, unset_right).into_iter().enumerate() {
            mask.put_pixel(x as u32, y as u32, Luma([v]));
        }
    }
    for x in 0..w {
        line.clear();
        line.extend((0..h).map(|y| mask.get_pixel(x as u32, y as u32)[0]));
        for (y, v) in erode_line(&line, k as usize, unset_top, unset_bottom).into_iter().enumerate() {
            mask.put_pixel(x as u32, y as u32, Luma([v]));
        }
    }
}

/// Erode one line of a binary mask. The window for index `i` spans
/// `i - k/2 ..= i - k/2 + k - 1`.
fn erode_line(line: &[u8], k: usize, unset_before: bool, unset_after: bool) -> Vec<u8> {
    let n = line.len() as isize;
    let mut zeros = Vec::with_capacity(line.len() + 1);
    zeros.push(0usize);
    for &v in line {
        let last = zeros[zeros.len() - 1];
        zeros.push(last + usize::from(v != 255));
    }

    let anchor = (k / 2) as isize;
    (0..n)
        .map(|i| {
            let lo = i - anchor;
            let hi = lo + k as isize - 1;
            if (lo < 0 && unset_before) || (hi >= n && unset_after) {
                return 0;
            }
            let (lo, hi) = (lo.max(0) as usize, hi.min(n - 1) as usize);
            if zeros[hi + 1] - zeros[lo] == 0 {
                255
            } else {
                0
            }
        })
        .collect()
}
