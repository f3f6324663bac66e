//! Landmark alignment onto the InsightFace five-point templates.
//!
//! The transforms estimated here serve both the recognizer crop and the
//! swap engine, whose paste-back inverts them.

use crate::raster::{Image, CHANNELS};
use crate::types::Landmarks;

/// Five-point template (eyes, nose tip, mouth corners) in a 112 px crop.
const REFERENCE_LANDMARKS_112: Landmarks = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ARCFACE_ALIGNED_SIZE: u32 = 112;

/// Row-major 2×3 affine matrix `[a, b, tx, c, d, ty]` mapping source to destination:
/// ```text
/// | a  b  tx |
/// | c  d  ty |
/// ```
pub type Affine = [f32; 6];

/// Reference landmarks for a square crop of `size` pixels.
///
/// Multiples of 112 scale the ArcFace template directly. Other sizes scale
/// by `size / 128` and shift x by `8 * ratio` (the 128-px inswapper layout).
pub fn reference_landmarks(size: u32) -> Landmarks {
    let (ratio, diff_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };
    REFERENCE_LANDMARKS_112.map(|(x, y)| (x * ratio + diff_x, y * ratio))
}

/// Least-squares similarity (uniform scale, rotation, translation) taking
/// `src` onto `dst`.
///
/// Solved in closed form on centroid-relative coordinates. The result is
/// `[a, -b, tx, b, a, ty]`. Coincident source points yield a singular matrix
/// that collapses everything onto the destination centroid.
pub fn estimate_similarity_transform(src: &Landmarks, dst: &Landmarks) -> Affine {
    let n = src.len() as f32;
    let centroid = |pts: &Landmarks| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (scx, scy) = centroid(src);
    let (dcx, dcy) = centroid(dst);

    let (mut dot, mut cross, mut norm) = (0.0f32, 0.0f32, 0.0f32);
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
        let (px, py) = (sx - scx, sy - scy);
        let (qx, qy) = (dx - dcx, dy - dcy);
        dot += px * qx + py * qy;
        cross += px * qy - py * qx;
        norm += px * px + py * py;
    }

    if norm < 1e-12 {
        return [0.0, 0.0, dcx, 0.0, 0.0, dcy];
    }
    let (a, b) = (dot / norm, cross / norm);
    let tx = dcx - (a * scx - b * scy);
    let ty = dcy - (b * scx + a * scy);
    [a, -b, tx, b, a, ty]
}

/// Map a point through an affine matrix.
pub fn apply(m: &Affine, x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
}

/// Invert a 2×3 affine matrix. `None` when the linear part is singular.
pub fn invert(m: &Affine) -> Option<Affine> {
    let det = m[0] * m[4] - m[1] * m[3];
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let a = m[4] * inv_det;
    let b = -m[1] * inv_det;
    let c = -m[3] * inv_det;
    let d = m[0] * inv_det;
    let tx = -(a * m[2] + b * m[5]);
    let ty = -(c * m[2] + d * m[5]);
    Some([a, b, tx, c, d, ty])
}

/// Bilinear sample of all channels at a sub-pixel position.
///
/// Out-of-bounds taps contribute 0 (black).
pub fn sample_bilinear(image: &Image, sx: f32, sy: f32) -> [f32; CHANNELS] {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let data = image.as_bytes();

    let x0 = sx.floor() as i32;
    let y0 = sy.floor() as i32;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let mut out = [0.0f32; CHANNELS];
    let taps = [
        (x0, y0, (1.0 - fx) * (1.0 - fy)),
        (x0 + 1, y0, fx * (1.0 - fy)),
        (x0, y0 + 1, (1.0 - fx) * fy),
        (x0 + 1, y0 + 1, fx * fy),
    ];
    for (x, y, weight) in taps {
        if x >= 0 && x < w && y >= 0 && y < h && weight > 0.0 {
            let off = (y as usize * w as usize + x as usize) * CHANNELS;
            for c in 0..CHANNELS {
                out[c] += data[off + c] as f32 * weight;
            }
        }
    }
    out
}

/// Resample `src` into an `out_width × out_height` image, where `m` maps
/// source coordinates to output coordinates.
///
/// Output pixels whose preimage falls outside `src` stay black. A singular
/// `m` produces an all-black image.
pub fn warp_affine(src: &Image, m: &Affine, out_width: u32, out_height: u32) -> Image {
    let mut data = vec![0u8; out_width as usize * out_height as usize * CHANNELS];

    if let Some(inv) = invert(m) {
        for oy in 0..out_height {
            for ox in 0..out_width {
                let (sx, sy) = apply(&inv, ox as f32, oy as f32);
                let px = sample_bilinear(src, sx, sy);
                let off = (oy as usize * out_width as usize + ox as usize) * CHANNELS;
                for c in 0..CHANNELS {
                    data[off + c] = px[c].round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }

    Image::new(out_width, out_height, src.order(), data)
        .expect("warp output buffer is sized from its dimensions")
}

/// Align a face to a `size × size` crop, returning the crop and the
/// source → crop transform.
pub fn norm_crop(image: &Image, landmarks: &Landmarks, size: u32) -> (Image, Affine) {
    let matrix = estimate_similarity_transform(landmarks, &reference_landmarks(size));
    (warp_affine(image, &matrix, size, size), matrix)
}

/// Align a detected face to a canonical 112×112 crop for ArcFace.
pub fn align_face(image: &Image, landmarks: &Landmarks) -> Image {
    norm_crop(image, landmarks, ARCFACE_ALIGNED_SIZE).0
}
