//! Image decode/encode boundary.
//!
//! Decoded images always come out as [`ChannelOrder::Rgb`] and upright: an
//! EXIF Orientation tag is applied during decode. Encoding accepts any order
//! and converts to RGB before the bytes reach the encoder.

use crate::raster::{ChannelOrder, Image};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::metadata::Orientation;
use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("image buffer is empty")]
    Empty,
    #[error("not a recognized image format")]
    Unrecognized,
    #[error("malformed image data: {0}")]
    Malformed(String),
    #[error("image decodes to zero dimensions ({width}x{height})")]
    ZeroDimensions { width: u32, height: u32 },
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("encoder failed: {0}")]
    Encoder(#[from] image::ImageError),
}

/// Compressed output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg { quality: u8 },
    Png,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Jpeg {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl OutputFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

/// Decode an uploaded buffer into an upright RGB [`Image`].
pub fn decode(bytes: &[u8]) -> Result<Image, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let format = image::guess_format(bytes).map_err(|_| DecodeError::Unrecognized)?;
    let malformed = |e: image::ImageError| DecodeError::Malformed(e.to_string());
    let mut decoder = ImageReader::with_format(Cursor::new(bytes), format)
        .into_decoder()
        .map_err(malformed)?;
    // Unreadable metadata leaves the pixels usable as stored.
    let orientation = decoder.orientation().unwrap_or_else(|e| {
        tracing::debug!(error = %e, "ignoring unreadable EXIF orientation");
        Orientation::NoTransforms
    });
    let mut decoded = DynamicImage::from_decoder(decoder).map_err(malformed)?;
    decoded.apply_orientation(orientation);

    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::ZeroDimensions { width, height });
    }

    tracing::debug!(?format, ?orientation, width, height, "decoded image");

    Image::new(width, height, ChannelOrder::Rgb, rgb.into_raw())
        .map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Encode an [`Image`] into compressed bytes.
pub fn encode(image: &Image, format: OutputFormat) -> Result<Vec<u8>, EncodeError> {
    let rgb = image.with_order(ChannelOrder::Rgb);
    let (width, height) = rgb.dimensions();
    let mut buf = Vec::new();

    match format {
        OutputFormat::Jpeg { quality } => {
            JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).write_image(
                rgb.as_bytes(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        OutputFormat::Png => {
            PngEncoder::new(&mut buf).write_image(
                rgb.as_bytes(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
    }

    Ok(buf)
}

/// Encode and wrap in standard base64.
pub fn encode_base64(image: &Image, format: OutputFormat) -> Result<String, EncodeError> {
    let bytes = encode(image, format)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// `data:<mime>;base64,<payload>` for already-encoded bytes.
pub fn data_url(bytes: &[u8], format: OutputFormat) -> String {
    format!(
        "data:{};base64,{}",
        format.mime_type(),
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Pick an output format from a file extension (`.png` → PNG, else JPEG).
pub fn format_for_path(path: &std::path::Path, jpeg_quality: u8) -> OutputFormat {
    match ImageFormat::from_path(path) {
        Ok(ImageFormat::Png) => OutputFormat::Png,
        _ => OutputFormat::Jpeg {
            quality: jpeg_quality,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Image {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&[(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128]);
            }
        }
        Image::new(width, height, ChannelOrder::Rgb, data).unwrap()
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(decode(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode(b"definitely not an image"), Err(DecodeError::Unrecognized)));
    }

    #[test]
    fn test_decode_truncated_png() {
        let png = encode(&gradient(8, 8), OutputFormat::Png).unwrap();
        let truncated = &png[..png.len() / 2];
        assert!(matches!(decode(truncated), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_jpeg_preserves_dimensions() {
        let img = gradient(37, 21);
        let bytes = encode(&img, OutputFormat::default()).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back.dimensions(), (37, 21));
        assert_eq!(back.order(), ChannelOrder::Rgb);
    }

    /// Little-endian TIFF block holding a single Orientation entry.
    fn exif_orientation(value: u16) -> Vec<u8> {
        let mut exif = b"II*\0".to_vec();
        exif.extend_from_slice(&8u32.to_le_bytes());
        exif.extend_from_slice(&1u16.to_le_bytes());
        exif.extend_from_slice(&0x0112u16.to_le_bytes());
        exif.extend_from_slice(&3u16.to_le_bytes());
        exif.extend_from_slice(&1u32.to_le_bytes());
        exif.extend_from_slice(&value.to_le_bytes());
        exif.extend_from_slice(&[0, 0]);
        exif.extend_from_slice(&0u32.to_le_bytes());
        exif
    }

    #[test]
    fn test_decode_applies_exif_rotation() {
        // 40x20, left half red, right half blue, tagged "rotate 90 clockwise".
        let mut img = Image::filled(40, 20, ChannelOrder::Rgb, [0, 0, 255]).unwrap();
        for y in 0..20 {
            for x in 0..20 {
                img.put_rgb(x, y, [255, 0, 0]);
            }
        }
        let mut jpeg = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, 95);
        encoder.set_exif_metadata(exif_orientation(6)).unwrap();
        encoder
            .write_image(img.as_bytes(), 40, 20, ExtendedColorType::Rgb8)
            .unwrap();

        let upright = decode(&jpeg).unwrap();
        assert_eq!(upright.dimensions(), (20, 40));
        // The left edge now runs along the top.
        let [r, _, b] = upright.rgb_at(10, 8);
        assert!(r > 200 && b < 60, "top should be red, got r={r} b={b}");
        let [r, _, b] = upright.rgb_at(10, 32);
        assert!(b > 200 && r < 60, "bottom should be blue, got r={r} b={b}");
    }

    #[test]
    fn test_decode_without_exif_keeps_layout() {
        let bytes = encode(&gradient(40, 20), OutputFormat::default()).unwrap();
        assert_eq!(decode(&bytes).unwrap().dimensions(), (40, 20));
    }

    #[test]
    fn test_png_is_lossless() {
        let img = gradient(16, 9);
        let back = decode(&encode(&img, OutputFormat::Png).unwrap()).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn test_encode_converts_bgr_to_rgb() {
        let bgr = Image::filled(4, 4, ChannelOrder::Bgr, [200, 10, 30]).unwrap();
        let back = decode(&encode(&bgr, OutputFormat::Png).unwrap()).unwrap();
        assert_eq!(back.rgb_at(2, 2), [200, 10, 30]);
    }

    #[test]
    fn test_data_url_prefix() {
        let bytes = encode(&gradient(4, 4), OutputFormat::default()).unwrap();
        let url = data_url(&bytes, OutputFormat::default());
        assert!(url.starts_with("data:image/jpeg;base64,"));
        let payload = url.trim_start_matches("data:image/jpeg;base64,");
        let decoded = base64::engine::general_purpose::STANDARD.decode(payload).unwrap();
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn test_encode_base64_decodes_to_same_image_size() {
        let text = encode_base64(&gradient(12, 30), OutputFormat::default()).unwrap();
        let bytes = base64::engine::general_purpose::STANDARD.decode(text).unwrap();
        assert_eq!(decode(&bytes).unwrap().dimensions(), (12, 30));
    }

    #[test]
    fn test_format_for_path() {
        use std::path::Path;
        assert_eq!(format_for_path(Path::new("out.png"), 90), OutputFormat::Png);
        assert_eq!(
            format_for_path(Path::new("out.jpg"), 90),
            OutputFormat::Jpeg { quality: 90 }
        );
        assert_eq!(
            format_for_path(Path::new("out"), 80),
            OutputFormat::Jpeg { quality: 80 }
        );
    }
}
