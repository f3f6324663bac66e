//! Typed 8-bit, 3-channel pixel buffer.
//!
//! Every `Image` records its channel order. The codec produces RGB (the order
//! the `image` crate decodes into) and all ONNX models consume RGB planes, but
//! buffers coming from other sources may be BGR. Code that needs a specific
//! order asks for it through [`Image::with_order`] instead of assuming one.

use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Bytes per pixel for every `Image`.
pub const CHANNELS: usize = 3;

/// Interleaved channel order of an [`Image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RasterError {
    #[error("image has zero dimensions ({width}x{height})")]
    ZeroDimensions { width: u32, height: u32 },
    #[error("pixel buffer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// In-memory image with explicit dimensions and channel order.
///
/// Invariant: `width > 0`, `height > 0`, `data.len() == width * height * 3`.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    order: ChannelOrder,
    data: Vec<u8>,
}

impl Image {
    /// Wrap an interleaved pixel buffer, validating its shape.
    pub fn new(
        width: u32,
        height: u32,
        order: ChannelOrder,
        data: Vec<u8>,
    ) -> Result<Self, RasterError> {
        if width == 0 || height == 0 {
            return Err(RasterError::ZeroDimensions { width, height });
        }
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(RasterError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            order,
            data,
        })
    }

    /// An image of one solid color, given in RGB regardless of `order`.
    pub fn filled(
        width: u32,
        height: u32,
        order: ChannelOrder,
        rgb: [u8; 3],
    ) -> Result<Self, RasterError> {
        let pixel = order.store_rgb(rgb);
        let len = width as usize * height as usize;
        let data = pixel.iter().copied().cycle().take(len * CHANNELS).collect();
        Self::new(width, height, order, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    /// Raw interleaved bytes in [`order`](Self::order).
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// Borrow this image in the requested order, converting only when needed.
    pub fn with_order(&self, order: ChannelOrder) -> Cow<'_, Image> {
        if self.order == order {
            Cow::Borrowed(self)
        } else {
            Cow::Owned(self.clone().into_order(order))
        }
    }

    /// Convert in place to the requested channel order.
    pub fn into_order(mut self, order: ChannelOrder) -> Image {
        if self.order != order {
            // RGB <-> BGR is the same swap of channels 0 and 2.
            for px in self.data.chunks_exact_mut(CHANNELS) {
                px.swap(0, 2);
            }
            self.order = order;
        }
        self
    }

    /// Pixel at (x, y) as RGB, whatever the storage order.
    ///
    /// Panics if the coordinate is out of bounds.
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let off = self.offset(x, y);
        let px = [self.data[off], self.data[off + 1], self.data[off + 2]];
        self.order.to_rgb(px)
    }

    /// Write an RGB pixel at (x, y) in storage order.
    ///
    /// Panics if the coordinate is out of bounds.
    pub fn put_rgb(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let off = self.offset(x, y);
        let px = self.order.store_rgb(rgb);
        self.data[off..off + CHANNELS].copy_from_slice(&px);
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) outside {}x{} image",
            self.width,
            self.height
        );
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }
}

impl ChannelOrder {
    /// Reorder a pixel stored in `self` order into RGB.
    pub fn to_rgb(self, px: [u8; 3]) -> [u8; 3] {
        match self {
            ChannelOrder::Rgb => px,
            ChannelOrder::Bgr => [px[2], px[1], px[0]],
        }
    }

    /// Reorder an RGB pixel into `self` order.
    pub fn store_rgb(self, rgb: [u8; 3]) -> [u8; 3] {
        // The swap is its own inverse.
        self.to_rgb(rgb)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}
