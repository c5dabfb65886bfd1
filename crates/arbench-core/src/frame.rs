//! Owned RGBA frame buffers.

use image::{imageops, imageops::FilterType, Rgba, RgbaImage};

/// Tracks which pool slot a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolLease {
    pub(crate) pool_id: u64,
    pub(crate) generation: u64,
    pub(crate) slot: usize,
}

/// A fixed-size RGBA pixel buffer.
///
/// Frames move into pipeline calls by value. A frame acquired from a
/// [`FramePool`](crate::pool::FramePool) remembers its slot so it can be
/// returned; clones and resized copies are never pool members.
#[derive(Debug)]
pub struct Frame {
    image: RgbaImage,
    lease: Option<PoolLease>,
}

impl Frame {
    /// Allocate a transparent frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
            lease: None,
        }
    }

    /// Wrap an existing image.
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image, lease: None }
    }

    /// Frame filled with one color.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::from_image(RgbaImage::from_pixel(width, height, Rgba(rgba)))
    }

    /// 1x1 frame used for degenerate results.
    pub fn placeholder() -> Self {
        Self::new(1, 1)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Bilinear resize into a new buffer.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        Frame::from_image(imageops::resize(&self.image, width, height, FilterType::Triangle))
    }

    /// Borrow this frame if it already has the given size, else resize a copy.
    pub fn fit_to(&self, width: u32, height: u32) -> std::borrow::Cow<'_, Frame> {
        if self.dimensions() == (width, height) {
            std::borrow::Cow::Borrowed(self)
        } else {
            log::debug!(
                "Resizing frame {}x{} -> {}x{}",
                self.width(),
                self.height(),
                width,
                height
            );
            std::borrow::Cow::Owned(self.resized(width, height))
        }
    }

    /// Zero every pixel.
    pub fn clear(&mut self) {
        self.image.iter_mut().for_each(|b| *b = 0);
    }

    pub fn is_pooled(&self) -> bool {
        self.lease.is_some()
    }

    pub(crate) fn from_pool(image: RgbaImage, lease: PoolLease) -> Self {
        Self {
            image,
            lease: Some(lease),
        }
    }

    pub(crate) fn lease(&self) -> Option<PoolLease> {
        self.lease
    }
}

impl Clone for Frame {
    fn clone(&self) -> Self {
        Frame::from_image(self.image.clone())
    }
}
