//! Decoded tile images and the release contract of the memory cache.

use std::any::Any;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::error::{LimitError, LimitErrorKind};
use image::{GenericImageView, ImageError};
use parking_lot::RwLock;

use crate::error::TileError;

/// Decoded tile image stored in the memory cache.
///
/// The memory cache is the owner of the images put into it. When an image is evicted the cache
/// calls [`TileImage::release`], after which the image must free its pixel buffer. Handles that
/// are still held elsewhere stay valid but report [`TileImage::is_released`].
pub trait TileImage: Debug + Send + Sync {
    /// Frees the resources held by the image. Calling it more than once has no effect.
    fn release(&self);

    /// Returns true if [`TileImage::release`] has been called.
    fn is_released(&self) -> bool;

    /// Approximate memory held by the image in bytes.
    fn byte_size(&self) -> usize {
        0
    }

    /// Allows downcasting to the concrete image type.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a tile image.
pub type TileImageRef = Arc<dyn TileImage>;

/// An image that has been loaded into memory.
#[derive(Debug)]
pub struct DecodedImage {
    /// Raw bytes of the image, in RGBA order. `None` after the image is released.
    pixels: RwLock<Option<Vec<u8>>>,
    released: AtomicBool,
    /// Width and height of the image.
    dimensions: (u32, u32),
}

impl DecodedImage {
    /// Decode an image from a byte slice.
    ///
    /// Attempts to guess the format of the image from the data. Non-RGBA images
    /// will be converted to RGBA.
    pub fn new(bytes: &[u8]) -> Result<Self, TileError> {
        let decoded = image::load_from_memory(bytes).map_err(decode_error)?;
        let dimensions = decoded.dimensions();
        let pixels = decoded.to_rgba8();

        Ok(Self::from_raw(pixels.into_vec(), dimensions))
    }

    /// Creates an image from raw RGBA bytes.
    pub fn from_raw(pixels: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self {
            pixels: RwLock::new(Some(pixels)),
            released: AtomicBool::new(false),
            dimensions,
        }
    }

    /// Width and height of the image.
    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    /// Calls `f` with the RGBA pixels of the image. Returns `None` if the image has been released.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.pixels.read().as_deref().map(f)
    }
}

impl TileImage for DecodedImage {
    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            *self.pixels.write() = None;
        }
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn byte_size(&self) -> usize {
        self.pixels.read().as_ref().map_or(0, Vec::len)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Allocation failures while decoding are reported as [`TileError::OutOfMemory`], so that the
/// loading module stops instead of failing every queued tile the same way.
fn decode_error(err: ImageError) -> TileError {
    match &err {
        ImageError::Limits(limit) if is_out_of_memory(limit) => TileError::OutOfMemory,
        _ => TileError::ImageDecode(err),
    }
}

fn is_out_of_memory(err: &LimitError) -> bool {
    matches!(err.kind(), LimitErrorKind::InsufficientMemory)
}
