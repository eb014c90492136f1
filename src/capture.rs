//! Frame readback from a render surface.

use sha2::{Digest, Sha256};

use crate::detector::CapturePermit;
use crate::surface::RenderSurface;
use crate::{Error, Result};

/// Row-major RGBA8 pixels of one captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    /// Wrap raw pixels; the length must be exactly `width * height * 4`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(Error::CaptureFailed(format!(
                "pixel buffer holds {} bytes, {}x{} RGBA8 needs {}",
                pixels.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self { width, height, pixels })
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

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]])
    }

    /// SHA-256 of the raw pixels, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width.to_be_bytes());
        hasher.update(self.height.to_be_bytes());
        hasher.update(&self.pixels);
        hex::encode(hasher.finalize())
    }
}

/// Snapshot the surface's composited front buffer.
///
/// The permit can only be obtained once the completion detector reached
/// `Stable` or `TimedOut`, so an early capture does not type-check.
pub fn capture(surface: &RenderSurface, permit: &CapturePermit) -> Result<FrameBuffer> {
    let pixels = surface.front_buffer()?.to_vec();
    let frame = FrameBuffer::new(surface.width(), surface.height(), pixels)?;
    log::debug!(
        "captured surface {} ({}x{}, state {:?}, {} paints)",
        surface.id(),
        frame.width,
        frame.height,
        permit.state(),
        surface.paint_count()
    );
    Ok(frame)
}
