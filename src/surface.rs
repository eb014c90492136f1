//! Offscreen render surface.
//!
//! A [`RenderSurface`] is a fixed-size pair of RGBA8 buffers that is never
//! attached to a display. Paints go to the back buffer and are swapped to
//! the front in one step, so a readback never observes a partially painted
//! frame. The backing store is released exactly once, by [`RenderSurface::destroy`]
//! or on drop.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::rendering::raster;
use crate::rendering::{DisplayList, Rgba};
use crate::{Error, Result, Viewport};

/// Largest accepted width or height, in pixels
pub const MAX_SURFACE_DIMENSION: u32 = 16_384;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct RenderSurface {
    id: u64,
    width: u32,
    height: u32,
    title: String,
    front: Vec<u8>,
    back: Vec<u8>,
    paints: u64,
    released: bool,
}

/// Outcome of one [`RenderSurface::present`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaintReport {
    /// Whether any front-buffer pixel differs from the previous frame
    pub changed: bool,
    /// Number of frames presented so far, this one included
    pub generation: u64,
}

impl RenderSurface {
    /// Allocate a hidden `width`×`height` surface cleared to `background`.
    ///
    /// The title is attached as metadata only.
    pub fn create(width: u32, height: u32, title: &str, background: Rgba) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::SurfaceCreationFailed(format!(
                "dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        if width > MAX_SURFACE_DIMENSION || height > MAX_SURFACE_DIMENSION {
            return Err(Error::SurfaceCreationFailed(format!(
                "{}x{} exceeds the maximum surface dimension {}",
                width, height, MAX_SURFACE_DIMENSION
            )));
        }
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| {
                Error::SurfaceCreationFailed(format!("{}x{} overflows the pixel buffer", width, height))
            })?;

        let mut front = alloc(len)?;
        let back = alloc(len)?;
        let fill = [background.0, background.1, background.2, background.3];
        for px in front.chunks_exact_mut(4) {
            px.copy_from_slice(&fill);
        }

        let id = NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("surface {} created: {}x{} {:?}", id, width, height, title);
        Ok(Self {
            id,
            width,
            height,
            title: title.to_string(),
            front,
            back,
            paints: 0,
            released: false,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn viewport(&self) -> Viewport {
        Viewport {
            width: self.width,
            height: self.height,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn paint_count(&self) -> u64 {
        self.paints
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Rasterize `list` into the back buffer and swap it to the front.
    pub fn present(&mut self, list: &DisplayList) -> Result<PaintReport> {
        if self.released {
            return Err(Error::CaptureFailed(format!("surface {} released", self.id)));
        }
        raster::rasterize_into(list, self.width, self.height, &mut self.back);
        let changed = self.back != self.front;
        std::mem::swap(&mut self.front, &mut self.back);
        self.paints += 1;
        Ok(PaintReport {
            changed,
            generation: self.paints,
        })
    }

    /// The composited pixels of the last presented frame.
    pub fn front_buffer(&self) -> Result<&[u8]> {
        if self.released {
            return Err(Error::CaptureFailed(format!("surface {} released", self.id)));
        }
        Ok(&self.front)
    }

    /// Release the backing store. Returns `false` if it was already released.
    pub fn destroy(&mut self) -> bool {
        if self.released {
            log::debug!("surface {} already released", self.id);
            return false;
        }
        self.released = true;
        self.front = Vec::new();
        self.back = Vec::new();
        log::debug!("surface {} released after {} paints", self.id, self.paints);
        true
    }
}

impl Drop for RenderSurface {
    fn drop(&mut self) {
        if !self.released {
            self.destroy();
        }
    }
}

fn alloc(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|e| {
        Error::SurfaceCreationFailed(format!("cannot allocate {} bytes: {}", len, e))
    })?;
    buf.resize(len, 0);
    Ok(buf)
}
