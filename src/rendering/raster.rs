//! Software rasterizer: executes a display list into an RGBA8 pixel buffer

use image::RgbaImage;

use crate::rendering::layout::CELL;
use crate::rendering::paint::{DisplayList, PaintCommand};
use crate::rendering::style::Rgba;

/// Rasterize `list` into `target`, a `width`×`height` RGBA8 buffer.
///
/// The canvas is cleared to the list background (no blending), then each
/// command is composited source-over. Everything is clipped to the buffer.
pub fn rasterize_into(list: &DisplayList, width: u32, height: u32, target: &mut [u8]) {
    debug_assert_eq!(target.len(), width as usize * height as usize * 4);
    let bg = [list.background.0, list.background.1, list.background.2, list.background.3];
    for px in target.chunks_exact_mut(4) {
        px.copy_from_slice(&bg);
    }

    let mut canvas = Canvas { width, height, pixels: target };
    for cmd in &list.commands {
        match cmd {
            PaintCommand::SolidRect { x, y, width, height, rgba } => {
                canvas.fill_rect(*x, *y, *width, *height, *rgba)
            }
            PaintCommand::Text { x, y, text, rgba, scale } => {
                canvas.draw_text(*x, *y, text, *rgba, *scale)
            }
            PaintCommand::Image { x, y, width, height, image } => {
                canvas.draw_image(*x, *y, *width, *height, image)
            }
        }
    }
}

struct Canvas<'a> {
    width: u32,
    height: u32,
    pixels: &'a mut [u8],
}

impl Canvas<'_> {
    fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, rgba: Rgba) {
        if rgba.3 == 0 {
            return;
        }
        let x0 = x.max(0) as i64;
        let y0 = y.max(0) as i64;
        let x1 = (x as i64 + width as i64).min(self.width as i64);
        let y1 = (y as i64 + height as i64).min(self.height as i64);
        for py in y0..y1 {
            for px in x0..x1 {
                self.blend(px as i32, py as i32, rgba);
            }
        }
    }

    /// Nearest-neighbour scale `image` into the destination rect. Only the
    /// part of the rect that intersects the canvas is visited.
    fn draw_image(&mut self, x: i32, y: i32, width: u32, height: u32, image: &RgbaImage) {
        let (iw, ih) = image.dimensions();
        if iw == 0 || ih == 0 || width == 0 || height == 0 {
            return;
        }
        let (x, y) = (x as i64, y as i64);
        let dy0 = (-y).max(0);
        let dy1 = (height as i64).min(self.height as i64 - y);
        let dx0 = (-x).max(0);
        let dx1 = (width as i64).min(self.width as i64 - x);
        for dy in dy0..dy1 {
            let sy = (dy as u64 * ih as u64 / height as u64) as u32;
            for dx in dx0..dx1 {
                let sx = (dx as u64 * iw as u64 / width as u64) as u32;
                let p = image.get_pixel(sx, sy).0;
                self.blend((x + dx) as i32, (y + dy) as i32, (p[0], p[1], p[2], p[3]));
            }
        }
    }

    /// One solid glyph block per visible character, inset one unit inside
    /// its cell.
    fn draw_text(&mut self, x: i32, y: i32, text: &str, rgba: Rgba, scale: u32) {
        let cell = (CELL * scale) as i64;
        for (row, line) in text.lines().enumerate() {
            let gy = y as i64 + row as i64 * cell + scale as i64;
            if gy >= self.height as i64 {
                break;
            }
            for (col, ch) in line.chars().enumerate() {
                let gx = x as i64 + col as i64 * cell + scale as i64;
                if gx >= self.width as i64 {
                    break;
                }
                if ch.is_whitespace() {
                    continue;
                }
                self.fill_rect(gx as i32, gy as i32, 6 * scale, 6 * scale, rgba);
            }
        }
    }

    fn blend(&mut self, x: i32, y: i32, src: Rgba) {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let dst = &mut self.pixels[i..i + 4];
        let sa = src.3 as u32;
        if sa == 255 {
            dst.copy_from_slice(&[src.0, src.1, src.2, 255]);
            return;
        }
        if sa == 0 {
            return;
        }
        // straight-alpha source-over
        let da = dst[3] as u32;
        let out_a = sa * 255 + da * (255 - sa);
        if out_a == 0 {
            dst.copy_from_slice(&[0, 0, 0, 0]);
            return;
        }
        let mix = |s: u8, d: u8| -> u8 {
            ((s as u32 * sa * 255 + d as u32 * da * (255 - sa) + out_a / 2) / out_a) as u8
        };
        let (r, g, b) = (mix(src.0, dst[0]), mix(src.1, dst[1]), mix(src.2, dst[2]));
        dst.copy_from_slice(&[r, g, b, ((out_a + 127) / 255) as u8]);
    }
}
