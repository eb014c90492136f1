//! PNG encoding and atomic output writes.
//!
//! Encoding is lossless RGBA8 with a fixed filter and compression level, so
//! identical frames always produce identical bytes. Writes go to a
//! temporary file next to the destination which is synced and then renamed
//! over it; on any failure the temporary file is removed and the destination
//! is left as it was.

use std::fs::File;
use std::io::{self, Cursor, Write};
use std::path::Path;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};

use crate::capture::FrameBuffer;
use crate::{Error, Result};

/// Encode a frame as PNG bytes.
pub fn encode_png(frame: &FrameBuffer) -> Result<Vec<u8>> {
    let (width, height) = frame.dimensions();
    let expected = width as usize * height as usize * 4;
    if frame.pixels().len() != expected {
        return Err(Error::EncodeFailed(format!(
            "frame has {} bytes, expected {} for {}x{}",
            frame.pixels().len(),
            expected,
            width,
            height
        )));
    }

    let mut output = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        Cursor::new(&mut output),
        CompressionType::Default,
        FilterType::Adaptive,
    );
    encoder
        .write_image(frame.pixels(), width, height, ExtendedColorType::Rgba8)
        .map_err(|e| Error::EncodeFailed(e.to_string()))?;
    Ok(output)
}

/// Encode `frame` and write it atomically to `output_path`.
///
/// Returns the number of bytes written. The parent directory must already
/// exist.
pub fn write_png(frame: &FrameBuffer, output_path: &Path) -> Result<u64> {
    let png = encode_png(frame)?;
    write_atomic(output_path, |file| file.write_all(&png))?;
    log::debug!("wrote {} bytes to {}", png.len(), output_path.display());
    Ok(png.len() as u64)
}

/// Run `write` against a temporary file in the destination directory, then
/// sync and rename it to `output_path`.
///
/// Any error from `write` (or from syncing/renaming) is reported as
/// `WriteFailed` and leaves no file behind.
pub fn write_atomic<F>(output_path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let write_failed = |what: &str, e: io::Error| {
        Error::WriteFailed(format!("{} {}: {}", what, output_path.display(), e))
    };

    let dir = match output_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !dir.is_dir() {
        return Err(Error::WriteFailed(format!(
            "directory {} does not exist",
            dir.display()
        )));
    }
    if output_path.is_dir() {
        return Err(Error::WriteFailed(format!(
            "{} is a directory",
            output_path.display()
        )));
    }

    let mut tmp = tempfile::Builder::new()
        .prefix(".rfshot-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| write_failed("cannot create temporary file for", e))?;

    // `tmp` removes itself on drop, so every early return below cleans up.
    write(tmp.as_file_mut()).map_err(|e| write_failed("cannot write", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| write_failed("cannot sync", e))?;
    tmp.persist(output_path)
        .map_err(|e| write_failed("cannot rename into", e.error))?;
    Ok(())
}
