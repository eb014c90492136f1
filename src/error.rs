//! Error types for the capture engine

use serde::Serialize;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a capture request.
///
/// Every variant is terminal for the request: the engine never retries
/// internally. Use [`Error::kind`] to get the stable classification and
/// [`ErrorKind::exit_code`] for the process status.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad dimensions or the backing store could not be allocated
    #[error("Surface creation failed: {0}")]
    SurfaceCreationFailed(String),

    /// Bad URL/HTML, unreachable host, unsupported scheme
    #[error("Failed to load content: {0}")]
    LoadFailed(String),

    /// The frame never reached a stable state within the max wait
    #[error("Rendering did not settle within {0}ms")]
    RenderTimeout(u64),

    /// Surface readback failed
    #[error("Frame capture failed: {0}")]
    CaptureFailed(String),

    /// PNG compression/format error
    #[error("PNG encoding failed: {0}")]
    EncodeFailed(String),

    /// Filesystem error while writing the output
    #[error("Failed to write output: {0}")]
    WriteFailed(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SurfaceCreationFailed(_) => ErrorKind::SurfaceCreationFailed,
            Error::LoadFailed(_) => ErrorKind::LoadFailed,
            Error::RenderTimeout(_) => ErrorKind::RenderTimeout,
            Error::CaptureFailed(_) => ErrorKind::CaptureFailed,
            Error::EncodeFailed(_) => ErrorKind::EncodeFailed,
            Error::WriteFailed(_) => ErrorKind::WriteFailed,
        }
    }
}

/// Stable failure classification reported in a `CaptureResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    SurfaceCreationFailed,
    LoadFailed,
    RenderTimeout,
    CaptureFailed,
    EncodeFailed,
    WriteFailed,
}

impl ErrorKind {
    /// Process exit status for this failure class.
    ///
    /// `0` is success, `1` is left for glue failures outside the engine and
    /// `2` for command-line usage errors.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::SurfaceCreationFailed => 3,
            ErrorKind::LoadFailed => 4,
            ErrorKind::RenderTimeout => 5,
            ErrorKind::CaptureFailed => 6,
            ErrorKind::EncodeFailed => 7,
            ErrorKind::WriteFailed => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn exit_codes_are_distinct_and_nonzero() {
        let kinds = [
            ErrorKind::SurfaceCreationFailed,
            ErrorKind::LoadFailed,
            ErrorKind::RenderTimeout,
            ErrorKind::CaptureFailed,
            ErrorKind::EncodeFailed,
            ErrorKind::WriteFailed,
        ];
        let codes: HashSet<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        assert_eq!(codes.len(), kinds.len());
        assert!(codes.iter().all(|c| *c > 2));
    }

    #[test]
    fn kind_matches_variant() {
        let err = Error::RenderTimeout(250);
        assert_eq!(err.kind(), ErrorKind::RenderTimeout);
        assert_eq!(err.to_string(), "Rendering did not settle within 250ms");
    }
}
