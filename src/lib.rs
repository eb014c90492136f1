//! rfshot: offscreen page rendering and PNG capture
//!
//! Renders a URL or an in-memory HTML document on a hidden surface of a
//! fixed size, waits until loading, script timers and repaints have settled,
//! then writes the composited pixels to a PNG file.
//!
//! # Example
//!
//! ```no_run
//! use rfshot::{CaptureConfig, CaptureRequest, Source};
//!
//! let request = CaptureRequest::new(640, 480, "Sample", "result.png")
//!     .with_source(Source::Url("https://example.com".into()));
//! let result = rfshot::capture(&request, &CaptureConfig::default());
//! std::process::exit(result.exit_code());
//! ```
//!
//! The pipeline is strictly sequential: load, completion, capture, encode.
//! Loading runs on a worker thread that only talks to the caller through
//! [`PageEvent`]s; everything else happens on the calling thread.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

pub mod capture;
pub mod detector;
pub mod driver;
pub mod encode;
pub mod error;
pub mod event;
pub mod loader;
pub mod rendering;
#[cfg(feature = "scripting")]
pub mod script;
pub mod surface;

// Async facade over the blocking pipeline
pub mod async_api;

pub use async_api::capture_async;
pub use capture::FrameBuffer;
pub use detector::{CapturePermit, CompletionDetector, RenderState};
pub use driver::Driver;
pub use error::{Error, ErrorKind, Result};
pub use event::{EventSource, Loader, PageEvent, Pump, ScriptedSource};
pub use loader::{ContentLoader, LoadHandle};
pub use rendering::Rgba;
pub use surface::RenderSurface;

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// What to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// `http`, `https`, `file`, `data` or `about:blank`
    Url(String),
    /// An in-memory document; relative references resolve against `base_url`
    Html {
        html: String,
        base_url: Option<String>,
    },
}

impl Default for Source {
    fn default() -> Self {
        Source::Url("about:blank".to_string())
    }
}

/// One capture job. Immutable once handed to [`capture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    /// Surface metadata only; never rendered
    pub title: String,
    pub output_path: PathBuf,
    pub source: Source,
}

impl CaptureRequest {
    pub fn new(width: u32, height: u32, title: &str, output_path: impl Into<PathBuf>) -> Self {
        Self {
            width,
            height,
            title: title.to_string(),
            output_path: output_path.into(),
            source: Source::default(),
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }
}

/// What a timed-out render does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Report `RenderTimeout` and write nothing
    #[default]
    Fail,
    /// Capture whatever was painted, write it, and still report `RenderTimeout`
    BestEffort,
}

/// Configuration for a capture
///
/// The defaults favour a complete frame over speed: a 30 second overall
/// deadline, a 200ms quiet window, scripts and images enabled.
///
/// # Examples
///
/// ```
/// let cfg = rfshot::CaptureConfig::default();
/// assert_eq!(cfg.timeout_ms, 30_000);
/// assert!(cfg.user_agent.contains("rfshot"));
/// ```
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// User agent string to send with requests
    pub user_agent: String,
    /// Custom HTTP headers
    pub headers: HashMap<String, String>,
    /// Overall deadline from the start of loading, also the HTTP request timeout
    pub timeout_ms: u64,
    /// Quiet window with no repaint after which the frame counts as stable
    pub settle_ms: u64,
    /// Upper bound on one wait for events in the pump loop
    pub tick_ms: u64,
    /// Behaviour when `timeout_ms` elapses first
    pub timeout_policy: TimeoutPolicy,
    /// Whether to run page scripts (needs the `scripting` feature)
    pub enable_javascript: bool,
    /// Whether to fetch and decode `<img>` sources
    pub enable_images: bool,
    /// Maximum loop iterations before Boa throws an error (0 => disabled)
    pub script_loop_iteration_limit: u64,
    /// Maximum recursion depth before Boa throws (usize::MAX => disabled)
    pub script_recursion_limit: usize,
    /// Maximum number of timer and animation-frame callbacks run per page
    pub max_script_timers: usize,
    /// Canvas colour where the page paints nothing
    pub background: Rgba,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 rfshot/0.1".to_string(),
            headers: HashMap::new(),
            timeout_ms: 30000,
            settle_ms: 200,
            tick_ms: 16,
            timeout_policy: TimeoutPolicy::Fail,
            enable_javascript: true,
            enable_images: true,
            script_loop_iteration_limit: 1000000,
            script_recursion_limit: 1024,
            max_script_timers: 256,
            background: rendering::style::WHITE,
        }
    }
}

/// Outcome of one capture, as reported to callers and printed by `--json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureResult {
    pub success: bool,
    pub error: Option<ErrorKind>,
    pub bytes_written: Option<u64>,
}

impl CaptureResult {
    pub fn succeeded(bytes_written: u64) -> Self {
        Self {
            success: true,
            error: None,
            bytes_written: Some(bytes_written),
        }
    }

    pub fn failed(kind: ErrorKind) -> Self {
        Self {
            success: false,
            error: Some(kind),
            bytes_written: None,
        }
    }

    /// A best-effort capture that was written after the deadline passed.
    pub fn timed_out(bytes_written: u64) -> Self {
        Self {
            success: false,
            error: Some(ErrorKind::RenderTimeout),
            bytes_written: Some(bytes_written),
        }
    }

    /// Process exit status: 0 on success, otherwise the error's code.
    pub fn exit_code(&self) -> i32 {
        self.error.map_or(0, ErrorKind::exit_code)
    }
}

/// Render `request.source` and write the PNG, blocking until done.
///
/// Must not be called from inside an async runtime; use
/// [`capture_async`] there.
pub fn capture(request: &CaptureRequest, config: &CaptureConfig) -> CaptureResult {
    Driver::new(config.clone(), ContentLoader::new(config)).run(request)
}
