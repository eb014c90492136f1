//! The pump loop that turns one [`CaptureRequest`] into a PNG file.
//!
//! Everything here runs on the calling thread: the surface, the page and the
//! completion detector are owned by the loop and only events cross threads.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::capture;
use crate::detector::{CapturePermit, CompletionDetector, RenderState};
use crate::encode;
use crate::event::{EventSource, Loader, PageEvent, Pump};
use crate::rendering::Page;
use crate::surface::RenderSurface;
use crate::{CaptureConfig, CaptureRequest, CaptureResult, Error, Result, TimeoutPolicy};

/// Runs capture requests against a [`Loader`].
pub struct Driver<L: Loader> {
    config: CaptureConfig,
    loader: L,
}

struct Completion {
    bytes_written: u64,
    timed_out: bool,
}

impl<L: Loader> Driver<L> {
    pub fn new(config: CaptureConfig, loader: L) -> Self {
        Self { config, loader }
    }

    /// Load, wait for a stable frame, capture and write `request.output_path`.
    pub fn run(&self, request: &CaptureRequest) -> CaptureResult {
        info!(
            "capturing {}x{} {:?} to {}",
            request.width,
            request.height,
            request.title,
            request.output_path.display()
        );
        match self.execute(request) {
            Ok(done) if done.timed_out => {
                warn!(
                    "rendering did not settle within {}ms, wrote best-effort capture ({} bytes)",
                    self.config.timeout_ms, done.bytes_written
                );
                CaptureResult::timed_out(done.bytes_written)
            }
            Ok(done) => {
                info!("wrote {} bytes to {}", done.bytes_written, request.output_path.display());
                CaptureResult::succeeded(done.bytes_written)
            }
            Err(e) => {
                warn!("capture failed: {}", e);
                CaptureResult::failed(e.kind())
            }
        }
    }

    fn execute(&self, request: &CaptureRequest) -> Result<Completion> {
        let mut surface = RenderSurface::create(
            request.width,
            request.height,
            &request.title,
            self.config.background,
        )?;
        let mut page = Page::new();
        let mut detector = CompletionDetector::new(
            Duration::from_millis(self.config.settle_ms),
            Duration::from_millis(self.config.timeout_ms),
        );

        let mut events = self.loader.load(&surface, &request.source);
        detector.begin(Instant::now());
        let permit = self.pump(&mut events, &mut surface, &mut page, &mut detector);
        drop(events);
        let permit = permit?;

        if permit.is_best_effort() && self.config.timeout_policy == TimeoutPolicy::Fail {
            return Err(Error::RenderTimeout(self.config.timeout_ms));
        }

        let frame = capture::capture(&surface, &permit)?;
        surface.destroy();
        let bytes_written = encode::write_png(&frame, &request.output_path)?;
        Ok(Completion {
            bytes_written,
            timed_out: permit.is_best_effort(),
        })
    }

    fn pump<S: EventSource>(
        &self,
        events: &mut S,
        surface: &mut RenderSurface,
        page: &mut Page,
        detector: &mut CompletionDetector,
    ) -> Result<CapturePermit> {
        let tick = Duration::from_millis(self.config.tick_ms.max(1));
        let mut closed = false;

        loop {
            let now = Instant::now();
            if detector.poll(now).is_terminal() {
                break;
            }
            let wait = detector
                .next_deadline()
                .map_or(tick, |d| d.saturating_duration_since(now).min(tick));

            if closed {
                thread::sleep(wait);
                continue;
            }
            match events.next_event(wait) {
                Pump::Event(event) => self.dispatch(event, surface, page, detector)?,
                Pump::Idle => {}
                Pump::Closed => {
                    if detector.state() == RenderState::Loading {
                        return Err(Error::LoadFailed(
                            "content source closed before the document finished loading".into(),
                        ));
                    }
                    debug!("content source closed");
                    closed = true;
                }
            }
        }

        detector.capture_permit().ok_or_else(|| {
            Error::CaptureFailed(format!("no capture permit in state {:?}", detector.state()))
        })
    }

    fn dispatch(
        &self,
        event: PageEvent,
        surface: &mut RenderSurface,
        page: &mut Page,
        detector: &mut CompletionDetector,
    ) -> Result<()> {
        let repaint = match event {
            PageEvent::Navigated { url } => {
                debug!("navigated to {}", url);
                false
            }
            PageEvent::DocumentParsed { html, base_url } => {
                debug!("document parsed ({} bytes, base {:?})", html.len(), base_url.as_ref().map(|u| u.as_str()));
                page.set_document(&html);
                true
            }
            PageEvent::StylesheetLoaded { href, css } => {
                debug!("stylesheet {} loaded", href);
                page.add_stylesheet(&css);
                true
            }
            PageEvent::ImageLoaded { src, image } => {
                debug!("image {} loaded ({}x{})", src, image.width(), image.height());
                page.add_image(&src, image);
                true
            }
            PageEvent::ScriptMutations { mutations, title } => {
                let changed_title = title.is_some();
                if let Some(title) = title {
                    page.set_title(title);
                }
                page.apply_mutations(mutations) > 0 || changed_title
            }
            PageEvent::Console { level, text } => {
                debug!("console.{}: {}", level, text);
                false
            }
            PageEvent::LoadFinished => {
                debug!("load finished for {:?}", page.title().unwrap_or(surface.title()));
                detector.document_loaded(Instant::now());
                false
            }
            PageEvent::LoadFailed { reason } => return Err(Error::LoadFailed(reason)),
        };

        if repaint {
            let list = page.display_list(surface.viewport(), self.config.background);
            let report = surface.present(&list)?;
            detector.record_activity(Instant::now());
            debug!(
                "frame {} presented (changed: {})",
                report.generation, report.changed
            );
        }
        Ok(())
    }
}
