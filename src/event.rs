//! Lifecycle events flowing from the content stack to the driver loop, and
//! the seams that let tests replace the real loader.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::RgbaImage;
use url::Url;

use crate::rendering::StyleMutation;
use crate::surface::RenderSurface;
use crate::Source;

/// Progress reported by a load, in the order a load produces it.
#[derive(Debug, Clone)]
pub enum PageEvent {
    /// Navigation committed to `url`
    Navigated { url: String },
    /// The main document arrived and was parsed
    DocumentParsed { html: String, base_url: Option<Url> },
    /// A linked stylesheet arrived
    StylesheetLoaded { href: String, css: String },
    /// An `<img>` arrived and was decoded; `src` is the attribute as written
    ImageLoaded { src: String, image: Arc<RgbaImage> },
    /// Scripts changed element styles or the document title
    ScriptMutations {
        mutations: Vec<StyleMutation>,
        title: Option<String>,
    },
    /// Script console output
    Console { level: String, text: String },
    /// Document and all subresources are complete
    LoadFinished,
    /// The load cannot complete
    LoadFailed { reason: String },
}

/// Result of waiting on an [`EventSource`].
#[derive(Debug)]
pub enum Pump {
    Event(PageEvent),
    /// Nothing arrived before the timeout
    Idle,
    /// The source will never produce another event
    Closed,
}

/// Where the driver loop gets its events from.
pub trait EventSource {
    /// Wait up to `timeout` for the next event.
    fn next_event(&mut self, timeout: Duration) -> Pump;
}

/// Starts loads. The returned handle streams that load's events; dropping
/// it abandons the load.
pub trait Loader {
    type Handle: EventSource;

    fn load(&self, surface: &RenderSurface, source: &Source) -> Self::Handle;
}

/// A deterministic event source replaying a fixed script of
/// `(delay, event)` steps, each delay measured from the previous step.
///
/// Use it as a [`Loader`] to drive the capture pipeline without a network
/// or a script engine.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    steps: Vec<(Duration, PageEvent)>,
    close_when_done: bool,
    cursor: usize,
    last: Option<Instant>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `event` `delay` after the previous step.
    pub fn then(mut self, delay: Duration, event: PageEvent) -> Self {
        self.steps.push((delay, event));
        self
    }

    /// Report `Closed` once all steps were delivered. Without this the
    /// source stays open and idle forever.
    pub fn closing(mut self) -> Self {
        self.close_when_done = true;
        self
    }
}

impl EventSource for ScriptedSource {
    fn next_event(&mut self, timeout: Duration) -> Pump {
        let now = Instant::now();
        let anchor = *self.last.get_or_insert(now);

        let Some((delay, event)) = self.steps.get(self.cursor) else {
            if self.close_when_done {
                return Pump::Closed;
            }
            thread::sleep(timeout);
            return Pump::Idle;
        };

        let due = anchor + *delay;
        if due > now + timeout {
            thread::sleep(timeout);
            return Pump::Idle;
        }
        thread::sleep(due.saturating_duration_since(now));
        self.cursor += 1;
        self.last = Some(due.max(now));
        Pump::Event(event.clone())
    }
}

impl Loader for ScriptedSource {
    type Handle = ScriptedSource;

    fn load(&self, _surface: &RenderSurface, _source: &Source) -> Self::Handle {
        let mut handle = self.clone();
        handle.cursor = 0;
        handle.last = None;
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_in_order_then_closes() {
        let mut src = ScriptedSource::new()
            .then(Duration::ZERO, PageEvent::Navigated { url: "about:blank".into() })
            .then(Duration::from_millis(5), PageEvent::LoadFinished)
            .closing();

        assert!(matches!(src.next_event(Duration::from_millis(50)), Pump::Event(PageEvent::Navigated { .. })));
        assert!(matches!(src.next_event(Duration::from_millis(50)), Pump::Event(PageEvent::LoadFinished)));
        assert!(matches!(src.next_event(Duration::from_millis(50)), Pump::Closed));
    }

    #[test]
    fn reports_idle_before_a_step_is_due() {
        let mut src = ScriptedSource::new().then(Duration::from_millis(200), PageEvent::LoadFinished);
        assert!(matches!(src.next_event(Duration::from_millis(1)), Pump::Idle));
    }
}
