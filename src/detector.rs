//! Render completion detection.
//!
//! Rendering engines never announce "final pixels ready", so the detector
//! treats a quiet window with no paint/layout activity after the document
//! finished loading as stable. A single deadline measured from
//! [`CompletionDetector::begin`] bounds the whole wait.
//!
//! ```text
//! Idle --begin--> Loading --document_loaded--> ScriptsSettling --quiet for debounce--> Stable
//!   \________________\___________________________\--max_wait elapsed--> TimedOut
//! ```
//!
//! All methods take the current instant explicitly so the state machine can
//! be driven deterministically in tests.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Loading,
    ScriptsSettling,
    Stable,
    TimedOut,
}

impl RenderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RenderState::Stable | RenderState::TimedOut)
    }
}

/// Proof that the detector reached a state from which capture is allowed.
///
/// Only [`CompletionDetector::capture_permit`] can produce one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePermit {
    state: RenderState,
}

impl CapturePermit {
    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Whether this permit comes from a timeout rather than a stable frame
    pub fn is_best_effort(&self) -> bool {
        self.state == RenderState::TimedOut
    }
}

#[derive(Debug, Clone)]
pub struct CompletionDetector {
    state: RenderState,
    debounce: Duration,
    max_wait: Duration,
    started: Option<Instant>,
    last_activity: Option<Instant>,
    activity: u64,
}

impl CompletionDetector {
    pub fn new(debounce: Duration, max_wait: Duration) -> Self {
        Self {
            state: RenderState::Idle,
            debounce,
            max_wait,
            started: None,
            last_activity: None,
            activity: 0,
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Number of paint/layout events recorded so far
    pub fn activity_count(&self) -> u64 {
        self.activity
    }

    /// `Idle → Loading`; starts the max-wait clock. Ignored otherwise.
    pub fn begin(&mut self, now: Instant) {
        if self.state == RenderState::Idle {
            self.state = RenderState::Loading;
            self.started = Some(now);
            log::debug!("render state: Idle -> Loading");
        }
    }

    /// `Loading → ScriptsSettling` on "document finished loading".
    pub fn document_loaded(&mut self, now: Instant) {
        if self.state == RenderState::Loading {
            self.state = RenderState::ScriptsSettling;
            self.last_activity = Some(now);
            log::debug!("render state: Loading -> ScriptsSettling");
        }
    }

    /// A paint or layout happened. While settling this restarts the quiet
    /// window.
    pub fn record_activity(&mut self, now: Instant) {
        if self.state.is_terminal() {
            return;
        }
        self.activity += 1;
        if self.state == RenderState::ScriptsSettling {
            self.last_activity = Some(now);
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.started.map(|s| s + self.max_wait)
    }

    fn quiet_until(&self) -> Option<Instant> {
        match self.state {
            RenderState::ScriptsSettling => self.last_activity.map(|t| t + self.debounce),
            _ => None,
        }
    }

    /// Advance time-based transitions and return the current state.
    pub fn poll(&mut self, now: Instant) -> RenderState {
        if self.state.is_terminal() || self.state == RenderState::Idle {
            return self.state;
        }

        let deadline = self.deadline();
        if let Some(quiet) = self.quiet_until() {
            // a window that closed before the deadline wins even if we poll late
            let within_deadline = deadline.map_or(true, |d| quiet <= d);
            if now >= quiet && within_deadline {
                self.state = RenderState::Stable;
                log::debug!("render state: ScriptsSettling -> Stable after {} activity events", self.activity);
                return self.state;
            }
        }
        if deadline.is_some_and(|d| now >= d) {
            log::debug!("render state: {:?} -> TimedOut", self.state);
            self.state = RenderState::TimedOut;
        }
        self.state
    }

    /// The earliest instant at which [`poll`](Self::poll) could change state.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.state.is_terminal() {
            return None;
        }
        match (self.quiet_until(), self.deadline()) {
            (Some(q), Some(d)) => Some(q.min(d)),
            (q, d) => q.or(d),
        }
    }

    pub fn capture_permit(&self) -> Option<CapturePermit> {
        self.state.is_terminal().then_some(CapturePermit { state: self.state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn happy_path_reaches_stable_after_quiet_window() {
        let t0 = Instant::now();
        let mut d = CompletionDetector::new(ms(50), ms(1000));
        assert_eq!(d.poll(t0), RenderState::Idle);
        assert!(d.capture_permit().is_none());

        d.begin(t0);
        assert_eq!(d.poll(t0 + ms(10)), RenderState::Loading);
        d.document_loaded(t0 + ms(20));
        assert_eq!(d.poll(t0 + ms(60)), RenderState::ScriptsSettling);
        assert_eq!(d.poll(t0 + ms(70)), RenderState::Stable);

        let permit = d.capture_permit().unwrap();
        assert_eq!(permit.state(), RenderState::Stable);
        assert!(!permit.is_best_effort());
    }

    #[test]
    fn activity_restarts_the_window() {
        let t0 = Instant::now();
        let mut d = CompletionDetector::new(ms(50), ms(1000));
        d.begin(t0);
        d.document_loaded(t0);
        d.record_activity(t0 + ms(40));
        assert_eq!(d.poll(t0 + ms(60)), RenderState::ScriptsSettling);
        assert_eq!(d.next_deadline(), Some(t0 + ms(90)));
        assert_eq!(d.poll(t0 + ms(90)), RenderState::Stable);
        assert_eq!(d.activity_count(), 1);
    }

    #[test]
    fn activity_while_loading_does_not_settle() {
        let t0 = Instant::now();
        let mut d = CompletionDetector::new(ms(10), ms(100));
        d.begin(t0);
        d.record_activity(t0 + ms(5));
        assert_eq!(d.poll(t0 + ms(50)), RenderState::Loading);
        assert_eq!(d.next_deadline(), Some(t0 + ms(100)));
    }

    #[test]
    fn never_loading_times_out() {
        let t0 = Instant::now();
        let mut d = CompletionDetector::new(ms(10), ms(100));
        d.begin(t0);
        assert_eq!(d.poll(t0 + ms(99)), RenderState::Loading);
        assert_eq!(d.poll(t0 + ms(100)), RenderState::TimedOut);
        assert!(d.capture_permit().unwrap().is_best_effort());
        // terminal states stick
        d.document_loaded(t0 + ms(101));
        assert_eq!(d.poll(t0 + ms(500)), RenderState::TimedOut);
    }

    #[test]
    fn continuous_activity_times_out() {
        let t0 = Instant::now();
        let mut d = CompletionDetector::new(ms(30), ms(100));
        d.begin(t0);
        d.document_loaded(t0);
        for i in 1..=10 {
            d.record_activity(t0 + ms(i * 20));
        }
        assert_eq!(d.poll(t0 + ms(110)), RenderState::TimedOut);
    }

    #[test]
    fn quiet_window_closing_before_deadline_wins_on_late_poll() {
        let t0 = Instant::now();
        let mut d = CompletionDetector::new(ms(10), ms(100));
        d.begin(t0);
        d.document_loaded(t0 + ms(20));
        assert_eq!(d.poll(t0 + ms(500)), RenderState::Stable);
    }

    #[test]
    fn begin_is_ignored_once_started() {
        let t0 = Instant::now();
        let mut d = CompletionDetector::new(ms(10), ms(100));
        d.begin(t0);
        d.begin(t0 + ms(90));
        assert_eq!(d.poll(t0 + ms(100)), RenderState::TimedOut);
    }
}
