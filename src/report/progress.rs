//! Progress events and the observer interface.
//!
//! Events are emitted by the measurement phases while they run. Observers
//! must not block; they are called inline from the measuring task.

use std::sync::Arc;

use crate::scoring::Rating;
use crate::session::{Phase, PhaseStatus, Session};

/// Incremental progress within one phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// 0..=100, non-decreasing within a phase.
    pub progress_percent: f64,
    /// Current speed in Mbps, or the latest ping in ms for latency.
    pub instantaneous_metric: f64,
}

/// Callback interface for observers of a run.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);

    fn on_phase_status(&self, _phase: Phase, _status: PhaseStatus) {}

    fn on_run_complete(&self, _session: &Session, _rating: &Rating) {}
}

impl<R: ProgressReporter + ?Sized> ProgressReporter for Arc<R> {
    fn on_progress(&self, event: ProgressEvent) {
        (**self).on_progress(event)
    }

    fn on_phase_status(&self, phase: Phase, status: PhaseStatus) {
        (**self).on_phase_status(phase, status)
    }

    fn on_run_complete(&self, session: &Session, rating: &Rating) {
        (**self).on_run_complete(session, rating)
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Emits the events of one phase, keeping the reported percentage
/// monotonic and within 0..=100.
pub struct PhaseProgress<'a> {
    phase: Phase,
    reporter: &'a dyn ProgressReporter,
    last_percent: Option<f64>,
    last_metric: f64,
}

impl<'a> PhaseProgress<'a> {
    pub fn new(phase: Phase, reporter: &'a dyn ProgressReporter) -> Self {
        Self { phase, reporter, last_percent: None, last_metric: 0.0 }
    }

    /// Report `percent` complete. A missing metric repeats the last one.
    pub fn report(&mut self, percent: f64, metric: Option<f64>) {
        let floor = self.last_percent.unwrap_or(0.0);
        let percent = if percent.is_finite() { percent } else { floor };
        let percent = percent.clamp(floor, 100.0);

        if let Some(metric) = metric.filter(|m| m.is_finite()) {
            self.last_metric = metric;
        }

        self.last_percent = Some(percent);
        self.reporter.on_progress(ProgressEvent {
            phase: self.phase,
            progress_percent: percent,
            instantaneous_metric: self.last_metric,
        });
    }

    /// Emit a closing 100% event unless one was already sent.
    pub fn finish(&mut self, metric: Option<f64>) {
        if self.last_percent.is_some_and(|p| p >= 100.0) {
            return;
        }
        self.report(100.0, metric);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records everything it is told, for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingReporter {
        pub events: Mutex<Vec<ProgressEvent>>,
        pub statuses: Mutex<Vec<(Phase, PhaseStatus)>>,
        pub completions: Mutex<Vec<(Session, Rating)>>,
    }

    impl RecordingReporter {
        pub(crate) fn events_for(&self, phase: Phase) -> Vec<ProgressEvent> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.phase == phase)
                .copied()
                .collect()
        }
    }

    impl ProgressReporter for RecordingReporter {
        fn on_progress(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }

        fn on_phase_status(&self, phase: Phase, status: PhaseStatus) {
            self.statuses.lock().unwrap().push((phase, status));
        }

        fn on_run_complete(&self, session: &Session, rating: &Rating) {
            self.completions
                .lock()
                .unwrap()
                .push((session.clone(), rating.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingReporter;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_finish_emits_closing_event_once() {
        let reporter = RecordingReporter::default();
        let mut progress = PhaseProgress::new(Phase::Download, &reporter);

        progress.report(40.0, Some(12.0));
        progress.finish(None);
        progress.finish(None);

        let events = reporter.events_for(Phase::Download);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].progress_percent, 100.0);
        assert_eq!(events[1].instantaneous_metric, 12.0);
    }

    #[test]
    fn test_finish_after_full_progress_is_silent() {
        let reporter = RecordingReporter::default();
        let mut progress = PhaseProgress::new(Phase::Upload, &reporter);

        progress.report(100.0, Some(3.0));
        progress.finish(Some(4.0));

        assert_eq!(reporter.events_for(Phase::Upload).len(), 1);
    }

    #[test]
    fn test_regressions_and_overshoot_are_clamped() {
        let reporter = RecordingReporter::default();
        let mut progress = PhaseProgress::new(Phase::Latency, &reporter);

        progress.report(50.0, Some(9.0));
        progress.report(30.0, None);
        progress.report(180.0, None);

        let percents: Vec<f64> = reporter
            .events_for(Phase::Latency)
            .iter()
            .map(|e| e.progress_percent)
            .collect();
        assert_eq!(percents, vec![50.0, 50.0, 100.0]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Whatever the raw inputs, emitted percentages never decrease and
        /// stay within 0..=100.
        #[test]
        fn emitted_progress_is_monotonic(
            inputs in prop::collection::vec(-50.0f64..250.0, 1..40)
        ) {
            let reporter = RecordingReporter::default();
            let mut progress = PhaseProgress::new(Phase::Download, &reporter);
            for p in &inputs {
                progress.report(*p, None);
            }
            progress.finish(None);

            let events = reporter.events_for(Phase::Download);
            for pair in events.windows(2) {
                prop_assert!(pair[0].progress_percent <= pair[1].progress_percent);
            }
            for e in &events {
                prop_assert!((0.0..=100.0).contains(&e.progress_percent));
            }
            prop_assert_eq!(events.last().map(|e| e.progress_percent), Some(100.0));
        }
    }
}
