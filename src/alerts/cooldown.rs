use crate::events::Timestamp;
use crate::metrics::Metric;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default minimum gap between two alerts for the same metric
pub const DEFAULT_COOLDOWN_SECONDS: i64 = 300;

/// Per-metric alert cooldown gate
///
/// Remembers when each metric last alerted and refuses a new alert until the
/// window has elapsed. The check and the timestamp update happen under one
/// lock per metric, so two concurrent evaluations can never both emit.
#[derive(Debug)]
pub struct CooldownGate {
    /// Minimum time between two alerts for one metric
    window: Duration,
    /// Time of the last emitted alert, per metric
    last_alert: HashMap<Metric, Mutex<Option<Timestamp>>>,
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_COOLDOWN_SECONDS))
    }
}

impl CooldownGate {
    /// Create a gate with the given cooldown window
    ///
    /// # Arguments
    ///
    /// * `window` - Minimum time between two alerts for the same metric
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_alert: Metric::ALL
                .iter()
                .map(|&metric| (metric, Mutex::new(None)))
                .collect(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether an alert for `metric` may go out at `now`
    ///
    /// Returns `true` when the metric never alerted or its last alert is at
    /// least one window old, and records `now` as the new last alert time in
    /// the same step.
    pub fn should_emit(&self, metric: Metric, now: Timestamp) -> bool {
        let mut last = self.lock(metric);
        let open = match *last {
            None => true,
            Some(previous) => now - previous >= self.window,
        };
        if open {
            *last = Some(now);
        }
        open
    }

    /// Reopen the gate for an alert that could not be handed off
    ///
    /// Only clears the metric when `emitted_at` is still its last alert, so a
    /// newer alert recorded in between is kept.
    pub fn release(&self, metric: Metric, emitted_at: Timestamp) -> bool {
        let mut last = self.lock(metric);
        if *last == Some(emitted_at) {
            *last = None;
            true
        } else {
            false
        }
    }

    /// When the metric last alerted, if ever since the last reset
    pub fn last_alert(&self, metric: Metric) -> Option<Timestamp> {
        *self.lock(metric)
    }

    /// Time left before `metric` may alert again
    ///
    /// # Returns
    ///
    /// `None` when the gate is open at `now`
    pub fn remaining(&self, metric: Metric, now: Timestamp) -> Option<Duration> {
        let last = (*self.lock(metric))?;
        let elapsed = now - last;
        (elapsed < self.window).then(|| self.window - elapsed)
    }

    /// Forget every recorded alert
    pub fn reset(&self) {
        for metric in Metric::ALL {
            *self.lock(metric) = None;
        }
    }

    fn lock(&self, metric: Metric) -> MutexGuard<'_, Option<Timestamp>> {
        self.last_alert[&metric]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_first_alert_is_allowed() {
        let gate = CooldownGate::default();
        let now = Utc::now();

        assert!(gate.should_emit(Metric::HeartRate, now));
        assert_eq!(gate.last_alert(Metric::HeartRate), Some(now));
    }

    #[test]
    fn test_release_reopens_only_the_matching_alert() {
        let gate = CooldownGate::default();
        let now = Utc::now();

        assert!(gate.should_emit(Metric::Spo2, now));
        assert!(!gate.release(Metric::Spo2, now - Duration::seconds(1)));
        assert!(!gate.should_emit(Metric::Spo2, now + Duration::seconds(1)));

        assert!(gate.release(Metric::Spo2, now));
        assert_eq!(gate.last_alert(Metric::Spo2), None);
        assert!(gate.should_emit(Metric::Spo2, now + Duration::seconds(1)));
    }

    #[test]
    fn test_second_alert_within_window_is_suppressed() {
        let gate = CooldownGate::default();
        let now = Utc::now();

        assert!(gate.should_emit(Metric::HeartRate, now));
        assert!(!gate.should_emit(Metric::HeartRate, now + Duration::seconds(120)));
        assert!(!gate.should_emit(Metric::HeartRate, now + Duration::seconds(299)));

        // Suppressed attempts do not extend the window
        assert_eq!(gate.last_alert(Metric::HeartRate), Some(now));
    }

    #[test]
    fn test_alert_allowed_once_window_elapses() {
        let gate = CooldownGate::default();
        let now = Utc::now();

        assert!(gate.should_emit(Metric::Spo2, now));
        let later = now + Duration::seconds(DEFAULT_COOLDOWN_SECONDS);
        assert!(gate.should_emit(Metric::Spo2, later));
        assert_eq!(gate.last_alert(Metric::Spo2), Some(later));
    }

    #[test]
    fn test_metrics_have_independent_windows() {
        let gate = CooldownGate::default();
        let now = Utc::now();

        assert!(gate.should_emit(Metric::HeartRate, now));
        assert!(gate.should_emit(Metric::Temperature, now));
        assert!(!gate.should_emit(Metric::HeartRate, now));
    }

    #[test]
    fn test_remaining_time() {
        let gate = CooldownGate::new(Duration::seconds(60));
        let now = Utc::now();

        assert_eq!(gate.remaining(Metric::HeartRate, now), None);
        gate.should_emit(Metric::HeartRate, now);
        assert_eq!(
            gate.remaining(Metric::HeartRate, now + Duration::seconds(20)),
            Some(Duration::seconds(40))
        );
        assert_eq!(
            gate.remaining(Metric::HeartRate, now + Duration::seconds(60)),
            None
        );
    }

    #[test]
    fn test_reset_reopens_every_gate() {
        let gate = CooldownGate::default();
        let now = Utc::now();

        for metric in Metric::ALL {
            assert!(gate.should_emit(metric, now));
        }
        gate.reset();
        gate.reset();
        for metric in Metric::ALL {
            assert_eq!(gate.last_alert(metric), None);
            assert!(gate.should_emit(metric, now));
        }
    }

    #[test]
    fn test_concurrent_evaluations_emit_once() {
        let gate = Arc::new(CooldownGate::default());
        let emitted = Arc::new(AtomicUsize::new(0));
        let now = Utc::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let emitted = Arc::clone(&emitted);
                std::thread::spawn(move || {
                    if gate.should_emit(Metric::HeartRate, now) {
                        emitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(emitted.load(Ordering::SeqCst), 1);
    }
}

// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use chrono::Utc;
    use quickcheck_macros::quickcheck;

    // Two alerts less than one window apart: only the first goes out
    #[quickcheck]
    fn prop_cooldown_suppresses_repeats(gap_seconds: u16) -> bool {
        let gate = CooldownGate::default();
        let now = Utc::now();
        let gap = i64::from(gap_seconds) % (2 * DEFAULT_COOLDOWN_SECONDS);

        let first = gate.should_emit(Metric::Temperature, now);
        let second = gate.should_emit(Metric::Temperature, now + Duration::seconds(gap));

        first && (second == (gap >= DEFAULT_COOLDOWN_SECONDS))
    }
}
