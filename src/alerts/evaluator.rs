use crate::aggregator::Average;
use crate::alerts::CooldownGate;
use crate::events::{AlertEvent, HealthStatus, Timestamp};
use crate::metrics::{Metric, ThresholdRange};
use chrono::Duration;
use log::{debug, info};
use std::collections::HashMap;

/// Threshold table plus per-metric alert cooldown
///
/// Per metric the evaluator cycles Quiet → Alerting → Quiet-with-cooldown →
/// Quiet: an abnormal average alerts only while the metric's cooldown gate is
/// open, and emitting closes the gate for one window.
#[derive(Debug)]
pub struct AlertEvaluator {
    thresholds: HashMap<Metric, ThresholdRange>,
    cooldown: CooldownGate,
}

impl Default for AlertEvaluator {
    fn default() -> Self {
        Self::new(
            Metric::ALL
                .iter()
                .map(|&metric| (metric, metric.default_range()))
                .collect(),
            CooldownGate::default().window(),
        )
    }
}

impl AlertEvaluator {
    /// Create an evaluator from a threshold table and cooldown window
    ///
    /// Metrics missing from `thresholds` are never abnormal.
    pub fn new(thresholds: HashMap<Metric, ThresholdRange>, cooldown_window: Duration) -> Self {
        Self {
            thresholds,
            cooldown: CooldownGate::new(cooldown_window),
        }
    }

    pub fn threshold(&self, metric: Metric) -> Option<ThresholdRange> {
        self.thresholds.get(&metric).copied()
    }

    /// Classify an average against the metric's inclusive range
    pub fn evaluate(&self, metric: Metric, average: f64) -> HealthStatus {
        match self.thresholds.get(&metric) {
            Some(range) if !range.contains(average) => HealthStatus::Abnormal,
            _ => HealthStatus::Normal,
        }
    }

    /// Atomically decide whether an alert for `metric` may go out at `now`
    ///
    /// A `true` answer has already recorded `now` as the metric's last alert.
    pub fn should_emit(&self, metric: Metric, now: Timestamp) -> bool {
        self.cooldown.should_emit(metric, now)
    }

    /// Evaluate an average and build the alert event if one is due
    ///
    /// # Returns
    ///
    /// `Some(AlertEvent)` when the average is abnormal and the cooldown gate
    /// was open; the gate is closed in the same step.
    pub fn check(&self, metric: Metric, average: &Average, now: Timestamp) -> Option<AlertEvent> {
        if self.evaluate(metric, average.value) == HealthStatus::Normal {
            return None;
        }

        if !self.should_emit(metric, now) {
            debug!("Alert for {} suppressed by cooldown", metric);
            return None;
        }

        info!(
            "Abnormal {} average {:.2} over {} readings",
            metric, average.value, average.count
        );
        Some(AlertEvent {
            metric,
            average: average.value,
            count: average.count,
            timestamp: now,
        })
    }

    /// Forget all cooldown state
    pub fn reset(&self) {
        self.cooldown.reset();
    }

    pub fn cooldown(&self) -> &CooldownGate {
        &self.cooldown
    }
}
