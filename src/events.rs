//! Core event and status types shared across the monitor
//!
//! This module defines the alert event handed to notification collaborators
//! and the per-metric status reported to status queries.

use crate::metrics::Metric;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Outcome of checking an average against its threshold range
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HealthStatus {
    /// Average within range, or no range configured
    Normal,
    /// Average below `low` or above `high`
    Abnormal,
}

/// Status reported for a metric by a status query
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MetricStatus {
    Normal,
    Abnormal,
    /// No readings since the last reset
    #[serde(rename = "No data")]
    NoData,
    /// Readings exist but the running sum could not be decrypted
    Unavailable,
}

impl From<HealthStatus> for MetricStatus {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Normal => MetricStatus::Normal,
            HealthStatus::Abnormal => MetricStatus::Abnormal,
        }
    }
}

/// Abnormal-average event emitted to the notification collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvent {
    pub metric: Metric,
    /// Decrypted average that fell outside the normal range
    pub average: f64,
    /// Readings contributing to the average
    pub count: u64,
    pub timestamp: Timestamp,
}

impl AlertEvent {
    /// One-line subject, e.g. `HEALTH ALERT: HEART RATE ABNORMAL`
    pub fn subject(&self) -> String {
        format!(
            "HEALTH ALERT: {} ABNORMAL",
            self.metric.label().to_uppercase()
        )
    }

    /// Multi-line notification body
    pub fn body(&self) -> String {
        format!(
            "URGENT HEALTH ALERT\n\n\
             Metric: {}\n\
             Current Average: {:.2} {}\n\
             Total Readings: {}\n\
             Time: {}\n\n\
             Please check the patient immediately!",
            self.metric.label(),
            self.average,
            self.metric.unit(),
            self.count,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event() -> AlertEvent {
        AlertEvent {
            metric: Metric::HeartRate,
            average: 160.0,
            count: 3,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_metric_status_serialization() {
        assert_eq!(
            serde_json::to_string(&MetricStatus::Normal).unwrap(),
            "\"Normal\""
        );
        assert_eq!(
            serde_json::to_string(&MetricStatus::Abnormal).unwrap(),
            "\"Abnormal\""
        );
        assert_eq!(
            serde_json::to_string(&MetricStatus::NoData).unwrap(),
            "\"No data\""
        );
        assert_eq!(
            serde_json::to_string(&MetricStatus::Unavailable).unwrap(),
            "\"Unavailable\""
        );
    }

    #[test]
    fn test_alert_event_serialization() {
        let event = sample_event();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"metric\":\"heart_rate\""));

        let deserialized: AlertEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }

    #[test]
    fn test_alert_subject_and_body() {
        let event = sample_event();
        assert_eq!(event.subject(), "HEALTH ALERT: HEART RATE ABNORMAL");

        let body = event.body();
        assert!(body.contains("Metric: Heart Rate"));
        assert!(body.contains("Current Average: 160.00 bpm"));
        assert!(body.contains("Total Readings: 3"));
        assert!(body.contains("2026-03-01 08:30:00 UTC"));
    }
}
