//! Known vital-sign metrics
//!
//! The set is closed: readings for any other name are rejected at ingestion.
//! Each metric fixes the fixed-point scale its producers apply before
//! encryption, its default normal range and a plausibility range used to warn
//! about suspicious producer input.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A vital sign tracked by the monitor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Beats per minute
    HeartRate,
    /// Blood-oxygen saturation in percent
    Spo2,
    /// Body temperature in degrees Celsius, one decimal place
    Temperature,
}

/// Inclusive plaintext bounds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThresholdRange {
    pub low: f64,
    pub high: f64,
}

impl ThresholdRange {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Whether `value` lies within `[low, high]`
    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

impl Metric {
    /// Every known metric, in display order
    pub const ALL: [Metric; 3] = [Metric::HeartRate, Metric::Spo2, Metric::Temperature];

    /// Wire name used by producers
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::HeartRate => "heart_rate",
            Metric::Spo2 => "spo2",
            Metric::Temperature => "temperature",
        }
    }

    /// Fixed-point divisor agreed with producers
    ///
    /// Temperature travels as tenths of a degree (37.6 is sent as 376).
    pub fn scale(&self) -> u32 {
        match self {
            Metric::Temperature => 10,
            Metric::HeartRate | Metric::Spo2 => 1,
        }
    }

    /// Default normal range used when the configuration does not override it
    pub fn default_range(&self) -> ThresholdRange {
        match self {
            Metric::HeartRate => ThresholdRange::new(60.0, 100.0),
            Metric::Spo2 => ThresholdRange::new(95.0, 100.0),
            Metric::Temperature => ThresholdRange::new(35.5, 38.0),
        }
    }

    /// Range outside which a raw producer value is probably a sensor fault
    pub fn plausible_range(&self) -> ThresholdRange {
        match self {
            Metric::HeartRate => ThresholdRange::new(30.0, 220.0),
            Metric::Spo2 => ThresholdRange::new(70.0, 100.0),
            Metric::Temperature => ThresholdRange::new(30.0, 45.0),
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::HeartRate => "bpm",
            Metric::Spo2 => "%",
            Metric::Temperature => "°C",
        }
    }

    /// Human-readable label, e.g. "Heart Rate"
    pub fn label(&self) -> &'static str {
        match self {
            Metric::HeartRate => "Heart Rate",
            Metric::Spo2 => "SpO2",
            Metric::Temperature => "Temperature",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no known metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMetric(pub String);

impl fmt::Display for UnknownMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown metric '{}'", self.0)
    }
}

impl std::error::Error for UnknownMetric {}

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .iter()
            .copied()
            .find(|metric| metric.as_str() == s.trim())
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_round_trip() {
        for metric in Metric::ALL {
            assert_eq!(metric.as_str().parse::<Metric>().unwrap(), metric);
            assert_eq!(
                serde_json::to_string(&metric).unwrap(),
                format!("\"{}\"", metric.as_str())
            );
        }
    }

    #[test]
    fn test_unknown_metric_is_rejected() {
        assert_eq!(
            "blood_pressure".parse::<Metric>(),
            Err(UnknownMetric("blood_pressure".to_string()))
        );
        assert!("HEART_RATE".parse::<Metric>().is_err());
        assert!("".parse::<Metric>().is_err());
    }

    #[test]
    fn test_scale_factors() {
        assert_eq!(Metric::HeartRate.scale(), 1);
        assert_eq!(Metric::Spo2.scale(), 1);
        assert_eq!(Metric::Temperature.scale(), 10);
    }

    #[test]
    fn test_default_ranges_are_inclusive() {
        let range = Metric::HeartRate.default_range();
        assert!(range.contains(60.0));
        assert!(range.contains(100.0));
        assert!(!range.contains(59.9));
        assert!(!range.contains(100.1));

        let temperature = Metric::Temperature.default_range();
        assert!(temperature.contains(37.6));
        assert!(!temperature.contains(38.5));
    }
}
