//! Producer side of the exchange: scale, encrypt, serialize

use crate::error::CryptoError;
use crate::ingest::ExternalReading;
use crate::metrics::Metric;
use crate::paillier::PublicKey;
use log::warn;
use num_bigint::BigUint;
use num_traits::FromPrimitive;
use serde_json::Value;

/// Convert a raw reading to the fixed-point integer the monitor expects
///
/// The value is multiplied by the metric's scale and rounded to the nearest
/// integer, so 37.64 °C becomes 376.
///
/// # Errors
///
/// Returns `CryptoError::PlaintextOutOfRange` for negative or non-finite
/// values, which have no plaintext encoding.
pub fn scale_value(metric: Metric, value: f64) -> Result<BigUint, CryptoError> {
    if !value.is_finite() || value < 0.0 {
        return Err(CryptoError::PlaintextOutOfRange);
    }
    let scaled = (value * f64::from(metric.scale())).round();
    BigUint::from_f64(scaled).ok_or(CryptoError::PlaintextOutOfRange)
}

/// Whether a raw value is physiologically plausible, warning when it is not
pub fn check_plausible(metric: Metric, value: f64) -> bool {
    let range = metric.plausible_range();
    let plausible = range.contains(value);
    if !plausible {
        warn!(
            "{} reading {} {} is outside the plausible range {}-{}",
            metric.label(),
            value,
            metric.unit(),
            range.low,
            range.high
        );
    }
    plausible
}

/// Encrypt a raw reading into the wire form sent to the monitor
///
/// Implausible values are still encrypted; the warning is only advisory.
pub fn encrypt_reading(
    public_key: &PublicKey,
    metric: Metric,
    value: f64,
    sensor_id: Option<String>,
) -> Result<ExternalReading, CryptoError> {
    check_plausible(metric, value);
    let plaintext = scale_value(metric, value)?;
    let serialized = public_key.encrypt(&plaintext)?.serialize();

    Ok(ExternalReading {
        metric: Some(metric.as_str().to_string()),
        ciphertext: Some(Value::String(serialized.ciphertext)),
        exponent: Some(i64::from(serialized.exponent)),
        sensor_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::parse_reading;
    use crate::paillier::test_keypair;

    #[test]
    fn test_scale_value() {
        assert_eq!(scale_value(Metric::HeartRate, 72.0).unwrap(), BigUint::from(72u32));
        assert_eq!(scale_value(Metric::HeartRate, 72.6).unwrap(), BigUint::from(73u32));
        assert_eq!(
            scale_value(Metric::Temperature, 37.64).unwrap(),
            BigUint::from(376u32)
        );
        assert_eq!(scale_value(Metric::Spo2, 0.0).unwrap(), BigUint::from(0u32));
    }

    #[test]
    fn test_scale_rejects_unencodable_values() {
        for value in [-1.0, f64::NAN, f64::INFINITY] {
            assert_eq!(
                scale_value(Metric::HeartRate, value),
                Err(CryptoError::PlaintextOutOfRange)
            );
        }
    }

    #[test]
    fn test_plausibility() {
        assert!(check_plausible(Metric::HeartRate, 72.0));
        assert!(!check_plausible(Metric::HeartRate, 250.0));
        assert!(!check_plausible(Metric::Spo2, 55.0));
        assert!(check_plausible(Metric::Temperature, 36.6));
        assert!(!check_plausible(Metric::Temperature, 50.0));
    }

    #[test]
    fn test_encrypted_reading_is_accepted_by_ingestion() {
        let pair = test_keypair();
        let reading =
            encrypt_reading(&pair.public, Metric::Temperature, 37.6, Some("probe-1".into()))
                .unwrap();
        assert_eq!(reading.metric.as_deref(), Some("temperature"));
        assert_eq!(reading.sensor_id.as_deref(), Some("probe-1"));

        let (metric, ciphertext) = parse_reading(&reading, &pair.public).unwrap();
        assert_eq!(metric, Metric::Temperature);
        assert_eq!(pair.private.decrypt(&ciphertext).unwrap(), BigUint::from(376u32));
    }

    #[test]
    fn test_implausible_reading_is_still_encrypted() {
        let pair = test_keypair();
        let reading = encrypt_reading(&pair.public, Metric::HeartRate, 250.0, None).unwrap();
        let (_, ciphertext) = parse_reading(&reading, &pair.public).unwrap();
        assert_eq!(pair.private.decrypt(&ciphertext).unwrap(), BigUint::from(250u32));
    }
}
