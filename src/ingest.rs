//! Validation of readings arriving from untrusted producers
//!
//! A reading is only handed to the aggregator once its metric is known and
//! its ciphertext has been rebuilt under the service's public key. Anything
//! else is rejected here, before any aggregate is touched.

use crate::error::ValidationError;
use crate::metrics::Metric;
use crate::paillier::{Ciphertext, PublicKey};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reading as sent over the wire by a producer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExternalReading {
    /// Metric wire name; `type` is accepted as an alias
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    /// Ciphertext as a decimal string, or a JSON integer for small values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exponent: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,
}

/// Parse and validate a raw JSON reading
///
/// # Errors
///
/// * `ValidationError::InvalidPayload` - not a JSON object of the expected shape
/// * `ValidationError::MissingField` - no metric or no ciphertext
/// * `ValidationError::UnknownMetric` - metric outside the closed catalogue
/// * `ValidationError::InvalidField` - exponent outside the `i32` range
/// * `ValidationError::Ciphertext` - ciphertext rejected by the public key
pub fn parse_external_reading(
    raw: &str,
    public_key: &PublicKey,
) -> Result<(Metric, Ciphertext), ValidationError> {
    let reading: ExternalReading = serde_json::from_str(raw)?;
    parse_reading(&reading, public_key)
}

/// Validate an already decoded reading
pub fn parse_reading(
    reading: &ExternalReading,
    public_key: &PublicKey,
) -> Result<(Metric, Ciphertext), ValidationError> {
    let name = reading
        .metric
        .as_deref()
        .ok_or(ValidationError::MissingField("metric"))?;
    let metric: Metric = name
        .parse()
        .map_err(|_| ValidationError::UnknownMetric(name.to_string()))?;

    let text = match reading.ciphertext.as_ref() {
        None | Some(Value::Null) => return Err(ValidationError::MissingField("ciphertext")),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Number(number)) => match number.as_u64() {
            Some(value) => value.to_string(),
            None => {
                return Err(ValidationError::InvalidField {
                    field: "ciphertext",
                    reason: "must be a non-negative integer".to_string(),
                })
            }
        },
        Some(_) => {
            return Err(ValidationError::InvalidField {
                field: "ciphertext",
                reason: "must be a decimal string or integer".to_string(),
            })
        }
    };

    let exponent = match reading.exponent {
        None => 0,
        Some(exponent) => {
            i32::try_from(exponent).map_err(|_| ValidationError::InvalidField {
                field: "exponent",
                reason: format!("{} is out of range", exponent),
            })?
        }
    };

    let ciphertext = public_key.ciphertext_from_decimal(&text, exponent)?;

    debug!(
        "Accepted {} reading from {}",
        metric,
        reading.sensor_id.as_deref().unwrap_or("unknown sensor")
    );
    Ok((metric, ciphertext))
}
