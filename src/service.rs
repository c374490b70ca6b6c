//! Monitor service
//!
//! `MonitorService` owns the key pair, the encrypted aggregator, the alert
//! evaluator and the sending half of the alert channel. Every operation runs
//! its big-integer work on tokio's blocking pool so the async executor never
//! stalls on a modular exponentiation.

use crate::aggregator::{Average, EncryptedAggregator};
use crate::alerts::{AlertEvaluator, AlertSender};
use crate::error::{AggregateError, AlertError, ServiceError};
use crate::events::MetricStatus;
use crate::ingest::{parse_external_reading, parse_reading, ExternalReading};
use crate::keystore::PublicKeyRecord;
use crate::metrics::Metric;
use crate::paillier::{Ciphertext, KeyPair};
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reply to an accepted reading
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadResponse {
    /// Always `"ok"`
    pub status: String,
    pub metric: Metric,
    /// Running average, rounded to two decimals
    pub avg: f64,
    pub count: u64,
    /// Whether this reading raised an alert
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub alert: bool,
}

/// Per-metric entry of a status report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricReport {
    pub count: u64,
    /// Running average rounded to one decimal, `null` without data
    pub average: Option<f64>,
    pub status: MetricStatus,
}

/// Status of every known metric, keyed by wire name
pub type StatusReport = BTreeMap<Metric, MetricReport>;

/// One line of the request loop
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Upload(ExternalReading),
    Status,
    Reset,
    Pubkey,
}

struct Inner {
    keys: KeyPair,
    aggregator: EncryptedAggregator,
    evaluator: AlertEvaluator,
    alerts: Option<AlertSender>,
}

/// Shared handle to the monitor; cloning is cheap
#[derive(Clone)]
pub struct MonitorService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MonitorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorService")
            .field("key", &self.inner.keys.public.fingerprint())
            .field("alerts", &self.inner.alerts.is_some())
            .finish()
    }
}

impl MonitorService {
    /// Create a service
    ///
    /// # Arguments
    ///
    /// * `keys` - Key pair; producers encrypt under its public half
    /// * `evaluator` - Threshold table and cooldown
    /// * `alerts` - Channel to the alert dispatcher, `None` to only log alerts
    pub fn new(keys: KeyPair, evaluator: AlertEvaluator, alerts: Option<AlertSender>) -> Self {
        let aggregator = EncryptedAggregator::new(keys.public.clone());
        info!(
            "Monitor ready with {}-bit key {}",
            keys.public.bits(),
            keys.public.fingerprint()
        );
        Self {
            inner: Arc::new(Inner {
                keys,
                aggregator,
                evaluator,
                alerts,
            }),
        }
    }

    pub fn aggregator(&self) -> &EncryptedAggregator {
        &self.inner.aggregator
    }

    pub fn evaluator(&self) -> &AlertEvaluator {
        &self.inner.evaluator
    }

    /// Accept a raw JSON reading
    ///
    /// # Errors
    ///
    /// `ServiceError::Validation` for rejected input, which never reaches the
    /// aggregate; `ServiceError::Aggregate` when the reading could not be
    /// folded in or the new average could not be decrypted.
    pub async fn upload(&self, raw: String) -> Result<UploadResponse, ServiceError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let (metric, ciphertext) = parse_external_reading(&raw, &inner.keys.public)
                .map_err(|e| {
                    warn!("Rejected reading: {}", e);
                    e
                })?;
            inner.fold(metric, &ciphertext)
        })
        .await?
    }

    /// Accept an already decoded reading
    pub async fn upload_reading(
        &self,
        reading: ExternalReading,
    ) -> Result<UploadResponse, ServiceError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let (metric, ciphertext) =
                parse_reading(&reading, &inner.keys.public).map_err(|e| {
                    warn!("Rejected reading: {}", e);
                    e
                })?;
            inner.fold(metric, &ciphertext)
        })
        .await?
    }

    /// Report count, average and status of every metric
    pub async fn status(&self) -> Result<StatusReport, ServiceError> {
        let inner = Arc::clone(&self.inner);
        let report = tokio::task::spawn_blocking(move || {
            Metric::ALL
                .iter()
                .map(|&metric| (metric, inner.report(metric)))
                .collect::<StatusReport>()
        })
        .await?;
        Ok(report)
    }

    /// Clear every aggregate and cooldown; repeating it changes nothing
    pub fn reset(&self) -> serde_json::Value {
        self.inner.aggregator.reset();
        self.inner.evaluator.reset();
        info!("Aggregates and alert cooldowns reset");
        json!({ "status": "reset" })
    }

    pub fn public_key(&self) -> PublicKeyRecord {
        PublicKeyRecord::from(&self.inner.keys.public)
    }

    /// Answer one request line with one JSON response line
    pub async fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => json!({ "error": format!("Invalid request: {}", e) }),
        };
        response.to_string()
    }

    async fn handle(&self, request: Request) -> serde_json::Value {
        let result = match request {
            Request::Upload(reading) => self.upload_reading(reading).await.map(|r| to_value(&r)),
            Request::Status => self.status().await.map(|report| to_value(&report)),
            Request::Reset => Ok(self.reset()),
            Request::Pubkey => Ok(to_value(&self.public_key())),
        };
        result.unwrap_or_else(|e| json!({ "error": e.to_string() }))
    }
}

impl Inner {
    fn fold(
        &self,
        metric: Metric,
        ciphertext: &Ciphertext,
    ) -> Result<UploadResponse, ServiceError> {
        self.aggregator.add_reading(metric, ciphertext)?;
        let average = self
            .aggregator
            .compute_average(metric, &self.keys.private, metric.scale())
            .map_err(|e| {
                error!("Failed to compute {} average: {}", metric, e);
                e
            })?;

        let alert = self.raise_alert(metric, &average);
        Ok(UploadResponse {
            status: "ok".to_string(),
            metric,
            avg: round_to(average.value, 2),
            count: average.count,
            alert,
        })
    }

    fn raise_alert(&self, metric: Metric, average: &Average) -> bool {
        let Some(event) = self.evaluator.check(metric, average, Utc::now()) else {
            return false;
        };

        let Some(sender) = &self.alerts else {
            warn!("{}", event.subject());
            return true;
        };

        let emitted_at = event.timestamp;
        match sender.try_send(event) {
            Ok(()) => true,
            Err(AlertError::QueueFull) => {
                // Not handed off, so the next abnormal average may alert again
                error!("Alert channel full, dropping alert for {}", metric);
                self.evaluator.cooldown().release(metric, emitted_at);
                false
            }
            Err(e) => {
                error!("Failed to queue alert for {}: {}", metric, e);
                true
            }
        }
    }

    fn report(&self, metric: Metric) -> MetricReport {
        match self
            .aggregator
            .compute_average(metric, &self.keys.private, metric.scale())
        {
            Ok(average) => {
                // Classify the value that is displayed
                let shown = round_to(average.value, 1);
                MetricReport {
                    count: average.count,
                    average: Some(shown),
                    status: self.evaluator.evaluate(metric, shown).into(),
                }
            }
            Err(AggregateError::NoData) => MetricReport {
                count: 0,
                average: None,
                status: MetricStatus::NoData,
            },
            Err(AggregateError::Crypto(e)) => {
                error!("Failed to decrypt {} sum: {}", metric, e);
                MetricReport {
                    count: self.aggregator.count(metric),
                    average: None,
                    status: MetricStatus::Unavailable,
                }
            }
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
