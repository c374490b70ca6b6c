//! Encrypted aggregator with per-metric running sums
//!
//! This module provides the EncryptedAggregator, which folds producer
//! ciphertexts into one running Paillier sum per metric. Individual readings
//! are never decrypted; only the sum is, when an average is requested.

use crate::error::AggregateError;
use crate::metrics::Metric;
use crate::paillier::{Ciphertext, PrivateKey, PublicKey};
use log::debug;
use num_bigint::BigUint;
use num_traits::Zero;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Running encrypted sum and plaintext count for one metric
///
/// `sum` is `None` until the first reading arrives; it then starts from a
/// fresh encryption of zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricAggregate {
    pub sum: Option<Ciphertext>,
    pub count: u64,
}

/// Decrypted average of one metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Average {
    /// Mean reading after removing the fixed-point scale
    pub value: f64,
    /// Number of readings folded into the mean
    pub count: u64,
}

/// Aggregator owning one locked aggregate per known metric
///
/// Each `(sum, count)` pair sits behind its own mutex, so a reader sees either
/// the state before or after an addition and never a new sum with an old
/// count. Metrics are independent and never share a lock.
#[derive(Debug)]
pub struct EncryptedAggregator {
    public_key: PublicKey,
    aggregates: HashMap<Metric, Mutex<MetricAggregate>>,
}

impl EncryptedAggregator {
    /// Create an empty aggregator for ciphertexts under `public_key`
    ///
    /// # Examples
    ///
    /// ```
    /// use health_monitor::aggregator::EncryptedAggregator;
    /// use health_monitor::metrics::Metric;
    /// use health_monitor::paillier::generate_keypair;
    ///
    /// let keys = generate_keypair(256).unwrap();
    /// let aggregator = EncryptedAggregator::new(keys.public.clone());
    /// assert_eq!(aggregator.count(Metric::HeartRate), 0);
    /// ```
    pub fn new(public_key: PublicKey) -> Self {
        let aggregates = Metric::ALL
            .iter()
            .map(|&metric| (metric, Mutex::new(MetricAggregate::default())))
            .collect();

        Self {
            public_key,
            aggregates,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Fold a ciphertext into the metric's running sum
    ///
    /// The new sum is computed before anything is stored, so a rejected
    /// ciphertext leaves the aggregate untouched.
    ///
    /// # Returns
    ///
    /// The metric's reading count after this addition
    ///
    /// # Errors
    ///
    /// Returns `AggregateError::Crypto` when the ciphertext belongs to another
    /// key or its exponent cannot be aligned with the running sum.
    pub fn add_reading(
        &self,
        metric: Metric,
        ciphertext: &Ciphertext,
    ) -> Result<u64, AggregateError> {
        let mut aggregate = self.lock(metric);

        let sum = match &aggregate.sum {
            Some(sum) => self.public_key.add(sum, ciphertext)?,
            None => {
                let zero = self.public_key.encrypt(&BigUint::zero())?;
                self.public_key.add(&zero, ciphertext)?
            }
        };

        aggregate.sum = Some(sum);
        aggregate.count += 1;
        debug!("Folded reading into {} (count: {})", metric, aggregate.count);

        Ok(aggregate.count)
    }

    /// Decrypt the running sum and divide by count and fixed-point scale
    ///
    /// The aggregate is copied under its lock and decrypted after the lock is
    /// released, so slow decryption never blocks producers.
    ///
    /// # Errors
    ///
    /// Returns `AggregateError::NoData` when the metric has no readings, or
    /// `AggregateError::Crypto` when the sum cannot be decrypted.
    pub fn compute_average(
        &self,
        metric: Metric,
        private_key: &PrivateKey,
        scale: u32,
    ) -> Result<Average, AggregateError> {
        let MetricAggregate { sum, count } = self.snapshot(metric);
        let sum = match sum {
            Some(sum) if count > 0 => sum,
            _ => return Err(AggregateError::NoData),
        };

        let total = private_key.decode(&sum)?;
        let value = total / count as f64 / f64::from(scale.max(1));

        Ok(Average { value, count })
    }

    /// Number of readings folded into the metric since the last reset
    pub fn count(&self, metric: Metric) -> u64 {
        self.lock(metric).count
    }

    /// Consistent copy of the metric's `(sum, count)` pair
    pub fn snapshot(&self, metric: Metric) -> MetricAggregate {
        self.lock(metric).clone()
    }

    /// Clear every metric back to its empty state
    ///
    /// Idempotent: resetting an empty aggregator changes nothing.
    pub fn reset(&self) {
        for metric in Metric::ALL {
            *self.lock(metric) = MetricAggregate::default();
        }
    }

    fn lock(&self, metric: Metric) -> MutexGuard<'_, MetricAggregate> {
        // Sum and count are only written together, so a poisoned pair is still whole
        self.aggregates[&metric]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
