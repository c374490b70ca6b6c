/// Error types for the health monitor
pub mod error;

/// Paillier key generation, encryption and homomorphic addition
pub mod paillier;

/// Known metrics and their ranges
pub mod metrics;

/// Alert events and metric status
pub mod events;

/// Per-metric encrypted running sums
pub mod aggregator;

/// Threshold evaluation, cooldown and alert delivery
pub mod alerts;

/// Validation of producer readings
pub mod ingest;

/// Producer-side scaling and encryption
pub mod producer;

/// Key pair persistence
pub mod keystore;

/// Configuration management
pub mod config;

/// Monitor service tying the pieces together
pub mod service;

// Re-export commonly used types
pub use error::{
    AggregateError, AlertError, ConfigError, CryptoError, KeyStoreError, ServiceError,
    ValidationError,
};
pub use metrics::Metric;
pub use service::MonitorService;
