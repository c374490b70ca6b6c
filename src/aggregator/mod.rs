/// Per-metric running encrypted sums
pub mod encrypted_aggregator;

pub use encrypted_aggregator::{Average, EncryptedAggregator, MetricAggregate};
