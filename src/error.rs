use thiserror::Error;

/// Errors raised by the Paillier cryptosystem
///
/// None of the variants carry key material; ciphertext problems are described
/// by kind, never by value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Plaintext is outside the range accepted by this public key")]
    PlaintextOutOfRange,

    #[error("Randomness must be coprime to n and lie in [1, n)")]
    InvalidRandomness,

    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Ciphertexts were produced under different public keys")]
    KeyMismatch,

    #[error("Cannot align exponent {from} to {to}")]
    ExponentMismatch { from: i32, to: i32 },
}

/// Errors that reject an external reading before it reaches an aggregate
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid reading payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error(transparent)]
    Ciphertext(#[from] CryptoError),
}

/// Errors returned by the encrypted aggregator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("No readings recorded")]
    NoData,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors that can occur when delivering alerts
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Failed to send notification: {0}")]
    NotificationFailed(String),

    #[error("Alert channel full")]
    QueueFull,

    #[error("Alert channel closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors raised while loading or saving a key pair
#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid key file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid key material in {0}")]
    Format(String),

    #[error("Public key does not match private key")]
    Mismatch,

    #[error("Key file already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors surfaced by the monitor service
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
