//! Error types for nats-tracing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to connect to broker at {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("failed to provision {what}: {reason}")]
    Provisioning { what: String, reason: String },

    #[error("failed to publish to {subject}: {reason}")]
    Publish { subject: String, reason: String },

    #[error("failed to settle message: {0}")]
    Ack(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error("shutdown of {name} failed: {reason}")]
    Shutdown { name: String, reason: String },

    #[error("shutdown of {name} did not finish before the deadline")]
    ShutdownTimeout { name: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
