//! Typed configuration from environment variables and an optional TOML file.
//!
//! Loads once at startup, fails fast on unreadable or malformed input.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::consumer::AckPolicy;
use crate::error::{Error, Result};
use crate::mq::{ConsumerSpec, StreamSpec};
use secrets::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_NATS_URL: &str = "nats://nats:4222";
pub const DEFAULT_OTEL_ENDPOINT: &str = "http://otel-collector:4317";

#[derive(Debug)]
pub struct Config {
    pub nats_url: String,
    pub nats_token: Option<SecretString>,
    pub otel_endpoint: String,
    pub log_level: String,
    pub messaging: MessagingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// `MESSAGING_CONFIG` may point at a TOML file overriding the stream layout.
    pub fn from_env() -> Result<Self> {
        let messaging = match std::env::var("MESSAGING_CONFIG") {
            Ok(path) => MessagingConfig::load(Path::new(&path))?,
            Err(_) => MessagingConfig::default(),
        };

        Ok(Self {
            nats_url: var_or("NATS_URL", DEFAULT_NATS_URL),
            nats_token: std::env::var("NATS_TOKEN").ok().map(SecretString::from),
            otel_endpoint: var_or("OTEL_ENDPOINT", DEFAULT_OTEL_ENDPOINT),
            log_level: var_or("LOG_LEVEL", "info"),
            messaging,
        })
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Stream layout and loop cadence shared by both roles.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MessagingConfig {
    pub stream_name: String,
    pub subjects: Vec<String>,
    pub subject_prefix: String,
    pub consumer_name: String,
    pub publish_interval_secs: u64,
    pub payload: String,
    pub max_in_flight: usize,
    pub ack_policy: AckPolicy,
    pub ack_wait_secs: u64,
    pub duplicate_window_secs: u64,
    pub metrics_namespace: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            stream_name: "download".to_string(),
            subjects: vec!["events.>".to_string()],
            subject_prefix: "events.download".to_string(),
            consumer_name: "download-worker".to_string(),
            publish_interval_secs: 5,
            payload: "hello from sender".to_string(),
            max_in_flight: 16,
            ack_policy: AckPolicy::Always,
            ack_wait_secs: 30,
            duplicate_window_secs: 120,
            metrics_namespace: "nats_tracing".to_string(),
        }
    }
}

impl MessagingConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read messaging config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("bad messaging config {}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.stream_name.is_empty() {
            return Err(Error::Config("stream_name must not be empty".to_string()));
        }
        if self.subjects.is_empty() {
            return Err(Error::Config("subjects must not be empty".to_string()));
        }
        if self.publish_interval_secs == 0 {
            return Err(Error::Config("publish_interval_secs must be positive".to_string()));
        }
        if self.max_in_flight == 0 {
            return Err(Error::Config("max_in_flight must be positive".to_string()));
        }
        Ok(())
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn stream_spec(&self) -> StreamSpec {
        StreamSpec {
            name: self.stream_name.clone(),
            subjects: self.subjects.clone(),
            duplicate_window: Duration::from_secs(self.duplicate_window_secs),
        }
    }

    pub fn consumer_spec(&self) -> ConsumerSpec {
        ConsumerSpec {
            stream: self.stream_name.clone(),
            durable_name: self.consumer_name.clone(),
            filter_subject: None,
            ack_wait: Duration::from_secs(self.ack_wait_secs),
        }
    }
}
