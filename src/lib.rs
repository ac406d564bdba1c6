//! # nats-tracing
//!
//! Work-queue publisher and consumer over NATS JetStream with OpenTelemetry
//! trace context carried in message headers.
//!
//! Provides the broker abstraction (NATS and in-memory), a header propagator,
//! telemetry provider lifecycle with bounded concurrent shutdown, and the two
//! process roles.

pub mod config;
pub mod consumer;
pub mod error;
pub mod model;
pub mod mq;
pub mod publisher;
pub mod roles;
pub mod telemetry;
