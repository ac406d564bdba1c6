//! Secret handling utilities.
//!
//! Re-exports secrecy types used for broker credentials.

pub use secrecy::{ExposeSecret, SecretString};
