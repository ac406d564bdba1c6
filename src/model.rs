//! Core data model.
//!
//! A work item is something that needs doing: an opaque payload addressed to a
//! subject, an idempotency key the broker deduplicates on, and a header set
//! carrying the propagated trace context.

use bytes::Bytes;
use rand::Rng;
use std::collections::BTreeMap;

/// Ordered string headers attached to every message.
pub type Headers = BTreeMap<String, String>;

/// Length of generated idempotency keys.
pub const IDEMPOTENCY_KEY_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of work on its way to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Full subject, e.g. `events.download.<key>`.
    pub subject: String,

    /// Application-defined payload. The core never interprets it.
    pub payload: Bytes,

    /// Broker deduplication key. Re-publishing with the same key is a retry of
    /// the same attempt, not a new item.
    pub idempotency_key: String,

    /// Propagation headers plus anything else the caller attached.
    pub headers: Headers,
}

impl WorkItem {
    pub fn new(subject: impl Into<String>, idempotency_key: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            payload: Bytes::new(),
            idempotency_key: idempotency_key.into(),
            headers: Headers::new(),
        }
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// The message as a consumer will see it.
    pub fn to_message(&self) -> Message {
        Message {
            subject: self.subject.clone(),
            headers: self.headers.clone(),
            payload: self.payload.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A message as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub headers: Headers,
    pub payload: Bytes,
}

impl Message {
    /// Payload as text, lossy for non-UTF-8 bytes.
    pub fn payload_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

// ---------------------------------------------------------------------------
// Publish confirmation
// ---------------------------------------------------------------------------

/// Broker confirmation that an item was durably stored (not that it was processed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
    /// True when the broker recognised the idempotency key and dropped the copy.
    pub duplicate: bool,
}

// ---------------------------------------------------------------------------
// Idempotency keys
// ---------------------------------------------------------------------------

const CONSONANTS: &[u8] = b"bcdfghjklmnprstvwz";
const VOWELS: &[u8] = b"aeiou";

/// Random pronounceable lowercase token of `len` characters.
///
/// Alternates consonants and vowels so keys stay readable in logs and subjects
/// while still carrying ~3.3 bits per character.
pub fn human_friendly_key(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|i| {
            let alphabet = if i % 2 == 0 { CONSONANTS } else { VOWELS };
            char::from(alphabet[rng.random_range(0..alphabet.len())])
        })
        .collect()
}

/// A fresh idempotency key for a new work item.
pub fn new_idempotency_key() -> String {
    human_friendly_key(IDEMPOTENCY_KEY_LEN)
}
