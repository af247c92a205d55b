use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique correlation identifier used to match requests and replies.
///
/// Correlation IDs travel *in-band* as the `id` field of request and response
/// payloads. Neither the hub nor the transport interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    // ---
    /// Generate a new random correlation ID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Generate an ID that `in_use` reports as free.
    ///
    /// An id must never be handed out while a live table still holds it.
    pub fn generate_unique(in_use: impl Fn(&CorrelationId) -> bool) -> Self {
        // ---
        loop {
            let id = Self::generate();
            if !in_use(&id) {
                return id;
            }
        }
    }

    /// Borrow the correlation ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
