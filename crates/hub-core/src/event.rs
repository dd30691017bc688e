//! Server-pushed event envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::topic::Topic;

/// An event pushed to subscribers.
///
/// Shares the request envelope's shape but never carries an `id`; the
/// `method` is the topic's wire name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Topic wire name.
    pub method: String,
    /// Event payload.
    pub params: Value,
}

impl EventEnvelope {
    /// Build the envelope for `topic`.
    pub fn new(topic: Topic, params: Value) -> Self {
        Self {
            method: topic.as_str().to_owned(),
            params,
        }
    }
}
