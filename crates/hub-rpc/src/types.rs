//! Wire-format envelopes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RpcError;

/// Incoming request envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id. Absent for socket fire-and-forget calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Method name (e.g. `ping`, `data.create`).
    pub method: String,
    /// Raw parameters, decoded by the method's registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Outgoing response envelope. Exactly one of `result` / `error` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoed request id (`null` if the request could not be read).
    pub id: Option<String>,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

/// Structured error inside an [`RpcResponse`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Numeric code from the error taxonomy.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Optional per-field messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, String>>,
}

impl RpcResponse {
    /// Build a success response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            result: Some(result),
            error: None,
        }
    }

    /// Build a failure response from an [`RpcError`].
    pub fn failure(id: Option<String>, err: &RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(err.to_error_body()),
        }
    }

    /// Whether this is a success response.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Error code, if this is a failure.
    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }
}
