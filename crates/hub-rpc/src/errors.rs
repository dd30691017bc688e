//! RPC error codes and error type.

use std::collections::BTreeMap;

use crate::types::RpcErrorBody;

// ── Error code constants ────────────────────────────────────────────

/// Message body is not valid JSON.
pub const PARSE_ERROR: i32 = -32700;
/// JSON is valid but not a well-formed request envelope.
pub const INVALID_REQUEST: i32 = -32600;
/// Method is not registered.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Params do not decode into the method's declared type.
pub const INVALID_PARAMS: i32 = -32602;
/// Unexpected server-side fault.
pub const INTERNAL_ERROR: i32 = -32603;
/// Referenced resource does not exist.
pub const NOT_FOUND: i32 = -32004;
/// Subscription method called over a transport without push support.
pub const TRANSPORT_NOT_SUPPORTED: i32 = -32010;

/// RPC error returned by handlers and by the dispatcher.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// Message body is not valid JSON.
    #[error("{message}")]
    Parse {
        /// Parser diagnostic.
        message: String,
    },

    /// Envelope shape is wrong or a required envelope field is missing.
    #[error("{message}")]
    InvalidRequest {
        /// What is wrong with the envelope.
        message: String,
    },

    /// Method is not registered.
    #[error("method '{method}' not found")]
    MethodNotFound {
        /// Requested method name.
        method: String,
    },

    /// Params failed to decode or validate.
    #[error("{message}")]
    InvalidParams {
        /// Summary.
        message: String,
        /// Per-field messages.
        errors: Option<BTreeMap<String, String>>,
    },

    /// Subscription method on a transport that cannot push.
    #[error("method '{method}' is not supported on this transport")]
    TransportNotSupported {
        /// Requested method name.
        method: String,
    },

    /// Internal server error.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// Handler-declared business error, passed to the caller verbatim.
    #[error("{message}")]
    Custom {
        /// Application error code.
        code: i32,
        /// Human-readable message.
        message: String,
        /// Optional per-field messages.
        errors: Option<BTreeMap<String, String>>,
    },
}

impl RpcError {
    /// Invalid params without field detail.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            errors: None,
        }
    }

    /// Invalid params attributed to a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut errors = BTreeMap::new();
        let _ = errors.insert(field.into(), message.clone());
        Self::InvalidParams {
            message,
            errors: Some(errors),
        }
    }

    /// Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Business error with an application code.
    pub fn custom(code: i32, message: impl Into<String>) -> Self {
        Self::Custom {
            code,
            message: message.into(),
            errors: None,
        }
    }

    /// Numeric code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse { .. } => PARSE_ERROR,
            Self::InvalidRequest { .. } => INVALID_REQUEST,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::TransportNotSupported { .. } => TRANSPORT_NOT_SUPPORTED,
            Self::Internal { .. } => INTERNAL_ERROR,
            Self::Custom { code, .. } => *code,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> RpcErrorBody {
        RpcErrorBody {
            code: self.code(),
            message: self.to_string(),
            errors: match self {
                Self::InvalidParams { errors, .. } | Self::Custom { errors, .. } => errors.clone(),
                _ => None,
            },
        }
    }
}
