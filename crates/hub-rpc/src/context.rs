//! Per-invocation handler context.

use std::fmt;

use hub_core::ConnectionHandle;
use serde::Serialize;
use tracing::field::Empty;
use tracing::{info_span, Span};

use crate::errors::RpcError;

/// Transport a call arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Persistent socket connection; supports subscriptions and push.
    WebSocket,
    /// One-shot request/response.
    Http,
}

impl Transport {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::WebSocket => "websocket",
            Transport::Http => "http",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context handed to middleware and handlers for a single call.
///
/// The span is the call's structured logger: it is created with the call's
/// identity fields and has `duration_ms` / `success` left empty for the
/// logging middleware to fill in.
#[derive(Clone, Debug)]
pub struct HandlerContext {
    method: String,
    request_id: Option<String>,
    transport: Transport,
    span: Span,
    connection: Option<ConnectionHandle>,
}

impl HandlerContext {
    /// Build the context for one call.
    pub fn new(
        method: impl Into<String>,
        request_id: Option<String>,
        transport: Transport,
        connection: Option<ConnectionHandle>,
    ) -> Self {
        let method = method.into();
        let span = info_span!(
            "rpc",
            method = %method,
            transport = transport.as_str(),
            request_id = Empty,
            conn_id = Empty,
            duration_ms = Empty,
            success = Empty,
        );
        if let Some(id) = &request_id {
            let _ = span.record("request_id", id.as_str());
        }
        if let Some(conn) = &connection {
            let _ = span.record("conn_id", conn.id().as_str());
        }
        Self {
            method,
            request_id,
            transport,
            span,
            connection,
        }
    }

    /// Method being invoked.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Correlation id, if the caller supplied one.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Originating transport.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// The call's logging span.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Back-reference to the originating socket connection.
    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.connection.as_ref()
    }

    /// The originating connection, or `TransportNotSupported` for calls
    /// that did not arrive over a socket.
    pub fn require_connection(&self) -> Result<&ConnectionHandle, RpcError> {
        self.connection
            .as_ref()
            .ok_or_else(|| RpcError::TransportNotSupported {
                method: self.method.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use hub_core::ConnectionRegistry;

    #[test]
    fn http_context_has_no_connection() {
        let ctx = HandlerContext::new("ping", Some("1".into()), Transport::Http, None);
        assert_eq!(ctx.method(), "ping");
        assert_eq!(ctx.request_id(), Some("1"));
        assert_eq!(ctx.transport(), Transport::Http);
        assert!(ctx.connection().is_none());
        let err = ctx.require_connection().unwrap_err();
        assert!(matches!(err, RpcError::TransportNotSupported { ref method } if method == "ping"));
    }

    #[test]
    fn socket_context_carries_connection() {
        let reg = Arc::new(ConnectionRegistry::new(4));
        let (conn, _rx) = reg.register();
        let handle = ConnectionHandle::new(conn.id().clone(), reg);
        let ctx = HandlerContext::new("subscribe", None, Transport::WebSocket, Some(handle));
        assert_eq!(ctx.require_connection().unwrap().id(), conn.id());
        assert!(ctx.request_id().is_none());
    }

    #[test]
    fn transport_labels() {
        assert_eq!(Transport::WebSocket.to_string(), "websocket");
        assert_eq!(Transport::Http.as_str(), "http");
    }
}
