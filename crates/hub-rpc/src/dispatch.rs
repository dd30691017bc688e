//! Transport-independent request dispatch.

use std::sync::Arc;
use std::time::Instant;

use hub_core::ConnectionHandle;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{warn, Instrument};

use crate::context::{HandlerContext, Transport};
use crate::errors::RpcError;
use crate::handlers::subscription::is_subscription_method;
use crate::middleware::{Middleware, Next};
use crate::registry::HandlerRegistry;
use crate::types::{RpcRequest, RpcResponse};

/// Metric label for methods that are not registered.
const UNKNOWN_METHOD_LABEL: &str = "unknown";

/// Resolves requests against the frozen registry and runs them through the
/// middleware chain.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    middleware: Arc<[Arc<dyn Middleware>]>,
}

impl Dispatcher {
    /// Dispatcher with an empty middleware chain.
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            middleware: Arc::from(Vec::new()),
        }
    }

    /// Append a middleware. The first one added is the outermost.
    #[must_use]
    pub fn with_middleware(self, middleware: impl Middleware + 'static) -> Self {
        let mut chain: Vec<Arc<dyn Middleware>> = self.middleware.iter().cloned().collect();
        chain.push(Arc::new(middleware));
        Self {
            registry: self.registry,
            middleware: Arc::from(chain),
        }
    }

    /// The handler table.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Parse and dispatch one raw message.
    ///
    /// Returns `None` for socket calls without an id.
    pub async fn handle_text(
        &self,
        raw: &str,
        transport: Transport,
        connection: Option<ConnectionHandle>,
    ) -> Option<RpcResponse> {
        match parse_request(raw) {
            Ok(request) => {
                let notification = request.id.is_none() && transport == Transport::WebSocket;
                let response = self.dispatch(request, transport, connection).await;
                (!notification).then_some(response)
            }
            Err(response) => {
                record_rejected(&response, transport);
                Some(response)
            }
        }
    }

    /// Parse and dispatch one HTTP body. Every HTTP call gets a response.
    pub async fn handle_http(&self, raw: &str) -> RpcResponse {
        match parse_request(raw) {
            Ok(request) => self.dispatch(request, Transport::Http, None).await,
            Err(response) => {
                record_rejected(&response, Transport::Http);
                response
            }
        }
    }

    /// Dispatch an already parsed request.
    ///
    /// The response carries the request id, which is `None` for socket
    /// notifications; the socket adapter drops those.
    pub async fn dispatch(
        &self,
        request: RpcRequest,
        transport: Transport,
        connection: Option<ConnectionHandle>,
    ) -> RpcResponse {
        let RpcRequest { id, method, params } = request;
        let endpoint = self.registry.get(&method);
        let label = self.metric_label(&method);
        counter!(
            "rpc_requests_total",
            "method" => label.clone(),
            "transport" => transport.as_str()
        )
        .increment(1);
        let start = Instant::now();

        let result = match (Self::precheck(id.as_deref(), &method, transport), endpoint) {
            (Err(err), _) => Err(err),
            (Ok(()), None) => {
                warn!(method = %method, transport = %transport, "method not found");
                Err(RpcError::MethodNotFound {
                    method: method.clone(),
                })
            }
            (Ok(()), Some(endpoint)) => {
                let ctx = HandlerContext::new(method.as_str(), id.clone(), transport, connection);
                let span = ctx.span().clone();
                Next::new(endpoint, &self.middleware)
                    .run(ctx, params)
                    .instrument(span)
                    .await
            }
        };

        histogram!(
            "rpc_request_duration_seconds",
            "method" => label.clone(),
            "transport" => transport.as_str()
        )
        .record(start.elapsed().as_secs_f64());

        match result {
            Ok(value) => RpcResponse {
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => {
                counter!(
                    "rpc_errors_total",
                    "method" => label,
                    "transport" => transport.as_str(),
                    "error_type" => err.code().to_string()
                )
                .increment(1);
                RpcResponse::failure(id, &err)
            }
        }
    }

    /// Metric label for `method`. Unregistered names share one label so
    /// clients cannot create new series.
    fn metric_label(&self, method: &str) -> String {
        if self.registry.has_method(method) {
            method.to_owned()
        } else {
            UNKNOWN_METHOD_LABEL.to_owned()
        }
    }

    /// Checks that do not need the registry. Subscription methods are
    /// refused over HTTP whether or not the request has an id.
    fn precheck(id: Option<&str>, method: &str, transport: Transport) -> Result<(), RpcError> {
        if transport != Transport::Http {
            return Ok(());
        }
        if is_subscription_method(method) {
            return Err(RpcError::TransportNotSupported {
                method: method.to_owned(),
            });
        }
        if id.is_none() {
            return Err(RpcError::InvalidRequest {
                message: "request id is required over http".into(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Parse a raw message into a request envelope.
///
/// On failure returns the error response to send back: `ParseError` with a
/// `null` id for invalid JSON, `InvalidRequest` for a malformed envelope
/// (echoing the id when one can be read).
pub fn parse_request(raw: &str) -> Result<RpcRequest, RpcResponse> {
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        RpcResponse::failure(
            None,
            &RpcError::Parse {
                message: format!("parse error: {e}"),
            },
        )
    })?;

    let echoed_id = value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned);

    if !value.is_object() {
        return Err(RpcResponse::failure(
            echoed_id,
            &RpcError::InvalidRequest {
                message: "request must be a JSON object".into(),
            },
        ));
    }

    serde_json::from_value::<RpcRequest>(value).map_err(|e| {
        RpcResponse::failure(
            echoed_id,
            &RpcError::InvalidRequest {
                message: format!("invalid request: {e}"),
            },
        )
    })
}

fn record_rejected(response: &RpcResponse, transport: Transport) {
    let error_type = response
        .error_code()
        .map_or_else(|| "unknown".to_owned(), |c| c.to_string());
    counter!(
        "rpc_errors_total",
        "transport" => transport.as_str(),
        "error_type" => error_type
    )
    .increment(1);
}
