//! HTTP request/response transport adapter.
//!
//! Stateless: every call gets an ephemeral context without a connection, so
//! subscription methods are refused by the dispatcher.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{on, MethodFilter, MethodRouter};
use hub_rpc::errors::{INTERNAL_ERROR, METHOD_NOT_FOUND};
use hub_rpc::{HttpVerb, RpcError, RpcRequest, RpcResponse, Transport};
use serde_json::Value;

use crate::server::AppState;

/// Header carrying the correlation id for per-method routes.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// HTTP status for a response envelope.
pub fn status_for(response: &RpcResponse) -> StatusCode {
    match response.error_code() {
        None => StatusCode::OK,
        Some(METHOD_NOT_FOUND) => StatusCode::NOT_FOUND,
        Some(INTERNAL_ERROR) => StatusCode::INTERNAL_SERVER_ERROR,
        Some(_) => StatusCode::BAD_REQUEST,
    }
}

fn into_http(response: RpcResponse) -> Response {
    let status = status_for(&response);
    let mut http = (status, Json(&response)).into_response();
    if let Some(id) = response.id.as_deref().and_then(|id| HeaderValue::from_str(id).ok()) {
        let _ = http.headers_mut().insert(REQUEST_ID_HEADER, id);
    }
    http
}

fn parse_failure(id: Option<String>, message: String) -> Response {
    into_http(RpcResponse::failure(id, &RpcError::Parse { message }))
}

/// `POST /rpc`: the body is a full request envelope. A request without an
/// id is answered with `InvalidRequest`.
pub async fn rpc_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let Ok(raw) = std::str::from_utf8(&body) else {
        return parse_failure(None, "request body is not valid UTF-8".into());
    };
    into_http(state.dispatcher.handle_http(raw).await)
}

/// Router for a method exposed at its own route. The body, if any, is the
/// params object.
pub fn method_route(method: &str, verb: HttpVerb) -> MethodRouter<AppState> {
    let method = method.to_owned();
    let handler = move |State(state): State<AppState>, headers: HeaderMap, body: Bytes| {
        let method = method.clone();
        async move { call_method(state, method, verb, &headers, &body).await }
    };
    on(method_filter(verb), handler)
}

/// Verb filter for a route.
pub fn method_filter(verb: HttpVerb) -> MethodFilter {
    match verb {
        HttpVerb::Get => MethodFilter::GET,
        HttpVerb::Post => MethodFilter::POST,
        HttpVerb::Put => MethodFilter::PUT,
        HttpVerb::Delete => MethodFilter::DELETE,
    }
}

async fn call_method(
    state: AppState,
    method: String,
    verb: HttpVerb,
    headers: &HeaderMap,
    body: &[u8],
) -> Response {
    let id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| format!("http_{}", uuid::Uuid::now_v7()), str::to_owned);

    let params = if verb == HttpVerb::Get || body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice::<Value>(body) {
            Ok(v) => Some(v),
            Err(e) => return parse_failure(Some(id), format!("parse error: {e}")),
        }
    };

    let request = RpcRequest {
        id: Some(id),
        method,
        params,
    };
    into_http(state.dispatcher.dispatch(request, Transport::Http, None).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_rpc::errors;

    fn failure(code: i32) -> RpcResponse {
        RpcResponse::failure(Some("1".into()), &RpcError::custom(code, "x"))
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(&RpcResponse::success("1", Value::Null)), StatusCode::OK);
        assert_eq!(status_for(&failure(errors::METHOD_NOT_FOUND)), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&failure(errors::INTERNAL_ERROR)), StatusCode::INTERNAL_SERVER_ERROR);
        for code in [
            errors::PARSE_ERROR,
            errors::INVALID_REQUEST,
            errors::INVALID_PARAMS,
            errors::TRANSPORT_NOT_SUPPORTED,
            errors::NOT_FOUND,
        ] {
            assert_eq!(status_for(&failure(code)), StatusCode::BAD_REQUEST, "code {code}");
        }
    }

    #[test]
    fn response_echoes_request_id_header() {
        let resp = into_http(RpcResponse::success("abc", Value::Null));
        assert_eq!(resp.headers()[REQUEST_ID_HEADER], "abc");
    }
}
