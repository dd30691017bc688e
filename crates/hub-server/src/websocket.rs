//! WebSocket transport adapter.
//!
//! Each connection runs a reader loop on the upgrade task and a writer task
//! fed by the connection's send channel. The reader dispatches one frame at a
//! time and enqueues the response before reading the next frame, so responses
//! leave in request order. Pushed events share the same channel.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use hub_core::{Connection, ConnectionHandle};
use hub_rpc::{RpcError, RpcResponse, Transport};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::server::AppState;

/// Upper bound on the farewell close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    let active = state.registry.connection_count();
    if active >= state.config.max_connections {
        warn!(active, max = state.config.max_connections, "connection limit reached, rejecting upgrade");
        counter!("ws_connections_rejected_total").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_connection(socket, state))
}

/// Run one connection from upgrade to cleanup.
async fn run_connection(socket: WebSocket, state: AppState) {
    let (conn, send_rx) = state.registry.register();
    let span = info_span!("ws", conn_id = %conn.id());
    session(socket, conn, send_rx, state).instrument(span).await;
}

async fn session(
    socket: WebSocket,
    conn: Arc<Connection>,
    send_rx: mpsc::Receiver<Arc<str>>,
    state: AppState,
) {
    let cancel = state.shutdown.child_token();
    let handle = ConnectionHandle::new(conn.id().clone(), Arc::clone(&state.registry));

    info!("client connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(
        write_loop(
            ws_tx,
            send_rx,
            Arc::clone(&conn),
            state.config.heartbeat_interval(),
            state.config.heartbeat_timeout(),
            cancel.clone(),
        )
        .in_current_span(),
    );

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = ws_rx.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "socket read failed");
                break;
            }
            None => break,
        };
        conn.mark_alive();

        let text = match &msg {
            Message::Text(t) => Ok(t.as_str()),
            Message::Binary(data) => std::str::from_utf8(data).map_err(|e| {
                debug!(len = data.len(), "binary frame is not UTF-8");
                RpcResponse::failure(
                    None,
                    &RpcError::Parse {
                        message: format!("parse error: binary frame is not valid UTF-8: {e}"),
                    },
                )
            }),
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let response = match text {
            // Best-effort cancellation: an in-flight call is dropped on close.
            Ok(text) => tokio::select! {
                () = cancel.cancelled() => break,
                r = state.dispatcher.handle_text(text, Transport::WebSocket, Some(handle.clone())) => r,
            },
            Err(response) => Some(response),
        };
        let Some(response) = response else { continue };

        let json = match serde_json::to_string(&response) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failed to serialize response");
                continue;
            }
        };
        // A full queue blocks here until the writer drains it or gives up.
        let queued = tokio::select! {
            () = cancel.cancelled() => break,
            queued = conn.send(Arc::from(json)) => queued,
        };
        if !queued {
            debug!("writer gone, dropping response");
            break;
        }
    }

    cancel.cancel();
    let _ = writer.await;
    let released = state.registry.remove(conn.id());

    info!(
        released = released.len(),
        dropped = conn.drop_count(),
        "client disconnected"
    );
    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(conn.age().as_secs_f64());
}

/// Forward queued frames to the socket and keep the connection alive.
///
/// Exits (and cancels `cancel`) when the channel closes, a write fails or
/// stalls for longer than `timeout`, the token is cancelled, or no frame has
/// arrived for `timeout`.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<str>>,
    conn: Arc<Connection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ping = tokio::time::interval(interval);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let msg = Message::Text(frame.to_string().into());
                if !send_frame(&mut sink, msg, timeout, &cancel).await {
                    break;
                }
            }
            _ = ping.tick() => {
                if conn.idle_for() > timeout {
                    warn!(idle_secs = conn.idle_for().as_secs(), "client unresponsive, disconnecting");
                    break;
                }
                if !send_frame(&mut sink, Message::Ping(Vec::new().into()), timeout, &cancel).await {
                    break;
                }
            }
        }
    }

    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await;
    cancel.cancel();
}

/// Write one frame. Returns `false` when the write fails, does not complete
/// within `timeout` (the client stopped reading), or `cancel` fires first.
async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: Message,
    timeout: Duration,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        res = tokio::time::timeout(timeout, sink.send(msg)) => match res {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "socket write failed");
                false
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "socket write stalled, disconnecting");
                false
            }
        },
    }
}
