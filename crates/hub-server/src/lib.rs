//! # hub-server
//!
//! Transport adapters and the Axum server hosting them.
//!
//! - `GET /ws`: persistent WebSocket connections with topic push
//! - `POST /rpc` and per-method routes: one-shot HTTP calls
//! - `GET /health`, `GET /api/methods`
//!
//! Shutdown fans out from a single [`ShutdownCoordinator`] token to the
//! listener and to every connection.

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod http;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, HubServer, ServerError, ServerHandle};
pub use shutdown::ShutdownCoordinator;
