//! `HubServer`: Axum HTTP + WebSocket server.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post, MethodRouter};
use axum::Router;
use hub_core::ConnectionRegistry;
use hub_rpc::{ApiDescriptor, Dispatcher, RegistryError};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::http;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket;

/// Paths owned by the server itself.
pub const RESERVED_PATHS: [&str; 4] = ["/rpc", "/ws", "/health", "/api/methods"];

/// Errors raised while building or starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A method route collides with a server-owned path.
    #[error("method '{method}' cannot be bound to reserved path '{path}'")]
    ReservedRoute {
        /// Method name.
        method: String,
        /// Reserved path.
        path: String,
    },
    /// The handler table failed validation.
    #[error("handler registration failed: {0}")]
    Registry(#[from] RegistryError),
    /// Binding or accepting failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Request dispatcher.
    pub dispatcher: Dispatcher,
    /// Live connections and subscription index.
    pub registry: Arc<ConnectionRegistry>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

/// Handle to a running server.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address (resolved when port `0` was requested).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

}

/// The hub server.
pub struct HubServer {
    state: AppState,
}

impl HubServer {
    /// Create a new server.
    ///
    /// The connection registry is built here from `config`, and handed to
    /// `build_dispatcher` so handlers can capture it.
    pub fn new<F>(config: ServerConfig, build_dispatcher: F) -> Result<Self, ServerError>
    where
        F: FnOnce(&Arc<ConnectionRegistry>) -> Result<Dispatcher, RegistryError>,
    {
        let registry = Arc::new(ConnectionRegistry::new(config.send_queue_capacity));
        let dispatcher = build_dispatcher(&registry)?;
        for (method, route) in dispatcher.registry().routes() {
            if RESERVED_PATHS.contains(&route.path.as_str()) {
                return Err(ServerError::ReservedRoute {
                    method: method.to_owned(),
                    path: route.path.clone(),
                });
            }
        }
        Ok(Self {
            state: AppState {
                dispatcher,
                registry,
                config: Arc::new(config),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
            },
        })
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let mut by_path: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();
        for (method, route) in self.state.dispatcher.registry().routes() {
            let merged = match by_path.remove(&route.path) {
                Some(existing) => existing.merge(http::method_route(method, route.verb)),
                None => http::method_route(method, route.verb),
            };
            let _ = by_path.insert(route.path.clone(), merged);
        }

        let mut router = Router::new()
            .route("/rpc", post(http::rpc_handler))
            .route("/ws", get(websocket::ws_handler))
            .route("/health", get(health_handler))
            .route("/api/methods", get(methods_handler));
        for (path, method_router) in by_path {
            router = router.route(&path, method_router);
        }

        router
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn listen(&self) -> Result<ServerHandle, ServerError> {
        let listener = TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.state.shutdown.token();

        info!(
            %addr,
            methods = self.state.dispatcher.registry().methods().len(),
            send_queue = self.state.registry.send_queue_capacity(),
            "hub server listening"
        );

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
            info!("hub server stopped");
        });

        Ok(ServerHandle { addr, task })
    }

    /// Stop serving and drain connections within the configured shutdown
    /// timeout. Returns `false` if the deadline passed first.
    pub async fn stop(&self, handle: ServerHandle) -> bool {
        self.state
            .shutdown
            .drain(handle.task, &self.state.registry, self.state.config.shutdown_timeout())
            .await
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.state.registry
    }

    /// Get the dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.state.dispatcher
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
    ))
}

/// GET /api/methods
async fn methods_handler(State(state): State<AppState>) -> Json<Vec<ApiDescriptor>> {
    Json(state.dispatcher.registry().descriptors().to_vec())
}
