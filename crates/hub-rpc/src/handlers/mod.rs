//! Built-in RPC method handlers.

pub mod data;
pub mod subscription;
pub mod system;

use std::sync::Arc;
use std::time::Instant;

use hub_core::{Broadcaster, ConnectionRegistry};

use crate::registry::RegistryBuilder;

use self::data::DataStore;

/// Shared services captured by handler closures at registration.
#[derive(Clone)]
pub struct HubServices {
    /// Live connections and subscription index.
    pub registry: Arc<ConnectionRegistry>,
    /// Event fan-out.
    pub broadcaster: Broadcaster,
    /// In-memory record store behind `data.*`.
    pub store: Arc<DataStore>,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl HubServices {
    /// Services over an existing connection registry.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            store: Arc::new(DataStore::default()),
            started_at: Instant::now(),
        }
    }
}

/// Register every built-in method and event.
pub fn register_all(builder: &mut RegistryBuilder, services: &HubServices) {
    system::register(builder, services);
    subscription::register(builder);
    data::register(builder, services);
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::sync::Arc;

    use hub_core::{ConnectionHandle, ConnectionRegistry};
    use tokio::sync::mpsc;

    use super::HubServices;
    use crate::context::{HandlerContext, Transport};

    pub fn make_services() -> HubServices {
        HubServices::new(Arc::new(ConnectionRegistry::new(16)))
    }

    pub fn http_ctx(method: &str) -> HandlerContext {
        HandlerContext::new(method, Some("t".into()), Transport::Http, None)
    }

    /// Register a socket connection and build a context bound to it.
    pub fn socket_ctx(
        services: &HubServices,
        method: &str,
    ) -> (HandlerContext, mpsc::Receiver<Arc<str>>) {
        let (conn, rx) = services.registry.register();
        let handle = ConnectionHandle::new(conn.id().clone(), Arc::clone(&services.registry));
        (
            HandlerContext::new(method, Some("t".into()), Transport::WebSocket, Some(handle)),
            rx,
        )
    }
}
