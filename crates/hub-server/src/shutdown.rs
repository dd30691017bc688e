//! Shutdown fan-out and connection draining.

use std::time::Duration;

use hub_core::ConnectionRegistry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How often the drain re-checks the live connection count.
const DRAIN_POLL: Duration = Duration::from_millis(25);

/// Owns the root token the listener and every connection derive from.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Token for one connection. Cancelled on server shutdown, or on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Cancel the root token. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel everything, then wait up to `timeout` for the listener task to
    /// stop and for every connection to leave `registry`.
    ///
    /// Returns `false` if the deadline passed first.
    pub async fn drain(
        &self,
        listener: JoinHandle<()>,
        registry: &ConnectionRegistry,
        timeout: Duration,
    ) -> bool {
        self.shutdown();
        info!(
            connections = registry.connection_count(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "draining"
        );

        let drained = tokio::time::timeout(timeout, async {
            let _ = listener.await;
            while registry.connection_count() > 0 {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                remaining = registry.connection_count(),
                "drain timed out, abandoning remaining connections"
            );
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_cancels_children_only_downward() {
        let coord = ShutdownCoordinator::new();
        let child = coord.child_token();
        child.cancel();
        assert!(!coord.is_shutting_down());

        let other = coord.child_token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(other.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_listener_and_connections() {
        let coord = ShutdownCoordinator::new();
        let registry = std::sync::Arc::new(ConnectionRegistry::new(4));
        let (conn, _rx) = registry.register();

        // Stand-in for a connection task: leaves the registry on cancel.
        let token = coord.child_token();
        let reg = std::sync::Arc::clone(&registry);
        let id = conn.id().clone();
        let _session = tokio::spawn(async move {
            token.cancelled().await;
            let _ = reg.remove(&id);
        });
        let root = coord.token();
        let listener = tokio::spawn(async move { root.cancelled().await });

        assert!(coord.drain(listener, &registry, Duration::from_secs(5)).await);
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_times_out_on_stuck_connection() {
        let coord = ShutdownCoordinator::new();
        let registry = ConnectionRegistry::new(4);
        let (_conn, _rx) = registry.register();
        let listener = tokio::spawn(async {});

        assert!(!coord.drain(listener, &registry, Duration::from_millis(100)).await);
        assert!(coord.is_shutting_down());
        assert_eq!(registry.connection_count(), 1);
    }
}
