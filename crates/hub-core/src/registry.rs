//! Connection registry and topic subscription index.
//!
//! Both maps live behind one mutex so that a connection's membership and its
//! presence in the registry always change together. The lock is never held
//! while sending: [`ConnectionRegistry::publish`] snapshots the subscriber
//! set and releases it before touching any channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::HubError;
use crate::ids::ConnectionId;
use crate::topic::Topic;

/// Outcome of a fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections the frame was enqueued for.
    pub delivered: usize,
    /// Connections whose channel was full or closed.
    pub failed: usize,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    topics: HashMap<Topic, HashSet<ConnectionId>>,
}

/// Registry of live connections and their topic memberships.
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
    send_queue_capacity: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry. Each registered connection gets a send
    /// channel of `send_queue_capacity` frames.
    pub fn new(send_queue_capacity: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            send_queue_capacity: send_queue_capacity.max(1),
        }
    }

    /// Register a new connection and return it with the receiving end of
    /// its send channel.
    pub fn register(&self) -> (Arc<Connection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(self.send_queue_capacity);
        let connection = Arc::new(Connection::new(ConnectionId::new(), tx));
        let id = connection.id().clone();
        let mut state = self.state.lock();
        let _ = state.connections.insert(id.clone(), Arc::clone(&connection));
        debug!(conn_id = %id, total = state.connections.len(), "connection registered");
        drop(state);
        (connection, rx)
    }

    /// Remove a connection and release every topic it was subscribed to.
    ///
    /// Returns the topics the connection held.
    pub fn remove(&self, id: &ConnectionId) -> Vec<Topic> {
        let mut state = self.state.lock();
        let _ = state.connections.remove(id);
        let mut released = Vec::new();
        state.topics.retain(|topic, members| {
            if members.remove(id) {
                released.push(*topic);
            }
            !members.is_empty()
        });
        released.sort();
        debug!(conn_id = %id, released = released.len(), "connection removed");
        released
    }

    /// Add `id` to `topic`. Returns `true` if it was not already a member.
    pub fn subscribe(&self, id: &ConnectionId, topic: Topic) -> Result<bool, HubError> {
        let mut state = self.state.lock();
        if !state.connections.contains_key(id) {
            return Err(HubError::UnknownConnection { id: id.clone() });
        }
        let added = state.topics.entry(topic).or_default().insert(id.clone());
        Ok(added)
    }

    /// Subscribe by wire name, rejecting names outside the topic enumeration.
    pub fn subscribe_str(&self, id: &ConnectionId, topic: &str) -> Result<bool, HubError> {
        self.subscribe(id, topic.parse()?)
    }

    /// Remove `id` from `topic`. Removing an absent member is not an error.
    ///
    /// Returns `true` if membership changed.
    pub fn unsubscribe(&self, id: &ConnectionId, topic: Topic) -> bool {
        let mut state = self.state.lock();
        let Some(members) = state.topics.get_mut(&topic) else {
            return false;
        };
        let removed = members.remove(id);
        if members.is_empty() {
            let _ = state.topics.remove(&topic);
        }
        removed
    }

    /// Unsubscribe by wire name, rejecting names outside the topic enumeration.
    pub fn unsubscribe_str(&self, id: &ConnectionId, topic: &str) -> Result<bool, HubError> {
        Ok(self.unsubscribe(id, topic.parse()?))
    }

    /// Fan a pre-serialized frame out to every subscriber of `topic`.
    pub fn publish(&self, topic: Topic, frame: &Arc<str>) -> DeliveryReport {
        let recipients: Vec<Arc<Connection>> = {
            let state = self.state.lock();
            state
                .topics
                .get(&topic)
                .map(|members| {
                    members
                        .iter()
                        .filter_map(|id| state.connections.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut report = DeliveryReport::default();
        for conn in &recipients {
            if conn.try_send(Arc::clone(frame)) {
                report.delivered += 1;
            } else {
                report.failed += 1;
                warn!(conn_id = %conn.id(), %topic, "failed to enqueue event for connection");
            }
        }
        debug!(
            %topic,
            recipients = recipients.len(),
            delivered = report.delivered,
            failed = report.failed,
            "published event"
        );
        report
    }

    /// Current subscribers of `topic`, sorted.
    pub fn subscribers(&self, topic: Topic) -> Vec<ConnectionId> {
        let state = self.state.lock();
        let mut ids: Vec<ConnectionId> = state
            .topics
            .get(&topic)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Topics `id` is subscribed to, derived from the index.
    pub fn subscriptions(&self, id: &ConnectionId) -> Vec<Topic> {
        let state = self.state.lock();
        let mut topics: Vec<Topic> = state
            .topics
            .iter()
            .filter(|(_, members)| members.contains(id))
            .map(|(topic, _)| *topic)
            .collect();
        topics.sort();
        topics
    }

    /// Capacity of each connection's send channel.
    pub fn send_queue_capacity(&self) -> usize {
        self.send_queue_capacity
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }
}

/// A connection's back-reference into the shared registry.
///
/// Carried by handler contexts for socket-originated calls. It stores only
/// the identifier; membership is always read from the index.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionHandle {
    /// Bind `id` to `registry`.
    pub fn new(id: ConnectionId, registry: Arc<ConnectionRegistry>) -> Self {
        Self { id, registry }
    }

    /// The connection's identifier.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Subscribe this connection to a topic by wire name.
    pub fn subscribe(&self, topic: &str) -> Result<bool, HubError> {
        self.registry.subscribe_str(&self.id, topic)
    }

    /// Unsubscribe this connection from a topic by wire name.
    pub fn unsubscribe(&self, topic: &str) -> Result<bool, HubError> {
        self.registry.unsubscribe_str(&self.id, topic)
    }

    /// Topics this connection is subscribed to.
    pub fn subscriptions(&self) -> Vec<Topic> {
        self.registry.subscriptions(&self.id)
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
