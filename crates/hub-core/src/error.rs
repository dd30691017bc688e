//! Registry errors.

use crate::ids::ConnectionId;

/// Errors raised by the connection registry and subscription index.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Topic name is not part of the fixed enumeration.
    #[error("unknown topic '{topic}'")]
    UnknownTopic {
        /// The rejected topic name.
        topic: String,
    },

    /// Connection is not (or no longer) registered.
    #[error("connection '{id}' is not registered")]
    UnknownConnection {
        /// The missing connection.
        id: ConnectionId,
    },
}
