pub mod actor;
pub mod dispatcher;
pub mod handler;
pub mod protocol;
pub mod registry;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// One live client connection as seen by the presence registry.
/// The id distinguishes simultaneous connections of the same user (multi-device).
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub tx: ConnectionSender,
}

impl ConnectionHandle {
    pub fn new(tx: ConnectionSender) -> Self {
        Self {
            id: Uuid::now_v7(),
            tx,
        }
    }
}
