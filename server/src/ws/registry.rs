//! Presence registry: user id -> live WebSocket connections.
//!
//! A user may hold multiple simultaneous connections (multiple devices/tabs);
//! presence is registry occupancy. Every register/unregister emits one
//! `getOnlineUsers` broadcast carrying the complete online id list to every
//! connection, so clients never need to diff presence state.

use dashmap::DashMap;
use uuid::Uuid;

use crate::ws::dispatcher;
use crate::ws::protocol::ServerEvent;
use crate::ws::{ConnectionHandle, ConnectionSender};

/// Owned presence state, created once at startup and injected via `AppState`.
/// DashMap gives atomic per-entry updates, so connect and disconnect racing
/// for the same user cannot lose either update.
pub struct PresenceRegistry {
    connections: DashMap<String, Vec<ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Bind a connection to a user. Idempotent per handle id.
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) {
        {
            let mut handles = self.connections.entry(user_id.to_string()).or_default();
            if !handles.iter().any(|h| h.id == handle.id) {
                handles.push(handle);
            }
        }

        let conn_count = self
            .connections
            .get(user_id)
            .map(|v| v.len())
            .unwrap_or(0);
        tracing::debug!(
            user_id = %user_id,
            connections = conn_count,
            "Connection registered"
        );

        self.broadcast_presence();
    }

    /// Remove the binding for whichever user owns this handle. Removing the
    /// last handle for a user takes them offline. Safe to call for a handle
    /// that was never registered (teardown after a failed handshake).
    pub fn unregister(&self, handle_id: Uuid) {
        let owner = self.connections.iter().find_map(|entry| {
            entry
                .value()
                .iter()
                .any(|h| h.id == handle_id)
                .then(|| entry.key().clone())
        });

        if let Some(user_id) = &owner {
            let mut went_offline = false;
            if let Some(mut handles) = self.connections.get_mut(user_id) {
                handles.retain(|h| h.id != handle_id);
                went_offline = handles.is_empty();
            }
            if went_offline {
                // remove_if re-checks emptiness so a register racing in
                // between keeps its entry
                self.connections.remove_if(user_id, |_, v| v.is_empty());
            }

            tracing::debug!(user_id = %user_id, "Connection unregistered");
        }

        self.broadcast_presence();
    }

    /// Look up the live senders for a user. Returns empty when offline —
    /// absence is a valid, silent outcome, never an error.
    pub fn resolve(&self, user_id: &str) -> Vec<ConnectionSender> {
        self.connections
            .get(user_id)
            .map(|handles| handles.iter().map(|h| h.tx.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    /// Ids of all currently online users.
    pub fn online_users(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Senders for every connection of every user.
    pub(crate) fn all_senders(&self) -> Vec<ConnectionSender> {
        self.connections
            .iter()
            .flat_map(|entry| entry.value().iter().map(|h| h.tx.clone()).collect::<Vec<_>>())
            .collect()
    }

    fn broadcast_presence(&self) {
        let event = ServerEvent::GetOnlineUsers(self.online_users());
        dispatcher::broadcast_to_all(self, &event);
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
