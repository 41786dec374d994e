//! Fan-out: resolve recipients against the presence registry and push.
//!
//! Delivery is best-effort and fire-and-forget. Sends are unbounded-channel
//! pushes that never await network completion; a dead receiver is ignored and
//! never blocks delivery to anyone else. Durable state is the source of
//! truth — live delivery is an optimization.

use axum::extract::ws::Message;

use crate::ws::protocol::ServerEvent;
use crate::ws::registry::PresenceRegistry;

/// Deliver an event to every live connection of each recipient.
/// Offline recipients are silently skipped. Emission is a sequential loop,
/// so events generated by one action arrive at each recipient in order.
pub fn deliver(registry: &PresenceRegistry, event: &ServerEvent, recipients: &[String]) {
    let Some(msg) = encode(event) else { return };

    for user_id in recipients {
        for tx in registry.resolve(user_id) {
            if tx.send(msg.clone()).is_err() {
                tracing::debug!(user_id = %user_id, "Dropped event for closed connection");
            }
        }
    }
}

/// Deliver an event to every connection of every online user.
pub fn broadcast_to_all(registry: &PresenceRegistry, event: &ServerEvent) {
    let Some(msg) = encode(event) else { return };

    for tx in registry.all_senders() {
        let _ = tx.send(msg.clone());
    }
}

/// Serialize once per fan-out; the text frame is cheaply cloned per send.
fn encode(event: &ServerEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode server event");
            None
        }
    }
}
