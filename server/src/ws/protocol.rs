//! Wire protocol for the WebSocket channel.
//!
//! Events travel as JSON text frames shaped `{"event": <name>, "data": <payload>}`.
//! Event names and payload shapes are a compatibility contract with existing
//! clients — do not rename them.

use serde::{Deserialize, Serialize};

use crate::chat::events;
use crate::chat::store::Message;
use crate::state::AppState;

/// Server -> client events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Complete list of online user ids, sent to every connection on any
    /// presence change.
    #[serde(rename = "getOnlineUsers")]
    GetOnlineUsers(Vec<String>),
    /// A message was appended to a chat. Carries the full message.
    #[serde(rename = "newMessage")]
    NewMessage(Message),
    #[serde(rename = "typing")]
    Typing(ChatUser),
    #[serde(rename = "typingStopped")]
    TypingStopped(ChatUser),
    /// A participant marked the chat read.
    #[serde(rename = "messagesSeen")]
    MessagesSeen(ChatUser),
}

/// `{chatId, userId}` payload shared by typing and read-receipt events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    pub chat_id: String,
    pub user_id: String,
}

/// Client -> server events arriving over the socket. The acting user is
/// always the authenticated connection owner, never a field of the frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "typing")]
    Typing(ChatRef),
    #[serde(rename = "typingStopped")]
    TypingStopped(ChatRef),
    #[serde(rename = "messagesSeen")]
    MessagesSeen(ChatRef),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRef {
    pub chat_id: String,
}

/// Handle one incoming text frame: decode and dispatch.
///
/// Failures never travel back over the socket — a malformed frame or a
/// rejected precondition is logged and dropped, and never disturbs other
/// connections.
pub async fn handle_client_event(state: &AppState, user_id: &str, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(
                user_id = %user_id,
                error = %e,
                "Discarding undecodable client frame"
            );
            return;
        }
    };

    let result = match event {
        ClientEvent::Typing(chat) => events::typing(state, &chat.chat_id, user_id, true).await,
        ClientEvent::TypingStopped(chat) => {
            events::typing(state, &chat.chat_id, user_id, false).await
        }
        ClientEvent::MessagesSeen(chat) => events::read_receipt(state, &chat.chat_id, user_id)
            .await
            .map(|_| ()),
    };

    if let Err(e) = result {
        tracing::debug!(
            user_id = %user_id,
            error = %e,
            "Client event rejected"
        );
    }
}
