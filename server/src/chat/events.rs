//! Event protocol: couples each client action to its durable mutation and
//! the fan-out that follows.
//!
//! Every function here completes (or observes the failure of) its durable
//! write before touching the dispatcher, so a live notification can never
//! run ahead of stored state — and a failed write broadcasts nothing.
//! Fan-out itself is best-effort and cannot fail the action.

use crate::attachments::store::{save_attachment, StoredAttachment};
use crate::chat::store;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::ws::dispatcher;
use crate::ws::protocol::{ChatUser, ServerEvent};

/// Everyone in the chat except the acting user — the actor already knows.
fn others(participants: &[String], actor: &str) -> Vec<String> {
    participants
        .iter()
        .filter(|p| p.as_str() != actor)
        .cloned()
        .collect()
}

/// message-sent: append the message (and its attachments) durably, then push
/// `newMessage` to every other participant. The sender gets the message back
/// as the request response, not as an event.
///
/// Attachment policy: each upload is stored independently and a failed one is
/// dropped with a warning — unless the message had no text and every upload
/// failed, in which case the whole action aborts and nothing is written.
pub async fn message_sent(
    state: &AppState,
    chat_id: &str,
    sender: &str,
    body: Option<String>,
    uploads: Vec<Vec<u8>>,
) -> ApiResult<store::Message> {
    let db = state.db.clone();
    let data_dir = state.data_dir.clone();
    let chat_id_owned = chat_id.to_string();
    let sender_owned = sender.to_string();
    let had_uploads = !uploads.is_empty();

    let (message, recipients) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;

        let mut attachments: Vec<StoredAttachment> = Vec::with_capacity(uploads.len());
        for data in &uploads {
            match save_attachment(&conn, &data_dir, data) {
                Ok(stored) => attachments.push(stored),
                Err(e) => {
                    tracing::warn!(error = %e, chat_id = %chat_id_owned, "Dropping failed attachment upload");
                }
            }
        }

        let has_text = body
            .as_deref()
            .map(|b| !b.trim().is_empty())
            .unwrap_or(false);
        if had_uploads && attachments.is_empty() && !has_text {
            // Attachments were the only content and none survived
            return Err(ApiError::StorageUnavailable);
        }

        let message = store::append_message(
            &conn,
            &chat_id_owned,
            &sender_owned,
            body.as_deref(),
            &attachments,
        )?;
        let recipients = others(&store::participants(&conn, &chat_id_owned)?, &sender_owned);

        Ok::<_, ApiError>((message, recipients))
    })
    .await??;

    dispatcher::deliver(
        &state.registry,
        &ServerEvent::NewMessage(message.clone()),
        &recipients,
    );

    Ok(message)
}

/// typing-start / typing-stop: no durable mutation; relay `{chatId, userId}`
/// to the other participants once the chat and membership check out.
pub async fn typing(state: &AppState, chat_id: &str, user_id: &str, started: bool) -> ApiResult<()> {
    let db = state.db.clone();
    let chat_id_owned = chat_id.to_string();
    let user_id_owned = user_id.to_string();

    let recipients = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        let chat = store::get_chat(&conn, &chat_id_owned)?;
        if !chat.participants.iter().any(|p| p == &user_id_owned) {
            return Err(ApiError::Authorization(
                "not a participant of this chat".to_string(),
            ));
        }
        Ok::<_, ApiError>(others(&chat.participants, &user_id_owned))
    })
    .await??;

    let payload = ChatUser {
        chat_id: chat_id.to_string(),
        user_id: user_id.to_string(),
    };
    let event = if started {
        ServerEvent::Typing(payload)
    } else {
        ServerEvent::TypingStopped(payload)
    };
    dispatcher::deliver(&state.registry, &event, &recipients);

    Ok(())
}

/// read-receipt: union-add the reader into the read set of every unread
/// message, then tell the other participants via `messagesSeen`. Idempotent —
/// a repeat call changes nothing durable but still broadcasts.
pub async fn read_receipt(
    state: &AppState,
    chat_id: &str,
    reader: &str,
) -> ApiResult<Vec<String>> {
    let db = state.db.clone();
    let chat_id_owned = chat_id.to_string();
    let reader_owned = reader.to_string();

    let (affected, recipients) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        let affected = store::mark_read(&conn, &chat_id_owned, &reader_owned)?;
        let recipients = others(&store::participants(&conn, &chat_id_owned)?, &reader_owned);
        Ok::<_, ApiError>((affected, recipients))
    })
    .await??;

    dispatcher::deliver(
        &state.registry,
        &ServerEvent::MessagesSeen(ChatUser {
            chat_id: chat_id.to_string(),
            user_id: reader.to_string(),
        }),
        &recipients,
    );

    Ok(affected)
}
