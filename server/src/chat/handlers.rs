//! REST endpoints for conversations: listing, history, sending, read
//! receipts, and group management.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::events;
use crate::chat::store::{self, Chat, ChatSummary, Message};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::ws::protocol::ChatUser;

/// Default page size for message history.
const DEFAULT_LIMIT: usize = 50;
/// Maximum page size for message history.
const MAX_LIMIT: usize = 100;
/// Upload cap per message, matching the client form.
const MAX_ATTACHMENTS_PER_MESSAGE: usize = 5;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDto {
    pub id: String,
    pub is_group: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub participants: Vec<String>,
    pub created_at: String,
}

impl From<Chat> for ChatDto {
    fn from(chat: Chat) -> Self {
        Self {
            id: chat.id,
            is_group: chat.is_group,
            name: chat.name,
            description: chat.description,
            created_by: chat.created_by,
            participants: chat.participants,
            created_at: chat.created_at,
        }
    }
}

/// GET /api/chats — All chats for the caller, most recently active first.
pub async fn list_chats(
    State(state): State<AppState>,
    claims: Claims,
) -> ApiResult<Json<Vec<ChatSummary>>> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let chats = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        store::list_chats(&conn, &user_id)
    })
    .await??;

    Ok(Json(chats))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// GET /api/chats/{id}/messages?before&limit — Message history in creation
/// order. Participants only.
pub async fn get_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let before = query.before;

    let (messages, has_more) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        if !store::is_participant(&conn, &chat_id, &user_id)? {
            // get_chat distinguishes a missing chat from an outsider
            store::get_chat(&conn, &chat_id)?;
            return Err(ApiError::Authorization(
                "not a participant of this chat".to_string(),
            ));
        }
        store::list_messages(&conn, &chat_id, before.as_deref(), limit)
    })
    .await??;

    Ok(Json(HistoryResponse { messages, has_more }))
}

/// POST /api/chats/{id}/messages — Send a message. Multipart form with an
/// optional `message` text field and up to five `attachments` file parts.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let mut body: Option<String> = None;
    let mut uploads: Vec<Vec<u8>> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        // name() borrows the field, which text()/bytes() consume
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("message") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("unreadable message field: {e}")))?;
                body = Some(text);
            }
            Some("attachments") => {
                if uploads.len() >= MAX_ATTACHMENTS_PER_MESSAGE {
                    return Err(ApiError::Validation(format!(
                        "at most {MAX_ATTACHMENTS_PER_MESSAGE} attachments per message"
                    )));
                }
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("unreadable attachment: {e}")))?;
                if data.len() > state.max_attachment_bytes {
                    return Err(ApiError::Validation(format!(
                        "attachment exceeds {} bytes",
                        state.max_attachment_bytes
                    )));
                }
                uploads.push(data.to_vec());
            }
            _ => {
                // Unknown fields are ignored rather than rejected
            }
        }
    }

    let message = events::message_sent(&state, &chat_id, &claims.sub, body, uploads).await?;

    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenResponse {
    pub chat_id: String,
    pub user_id: String,
    pub message_ids: Vec<String>,
}

/// POST /api/chats/{id}/seen — Mark every message in the chat read.
pub async fn mark_seen(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<SeenResponse>> {
    let message_ids = events::read_receipt(&state, &chat_id, &claims.sub).await?;

    Ok(Json(SeenResponse {
        chat_id,
        user_id: claims.sub,
        message_ids,
    }))
}

/// POST /api/chats/{id}/typing — Typing indicator over REST for clients
/// without an open socket. Body: {"started": bool}.
#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    pub started: bool,
}

pub async fn typing(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
    Json(body): Json<TypingRequest>,
) -> ApiResult<Json<ChatUser>> {
    events::typing(&state, &chat_id, &claims.sub, body.started).await?;

    Ok(Json(ChatUser {
        chat_id,
        user_id: claims.sub,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub members: Vec<String>,
}

/// POST /api/chats/group — Create a group chat with the caller as creator.
pub async fn create_group(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateGroupRequest>,
) -> ApiResult<(StatusCode, Json<ChatDto>)> {
    let db = state.db.clone();
    let creator = claims.sub;

    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        store::create_group_chat(
            &conn,
            &creator,
            &body.members,
            &body.name,
            body.description.as_deref(),
        )
    })
    .await??;

    Ok((StatusCode::CREATED, Json(chat.into())))
}

#[derive(Debug, Deserialize)]
pub struct UpdateGroupRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// PUT /api/chats/group/{id} — Update group metadata. Creator-only.
pub async fn update_group(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
    Json(body): Json<UpdateGroupRequest>,
) -> ApiResult<Json<ChatDto>> {
    let db = state.db.clone();
    let actor = claims.sub;

    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        store::update_group(
            &conn,
            &chat_id,
            &actor,
            body.name.as_deref(),
            body.description.as_deref(),
        )
    })
    .await??;

    Ok(Json(chat.into()))
}

/// PUT /api/chats/group/{id}/leave — Leave a group. A departing creator hands
/// the role to the longest-standing remaining participant first.
pub async fn leave_group(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
) -> ApiResult<StatusCode> {
    let db = state.db.clone();
    let actor = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        store::remove_participant(&conn, &chat_id, &actor, &actor)
    })
    .await??;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct MembersRequest {
    pub members: Vec<String>,
}

/// PUT /api/chats/group/{id}/members/add — Add members. Creator-only.
pub async fn add_members(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
    Json(body): Json<MembersRequest>,
) -> ApiResult<Json<ChatDto>> {
    let db = state.db.clone();
    let actor = claims.sub;

    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        store::add_participants(&conn, &chat_id, &actor, &body.members)?;
        store::get_chat(&conn, &chat_id)
    })
    .await??;

    Ok(Json(chat.into()))
}

/// PUT /api/chats/group/{id}/members/remove — Remove members. Creator-only.
pub async fn remove_members(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
    Json(body): Json<MembersRequest>,
) -> ApiResult<Json<ChatDto>> {
    let db = state.db.clone();
    let actor = claims.sub;

    let chat = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        for user_id in &body.members {
            store::remove_participant(&conn, &chat_id, &actor, user_id)?;
        }
        store::get_chat(&conn, &chat_id)
    })
    .await??;

    Ok(Json(chat.into()))
}
