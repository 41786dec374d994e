//! Friend-request workflow: send, accept/reject, withdraw, listings.
//!
//! Approving a request is what creates the direct chat between the two
//! users — there is no separate chat-creation endpoint for direct chats.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::chat::store;
use crate::db::models::User;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::users::UserDto;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequestBody {
    pub receiver_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDto {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub status: String,
    pub created_at: String,
}

/// A pending request joined with the counterpart's profile, for listings.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWithUser {
    pub id: String,
    pub status: String,
    pub user: UserDto,
    pub created_at: String,
}

/// POST /api/requests — Send a friend request.
pub async fn send_request(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendRequestBody>,
) -> ApiResult<(StatusCode, Json<RequestDto>)> {
    let db = state.db.clone();
    let sender = claims.sub;
    let receiver = body.receiver_id;

    if receiver == sender {
        return Err(ApiError::Validation(
            "you can't send a request to yourself".to_string(),
        ));
    }

    let request = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;

        let receiver_known: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            [&receiver],
            |row| row.get(0),
        )?;
        if receiver_known == 0 {
            return Err(ApiError::NotFound("user not found".to_string()));
        }

        // One live edge per pair: a pending or approved request in either
        // direction blocks a new one
        let existing: Option<String> = conn
            .query_row(
                "SELECT status FROM friend_requests
                 WHERE ((sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1))
                   AND status IN ('pending', 'approved')",
                [&sender, &receiver],
                |row| row.get(0),
            )
            .ok();
        match existing.as_deref() {
            Some("approved") => {
                return Err(ApiError::Validation(
                    "you are already friends with this user".to_string(),
                ))
            }
            Some(_) => {
                return Err(ApiError::Validation(
                    "a friend request already exists between you".to_string(),
                ))
            }
            None => {}
        }

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO friend_requests (id, sender, receiver, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
            rusqlite::params![id, sender, receiver, now],
        )?;

        Ok::<_, ApiError>(RequestDto {
            id,
            sender,
            receiver,
            status: "pending".to_string(),
            created_at: now,
        })
    })
    .await??;

    Ok((StatusCode::CREATED, Json(request)))
}

#[derive(Debug, Deserialize)]
pub struct RespondBody {
    pub status: String,
}

/// PUT /api/requests/{id} — Accept or reject an incoming request. Receiver
/// only. Approval creates the direct chat between the two users.
pub async fn respond_to_request(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
    Json(body): Json<RespondBody>,
) -> ApiResult<Json<RequestDto>> {
    if !["approved", "rejected"].contains(&body.status.as_str()) {
        return Err(ApiError::Validation("invalid status".to_string()));
    }

    let db = state.db.clone();
    let receiver = claims.sub;
    let status = body.status;

    let request = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;

        let (sender, created_at): (String, String) = conn
            .query_row(
                "SELECT sender, created_at FROM friend_requests
                 WHERE id = ?1 AND receiver = ?2 AND status = 'pending'",
                [&id, &receiver],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    ApiError::NotFound("request not found".to_string())
                }
                other => other.into(),
            })?;

        conn.execute(
            "UPDATE friend_requests SET status = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![id, status, Utc::now().to_rfc3339()],
        )?;

        if status == "approved" {
            store::create_direct_chat(&conn, &sender, &receiver)?;
        }

        Ok::<_, ApiError>(RequestDto {
            id,
            sender,
            receiver,
            status,
            created_at,
        })
    })
    .await??;

    Ok(Json(request))
}

/// DELETE /api/requests/{id} — Withdraw a pending request. Sender only.
pub async fn withdraw_request(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let db = state.db.clone();
    let sender = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        let deleted = conn.execute(
            "DELETE FROM friend_requests WHERE id = ?1 AND sender = ?2 AND status = 'pending'",
            [&id, &sender],
        )?;
        if deleted == 0 {
            return Err(ApiError::NotFound("request not found".to_string()));
        }
        Ok(())
    })
    .await??;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/requests/incoming — Pending requests addressed to the caller.
pub async fn incoming_requests(
    State(state): State<AppState>,
    claims: Claims,
) -> ApiResult<Json<Vec<RequestWithUser>>> {
    list_pending(state, claims.sub, Direction::Incoming).await
}

/// GET /api/requests/pending — Pending requests the caller has sent.
pub async fn pending_requests(
    State(state): State<AppState>,
    claims: Claims,
) -> ApiResult<Json<Vec<RequestWithUser>>> {
    list_pending(state, claims.sub, Direction::Outgoing).await
}

enum Direction {
    Incoming,
    Outgoing,
}

async fn list_pending(
    state: AppState,
    user_id: String,
    direction: Direction,
) -> ApiResult<Json<Vec<RequestWithUser>>> {
    let db = state.db.clone();

    // Join against the counterpart side of the edge
    let sql = match direction {
        Direction::Incoming => format!(
            "SELECT r.id, r.status, r.created_at, {USER_COLUMNS_QUALIFIED}
             FROM friend_requests r JOIN users u ON u.id = r.sender
             WHERE r.receiver = ?1 AND r.status = 'pending'
             ORDER BY r.created_at DESC"
        ),
        Direction::Outgoing => format!(
            "SELECT r.id, r.status, r.created_at, {USER_COLUMNS_QUALIFIED}
             FROM friend_requests r JOIN users u ON u.id = r.receiver
             WHERE r.sender = ?1 AND r.status = 'pending'
             ORDER BY r.created_at DESC"
        ),
    };

    let requests = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        let mut stmt = conn.prepare(&sql)?;
        let requests: Vec<RequestWithUser> = stmt
            .query_map([&user_id], |row| {
                Ok(RequestWithUser {
                    id: row.get(0)?,
                    status: row.get(1)?,
                    created_at: row.get(2)?,
                    user: user_dto_from_offset(row, 3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok::<_, ApiError>(requests)
    })
    .await??;

    Ok(Json(requests))
}

#[derive(Debug, Deserialize)]
pub struct FriendsQuery {
    #[serde(default)]
    pub search: String,
}

/// GET /api/friends — Approved friendships as the counterpart's profile,
/// optionally filtered by username/email substring.
pub async fn list_friends(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<FriendsQuery>,
) -> ApiResult<Json<Vec<UserDto>>> {
    let db = state.db.clone();
    let user_id = claims.sub;
    let pattern = format!("%{}%", query.search);

    let friends = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS_QUALIFIED}
             FROM friend_requests r
             JOIN users u ON u.id = CASE WHEN r.sender = ?1 THEN r.receiver ELSE r.sender END
             WHERE (r.sender = ?1 OR r.receiver = ?1) AND r.status = 'approved'
               AND (u.username LIKE ?2 OR u.email LIKE ?2)
             ORDER BY u.username",
        ))?;
        let friends: Vec<User> = stmt
            .query_map(rusqlite::params![user_id, pattern], |row| {
                user_row_from_offset(row, 0)
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok::<_, ApiError>(friends)
    })
    .await??;

    Ok(Json(friends.into_iter().map(UserDto::from).collect()))
}

/// `USER_COLUMNS` with a `u.` qualifier for joined queries.
const USER_COLUMNS_QUALIFIED: &str =
    "u.id, u.username, u.email, u.password_hash, u.full_name, u.avatar_url, u.bio, u.created_at";

fn user_row_from_offset(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(offset)?,
        username: row.get(offset + 1)?,
        email: row.get(offset + 2)?,
        password_hash: row.get(offset + 3)?,
        full_name: row.get(offset + 4)?,
        avatar_url: row.get(offset + 5)?,
        bio: row.get(offset + 6)?,
        created_at: row.get(offset + 7)?,
    })
}

fn user_dto_from_offset(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<UserDto> {
    user_row_from_offset(row, offset).map(UserDto::from)
}
