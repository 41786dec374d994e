//! REST endpoints for user lookup and search.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::db::models::{User, USER_COLUMNS};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Public view of a user — never exposes the password hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub created_at: String,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar_url: user.avatar_url,
            bio: user.bio,
            created_at: user.created_at,
        }
    }
}

/// GET /api/users/{id} — Look up a user by id. JWT auth required.
pub async fn get_user(
    State(state): State<AppState>,
    _claims: Claims,
    Path(id): Path<String>,
) -> ApiResult<Json<UserDto>> {
    let db = state.db.clone();

    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [&id],
            User::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                ApiError::NotFound("user not found".to_string())
            }
            other => other.into(),
        })
    })
    .await??;

    Ok(Json(user.into()))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: String,
}

/// GET /api/users?search= — Search users by username or full name.
/// JWT auth required. The requester is excluded from results.
pub async fn search_users(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<UserDto>>> {
    let db = state.db.clone();
    let requester = claims.sub.clone();
    let pattern = format!("%{}%", query.search);

    let users = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE id != ?1 AND (username LIKE ?2 OR full_name LIKE ?2)
             ORDER BY username
             LIMIT 20"
        ))?;

        let users: Vec<User> = stmt
            .query_map(rusqlite::params![requester, pattern], User::from_row)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, ApiError>(users)
    })
    .await??;

    Ok(Json(users.into_iter().map(UserDto::from).collect()))
}
