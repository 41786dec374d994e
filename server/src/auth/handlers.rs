//! REST endpoints for account registration, login, and token lifecycle.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::jwt;
use crate::auth::middleware::Claims;
use crate::db::models::{User, USER_COLUMNS};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::users::UserDto;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserDto,
    pub access_token: String,
    pub refresh_token: String,
}

/// POST /api/auth/register — Create an account and issue a token pair.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let username = body.username.trim().to_lowercase();
    let email = body.email.trim().to_lowercase();
    let full_name = body.full_name.trim().to_string();

    if username.is_empty() {
        return Err(ApiError::Validation("username is required".to_string()));
    }
    if full_name.is_empty() {
        return Err(ApiError::Validation("name is required".to_string()));
    }
    if !email.contains('@') {
        return Err(ApiError::Validation(
            "a valid email address is required".to_string(),
        ));
    }
    if body.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let db = state.db.clone();
    let secret = state.jwt_secret.clone();
    let password = body.password;
    let bio = body.bio;

    let response = tokio::task::spawn_blocking(move || {
        // bcrypt is deliberately slow — keep it on the blocking pool
        let password_hash =
            bcrypt::hash(&password, bcrypt::DEFAULT_COST).map_err(|_| ApiError::Internal)?;

        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;

        let taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?1 OR email = ?2",
            rusqlite::params![username, email],
            |row| row.get(0),
        )?;
        if taken > 0 {
            return Err(ApiError::Validation(
                "username or email already in use".to_string(),
            ));
        }

        let user_id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, full_name, bio, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            rusqlite::params![user_id, username, email, password_hash, full_name, bio, now],
        )?;

        issue_token_pair(&conn, &secret, &user_id, &username)
    })
    .await??;

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/auth/login — Verify credentials and issue a token pair.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let db = state.db.clone();
    let secret = state.jwt_secret.clone();
    let username = body.username.trim().to_lowercase();
    let password = body.password;

    let response = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;

        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                [&username],
                User::from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    ApiError::Authorization("invalid credentials".to_string())
                }
                other => other.into(),
            })?;

        let valid =
            bcrypt::verify(&password, &user.password_hash).map_err(|_| ApiError::Internal)?;
        if !valid {
            return Err(ApiError::Authorization("invalid credentials".to_string()));
        }

        issue_token_pair(&conn, &secret, &user.id, &user.username)
    })
    .await??;

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// POST /api/auth/refresh — Rotate a refresh token into a fresh token pair.
/// The presented token is consumed; replaying it fails.
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let db = state.db.clone();
    let secret = state.jwt_secret.clone();
    let token = body.refresh_token;

    let response = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;

        let user_id = jwt::validate_and_consume_refresh_token(&conn, &token)?;
        let user = conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [&user_id],
            User::from_row,
        )?;

        issue_token_pair(&conn, &secret, &user.id, &user.username)
    })
    .await??;

    Ok(Json(response))
}

/// POST /api/auth/logout — Revoke every refresh token for the caller.
pub async fn logout(State(state): State<AppState>, claims: Claims) -> ApiResult<StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        jwt::revoke_refresh_tokens(&conn, &user_id)
    })
    .await??;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/me — Return the authenticated user.
pub async fn me(State(state): State<AppState>, claims: Claims) -> ApiResult<Json<UserDto>> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        let user = conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [&user_id],
            User::from_row,
        )?;
        Ok::<_, ApiError>(user)
    })
    .await??;

    Ok(Json(user.into()))
}

fn issue_token_pair(
    conn: &rusqlite::Connection,
    secret: &[u8],
    user_id: &str,
    username: &str,
) -> ApiResult<AuthResponse> {
    let access_token =
        jwt::issue_access_token(secret, user_id, username).map_err(|_| ApiError::Internal)?;
    let (refresh_token, refresh_hash) = jwt::issue_refresh_token();
    jwt::store_refresh_token(conn, user_id, &refresh_hash)?;

    let user = conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [user_id],
        User::from_row,
    )?;

    Ok(AuthResponse {
        user: user.into(),
        access_token,
        refresh_token,
    })
}
