use axum::{middleware, Json, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::attachments::handlers as attachment_handlers;
use crate::auth::handlers as auth_handlers;
use crate::auth::middleware::JwtSecret;
use crate::chat::handlers as chat_handlers;
use crate::friends::handlers as friend_handlers;
use crate::state::AppState;
use crate::users::handlers as user_handlers;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting: 5 requests per minute per IP on auth endpoints.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // 1 token every 12 seconds = 5 per minute
            .burst_size(5) // Allow burst of 5
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    // Credential endpoints get the rate limit; token refresh and logout are
    // authenticated flows and stay outside it
    let auth_routes = Router::new()
        .route(
            "/api/auth/register",
            axum::routing::post(auth_handlers::register),
        )
        .route("/api/auth/login", axum::routing::post(auth_handlers::login))
        .layer(GovernorLayer {
            config: governor_config,
        });

    let session_routes = Router::new()
        .route(
            "/api/auth/refresh",
            axum::routing::post(auth_handlers::refresh),
        )
        .route(
            "/api/auth/logout",
            axum::routing::post(auth_handlers::logout),
        )
        .route("/api/auth/me", axum::routing::get(auth_handlers::me));

    let user_routes = Router::new()
        .route("/api/users", axum::routing::get(user_handlers::search_users))
        .route(
            "/api/users/{id}",
            axum::routing::get(user_handlers::get_user),
        );

    let friend_routes = Router::new()
        .route(
            "/api/requests",
            axum::routing::post(friend_handlers::send_request),
        )
        .route(
            "/api/requests/incoming",
            axum::routing::get(friend_handlers::incoming_requests),
        )
        .route(
            "/api/requests/pending",
            axum::routing::get(friend_handlers::pending_requests),
        )
        .route(
            "/api/requests/{id}",
            axum::routing::put(friend_handlers::respond_to_request),
        )
        .route(
            "/api/requests/{id}",
            axum::routing::delete(friend_handlers::withdraw_request),
        )
        .route(
            "/api/friends",
            axum::routing::get(friend_handlers::list_friends),
        );

    // Note: /api/chats/group MUST come before /api/chats/{id} to avoid path param conflict.
    let chat_routes = Router::new()
        .route("/api/chats", axum::routing::get(chat_handlers::list_chats))
        .route(
            "/api/chats/group",
            axum::routing::post(chat_handlers::create_group),
        )
        .route(
            "/api/chats/group/{id}",
            axum::routing::put(chat_handlers::update_group),
        )
        .route(
            "/api/chats/group/{id}/leave",
            axum::routing::put(chat_handlers::leave_group),
        )
        .route(
            "/api/chats/group/{id}/members/add",
            axum::routing::put(chat_handlers::add_members),
        )
        .route(
            "/api/chats/group/{id}/members/remove",
            axum::routing::put(chat_handlers::remove_members),
        )
        .route(
            "/api/chats/{id}/messages",
            axum::routing::get(chat_handlers::get_messages),
        )
        .route(
            "/api/chats/{id}/messages",
            axum::routing::post(chat_handlers::send_message),
        )
        .route(
            "/api/chats/{id}/seen",
            axum::routing::post(chat_handlers::mark_seen),
        )
        .route(
            "/api/chats/{id}/typing",
            axum::routing::post(chat_handlers::typing),
        );

    let attachment_routes = Router::new().route(
        "/api/attachments/{id}",
        axum::routing::get(attachment_handlers::get_attachment),
    );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(session_routes)
        .merge(user_routes)
        .merge(friend_routes)
        .merge(chat_routes)
        .merge(attachment_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
