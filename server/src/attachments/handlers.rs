//! Serving stored attachment blobs.

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};

use crate::attachments::store;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /api/attachments/{id} — Stream a stored blob back to the client.
pub async fn get_attachment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let db = state.db.clone();
    let data_dir = state.data_dir.clone();

    let bytes = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::StorageUnavailable)?;
        store::load_attachment(&conn, &data_dir, &id)
    })
    .await??;

    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    ))
}
