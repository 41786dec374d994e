use std::sync::Arc;

use crate::db::DbPool;
use crate::ws::registry::PresenceRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Presence registry: user id -> live WebSocket connections
    pub registry: Arc<PresenceRegistry>,
    /// Data directory for the attachment blob store
    pub data_dir: String,
    /// Upload size cap per attachment, in bytes
    pub max_attachment_bytes: usize,
}
