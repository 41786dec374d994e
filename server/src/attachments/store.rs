//! Attachment blob storage: metadata in SQLite, bytes on disk.
//!
//! Attachments are content-addressed by their SHA-256 hash, stored as
//! `{data_dir}/attachments/{hex_hash}` with a metadata row in `attachments`.
//! Re-uploading identical bytes dedupes to the same id.

use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{ApiError, ApiResult};

/// Stable reference to a stored blob, embeddable in messages.
#[derive(Debug, Clone)]
pub struct StoredAttachment {
    pub id: String,
    pub url: String,
    pub size: i64,
}

/// Compute the attachment storage directory path.
fn attachments_dir(data_dir: &str) -> PathBuf {
    Path::new(data_dir).join("attachments")
}

/// Compute the file path for an attachment given its hex hash id.
fn attachment_file_path(data_dir: &str, id: &str) -> PathBuf {
    attachments_dir(data_dir).join(id)
}

pub fn attachment_url(id: &str) -> String {
    format!("/api/attachments/{id}")
}

/// Store a blob: hash, write file, insert metadata.
/// Storing the same bytes twice returns the same reference.
pub fn save_attachment(
    conn: &Connection,
    data_dir: &str,
    data: &[u8],
) -> ApiResult<StoredAttachment> {
    let id = hex::encode(Sha256::digest(data));

    let dir = attachments_dir(data_dir);
    std::fs::create_dir_all(&dir).map_err(|e| {
        tracing::error!(error = %e, "Failed to create attachments directory");
        ApiError::StorageUnavailable
    })?;

    let file_path = attachment_file_path(data_dir, &id);
    if !file_path.exists() {
        std::fs::write(&file_path, data).map_err(|e| {
            tracing::error!(error = %e, "Failed to write attachment file");
            ApiError::StorageUnavailable
        })?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO attachments (id, size, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![id, data.len() as i64, chrono::Utc::now().to_rfc3339()],
    )?;

    tracing::debug!(id = %id, bytes = data.len(), "Stored attachment");

    Ok(StoredAttachment {
        url: attachment_url(&id),
        size: data.len() as i64,
        id,
    })
}

/// Retrieve a blob by id. Returns NotFound for unknown ids.
pub fn load_attachment(conn: &Connection, data_dir: &str, id: &str) -> ApiResult<Vec<u8>> {
    // Ids are hex hashes; reject anything else before touching the filesystem
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiError::NotFound("attachment not found".to_string()));
    }

    let known: i64 = conn.query_row(
        "SELECT COUNT(*) FROM attachments WHERE id = ?1",
        [id],
        |row| row.get(0),
    )?;
    if known == 0 {
        return Err(ApiError::NotFound("attachment not found".to_string()));
    }

    let file_path = attachment_file_path(data_dir, id);
    std::fs::read(&file_path).map_err(|e| {
        tracing::error!(error = %e, id = %id, "Failed to read attachment file");
        ApiError::StorageUnavailable
    })
}
