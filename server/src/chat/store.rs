//! Conversation state store: chats, participants, messages, read receipts.
//!
//! All functions are synchronous and take an open `&Connection` so callers
//! can compose several operations under a single lock acquisition (handlers
//! run them inside `tokio::task::spawn_blocking`). Durable state written here
//! is the source of truth that live fan-out must never run ahead of.

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::attachments::store::StoredAttachment;
use crate::error::{ApiError, ApiResult};

/// Group size bounds, including the creator.
pub const MIN_GROUP_PARTICIPANTS: usize = 2;
pub const MAX_GROUP_PARTICIPANTS: usize = 20;

/// A chat row plus its participant list.
#[derive(Debug, Clone)]
pub struct Chat {
    pub id: String,
    pub is_group: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub last_message_id: Option<String>,
    pub created_at: String,
    /// Participant ids in join order.
    pub participants: Vec<String>,
}

/// Full message as stored and as broadcast on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender: String,
    pub message: Option<String>,
    pub attachments: Vec<MessageAttachment>,
    pub read_by: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageAttachment {
    pub id: String,
    pub url: String,
}

/// Load a chat with its participants. Unknown id -> NotFound.
pub fn get_chat(conn: &Connection, chat_id: &str) -> ApiResult<Chat> {
    let (id, is_group, name, description, created_by, last_message_id, created_at) = conn
        .query_row(
            "SELECT id, is_group, name, description, created_by, last_message_id, created_at
             FROM chats WHERE id = ?1",
            [chat_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                ApiError::NotFound("chat not found".to_string())
            }
            other => other.into(),
        })?;

    Ok(Chat {
        participants: participants(conn, &id)?,
        id,
        is_group,
        name,
        description,
        created_by,
        last_message_id,
        created_at,
    })
}

/// Participant ids in original join order.
pub fn participants(conn: &Connection, chat_id: &str) -> ApiResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY joined_at, rowid",
    )?;
    let ids = stmt
        .query_map([chat_id], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(ids)
}

pub fn is_participant(conn: &Connection, chat_id: &str, user_id: &str) -> ApiResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
        [chat_id, user_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn user_exists(conn: &Connection, user_id: &str) -> ApiResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?1",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn insert_participant(conn: &Connection, chat_id: &str, user_id: &str) -> ApiResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![chat_id, user_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

/// Create (or return the existing) direct chat between two users.
pub fn create_direct_chat(conn: &Connection, user_a: &str, user_b: &str) -> ApiResult<String> {
    if user_a == user_b {
        return Err(ApiError::Validation(
            "a direct chat needs two distinct users".to_string(),
        ));
    }
    for user in [user_a, user_b] {
        if !user_exists(conn, user)? {
            return Err(ApiError::NotFound(format!("user {user} not found")));
        }
    }

    // A direct pair has at most one chat; reuse it rather than duplicating
    let existing: Option<String> = conn
        .query_row(
            "SELECT c.id FROM chats c
             JOIN chat_participants pa ON pa.chat_id = c.id AND pa.user_id = ?1
             JOIN chat_participants pb ON pb.chat_id = c.id AND pb.user_id = ?2
             WHERE c.is_group = 0",
            [user_a, user_b],
            |row| row.get(0),
        )
        .ok();
    if let Some(id) = existing {
        return Ok(id);
    }

    let chat_id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO chats (id, is_group, created_at) VALUES (?1, 0, ?2)",
        rusqlite::params![chat_id, Utc::now().to_rfc3339()],
    )?;
    insert_participant(conn, &chat_id, user_a)?;
    insert_participant(conn, &chat_id, user_b)?;

    Ok(chat_id)
}

/// Create a group chat. The creator joins first; total participant count
/// (creator plus distinct members) must land in [2, 20].
pub fn create_group_chat(
    conn: &Connection,
    creator: &str,
    members: &[String],
    name: &str,
    description: Option<&str>,
) -> ApiResult<Chat> {
    if name.trim().is_empty() {
        return Err(ApiError::Validation("group name is required".to_string()));
    }

    let mut roster: Vec<&str> = vec![creator];
    for member in members {
        if member != creator && !roster.contains(&member.as_str()) {
            roster.push(member);
        }
    }

    if roster.len() < MIN_GROUP_PARTICIPANTS || roster.len() > MAX_GROUP_PARTICIPANTS {
        return Err(ApiError::Validation(format!(
            "a group needs between {MIN_GROUP_PARTICIPANTS} and {MAX_GROUP_PARTICIPANTS} participants"
        )));
    }

    for user in &roster {
        if !user_exists(conn, user)? {
            return Err(ApiError::NotFound(format!("user {user} not found")));
        }
    }

    let chat_id = Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO chats (id, is_group, name, description, created_by, created_at)
         VALUES (?1, 1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            chat_id,
            name.trim(),
            description,
            creator,
            Utc::now().to_rfc3339()
        ],
    )?;
    for user in &roster {
        insert_participant(conn, &chat_id, user)?;
    }

    get_chat(conn, &chat_id)
}

/// Append a message and bump the chat's last-message pointer.
/// Fails with NotFound for an unknown chat and Authorization when the sender
/// is not a participant; attachment references are persisted alongside.
pub fn append_message(
    conn: &Connection,
    chat_id: &str,
    sender: &str,
    body: Option<&str>,
    attachments: &[StoredAttachment],
) -> ApiResult<Message> {
    // get_chat doubles as the existence check
    let chat = get_chat(conn, chat_id)?;
    if !chat.participants.iter().any(|p| p == sender) {
        return Err(ApiError::Authorization(
            "sender is not a participant of this chat".to_string(),
        ));
    }

    let body = body.map(str::trim).filter(|b| !b.is_empty());
    if body.is_none() && attachments.is_empty() {
        return Err(ApiError::Validation(
            "a message needs text or attachments".to_string(),
        ));
    }

    let message_id = Uuid::now_v7().to_string();
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO messages (id, chat_id, sender, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![message_id, chat_id, sender, body, created_at],
    )?;
    for attachment in attachments {
        conn.execute(
            "INSERT OR IGNORE INTO message_attachments (id, message_id, url, size) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![attachment.id, message_id, attachment.url, attachment.size],
        )?;
    }
    update_last_message(conn, chat_id, &message_id)?;

    Ok(Message {
        id: message_id,
        chat_id: chat_id.to_string(),
        sender: sender.to_string(),
        message: body.map(str::to_string),
        attachments: attachments
            .iter()
            .map(|a| MessageAttachment {
                id: a.id.clone(),
                url: a.url.clone(),
            })
            .collect(),
        read_by: Vec::new(),
        created_at,
    })
}

pub fn update_last_message(conn: &Connection, chat_id: &str, message_id: &str) -> ApiResult<()> {
    conn.execute(
        "UPDATE chats SET last_message_id = ?2 WHERE id = ?1",
        [chat_id, message_id],
    )?;
    Ok(())
}

/// Add the reader to the read set of every not-yet-read message in the chat.
/// Pure set-union: re-running never changes the outcome. Returns the ids of
/// messages whose read set actually grew.
pub fn mark_read(conn: &Connection, chat_id: &str, reader: &str) -> ApiResult<Vec<String>> {
    // Existence check so an unknown chat is NotFound, not silently empty
    get_chat(conn, chat_id)?;

    let mut stmt = conn.prepare(
        "SELECT m.id FROM messages m
         WHERE m.chat_id = ?1
           AND NOT EXISTS (
               SELECT 1 FROM message_reads r WHERE r.message_id = m.id AND r.user_id = ?2
           )
         ORDER BY m.rowid",
    )?;
    let affected: Vec<String> = stmt
        .query_map([chat_id, reader], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();

    let now = Utc::now().to_rfc3339();
    for message_id in &affected {
        conn.execute(
            "INSERT OR IGNORE INTO message_reads (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![message_id, reader, now],
        )?;
    }

    Ok(affected)
}

/// Add members to a group. Only the current creator may do this, and the
/// resulting roster must stay within the participant cap — on any failure
/// the membership is left untouched.
pub fn add_participants(
    conn: &Connection,
    chat_id: &str,
    actor: &str,
    user_ids: &[String],
) -> ApiResult<()> {
    let chat = group_chat_for_update(conn, chat_id, actor)?;

    let mut new_members: Vec<&String> = Vec::new();
    for user in user_ids {
        if !chat.participants.contains(user) && !new_members.contains(&user) {
            new_members.push(user);
        }
    }

    if chat.participants.len() + new_members.len() > MAX_GROUP_PARTICIPANTS {
        return Err(ApiError::Validation(format!(
            "a group cannot exceed {MAX_GROUP_PARTICIPANTS} participants"
        )));
    }

    for user in &new_members {
        if !user_exists(conn, user)? {
            return Err(ApiError::NotFound(format!("user {user} not found")));
        }
    }
    for user in &new_members {
        insert_participant(conn, chat_id, user)?;
    }

    Ok(())
}

/// Remove a participant from a group. Anyone may remove themselves (leave);
/// removing someone else is creator-only. A departing creator hands the role
/// to the first remaining participant by join order before the removal
/// completes; a sole-participant creator simply leaves the group creator-less.
pub fn remove_participant(
    conn: &Connection,
    chat_id: &str,
    actor: &str,
    user_id: &str,
) -> ApiResult<()> {
    let chat = get_chat(conn, chat_id)?;
    if !chat.is_group {
        return Err(ApiError::Validation(
            "direct chat membership cannot change".to_string(),
        ));
    }
    if actor != user_id && chat.created_by.as_deref() != Some(actor) {
        return Err(ApiError::Authorization(
            "only the group creator can remove members".to_string(),
        ));
    }
    if !chat.participants.iter().any(|p| p == user_id) {
        return Err(ApiError::NotFound(
            "user is not a participant of this group".to_string(),
        ));
    }

    if chat.created_by.as_deref() == Some(user_id) {
        reassign_owner_if_creator_leaves(conn, chat_id, user_id)?;
    }

    conn.execute(
        "DELETE FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
        [chat_id, user_id],
    )?;

    Ok(())
}

/// Hand the creator role to the first remaining participant by join order.
/// With nobody left to take it, the group keeps going without a creator.
pub fn reassign_owner_if_creator_leaves(
    conn: &Connection,
    chat_id: &str,
    leaving: &str,
) -> ApiResult<()> {
    let successor: Option<String> = conn
        .query_row(
            "SELECT user_id FROM chat_participants
             WHERE chat_id = ?1 AND user_id != ?2
             ORDER BY joined_at, rowid
             LIMIT 1",
            [chat_id, leaving],
            |row| row.get(0),
        )
        .ok();

    conn.execute(
        "UPDATE chats SET created_by = ?2 WHERE id = ?1",
        rusqlite::params![chat_id, successor],
    )?;

    Ok(())
}

/// Update group name/description. Creator-only.
pub fn update_group(
    conn: &Connection,
    chat_id: &str,
    actor: &str,
    name: Option<&str>,
    description: Option<&str>,
) -> ApiResult<Chat> {
    group_chat_for_update(conn, chat_id, actor)?;

    if let Some(name) = name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("group name is required".to_string()));
        }
        conn.execute(
            "UPDATE chats SET name = ?2 WHERE id = ?1",
            [chat_id, name.trim()],
        )?;
    }
    if let Some(description) = description {
        conn.execute(
            "UPDATE chats SET description = ?2 WHERE id = ?1",
            [chat_id, description],
        )?;
    }

    get_chat(conn, chat_id)
}

/// Shared guard for group mutations: chat must exist, be a group, and the
/// actor must be its current creator.
fn group_chat_for_update(conn: &Connection, chat_id: &str, actor: &str) -> ApiResult<Chat> {
    let chat = get_chat(conn, chat_id)?;
    if !chat.is_group {
        return Err(ApiError::Validation("not a group chat".to_string()));
    }
    if chat.created_by.as_deref() != Some(actor) {
        return Err(ApiError::Authorization(
            "only the group creator can modify the group".to_string(),
        ));
    }
    Ok(chat)
}

/// Load one message with its attachments and read set.
pub fn get_message(conn: &Connection, message_id: &str) -> ApiResult<Message> {
    let (id, chat_id, sender, body, created_at) = conn
        .query_row(
            "SELECT id, chat_id, sender, body, created_at FROM messages WHERE id = ?1",
            [message_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                ApiError::NotFound("message not found".to_string())
            }
            other => other.into(),
        })?;

    let mut stmt =
        conn.prepare("SELECT id, url FROM message_attachments WHERE message_id = ?1 ORDER BY rowid")?;
    let attachments = stmt
        .query_map([&id], |row| {
            Ok(MessageAttachment {
                id: row.get(0)?,
                url: row.get(1)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut stmt = conn
        .prepare("SELECT user_id FROM message_reads WHERE message_id = ?1 ORDER BY read_at, rowid")?;
    let read_by = stmt
        .query_map([&id], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(Message {
        id,
        chat_id,
        sender,
        message: body,
        attachments,
        read_by,
        created_at,
    })
}

/// Message history for a chat in original creation order. `before` is an
/// exclusive message-id cursor for paging backwards; the returned page is
/// still ascending. Returns (messages, has_more).
pub fn list_messages(
    conn: &Connection,
    chat_id: &str,
    before: Option<&str>,
    limit: usize,
) -> ApiResult<(Vec<Message>, bool)> {
    get_chat(conn, chat_id)?;

    let cursor_rowid: i64 = match before {
        Some(message_id) => conn
            .query_row(
                "SELECT rowid FROM messages WHERE id = ?1 AND chat_id = ?2",
                [message_id, chat_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    ApiError::NotFound("cursor message not found".to_string())
                }
                other => other.into(),
            })?,
        None => i64::MAX,
    };

    let mut stmt = conn.prepare(
        "SELECT id FROM messages
         WHERE chat_id = ?1 AND rowid < ?2
         ORDER BY rowid DESC
         LIMIT ?3",
    )?;
    let mut ids: Vec<String> = stmt
        .query_map(
            rusqlite::params![chat_id, cursor_rowid, (limit + 1) as i64],
            |row| row.get::<_, String>(0),
        )?
        .filter_map(|r| r.ok())
        .collect();

    let has_more = ids.len() > limit;
    ids.truncate(limit);
    ids.reverse(); // back to creation order

    let mut messages = Vec::with_capacity(ids.len());
    for id in &ids {
        messages.push(get_message(conn, id)?);
    }

    Ok((messages, has_more))
}

/// Chat summary for the listing endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub is_group: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub participants: Vec<String>,
    pub last_message: Option<Message>,
    pub created_at: String,
}

/// All chats the user participates in, most recently active first.
/// Message ids are UUIDv7, so sorting on last_message_id is a sort by the
/// latest message's creation time.
pub fn list_chats(conn: &Connection, user_id: &str) -> ApiResult<Vec<ChatSummary>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.is_group, c.name, c.description, c.created_by, c.last_message_id, c.created_at
         FROM chats c
         JOIN chat_participants p ON p.chat_id = c.id
         WHERE p.user_id = ?1
         ORDER BY CASE WHEN c.last_message_id IS NULL THEN 1 ELSE 0 END,
                  c.last_message_id DESC,
                  c.created_at DESC",
    )?;

    let rows: Vec<(String, bool, Option<String>, Option<String>, Option<String>, Option<String>, String)> =
        stmt.query_map([user_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut summaries = Vec::with_capacity(rows.len());
    for (id, is_group, name, description, created_by, last_message_id, created_at) in rows {
        let last_message = match &last_message_id {
            Some(message_id) => Some(get_message(conn, message_id)?),
            None => None,
        };
        summaries.push(ChatSummary {
            participants: participants(conn, &id)?,
            id,
            is_group,
            name,
            description,
            created_by,
            last_message,
            created_at,
        });
    }

    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations;

    fn test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        migrations::migrations().to_latest(&mut conn).unwrap();
        conn
    }

    fn seed_user(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, full_name, created_at, updated_at)
             VALUES (?1, ?1, ?1 || '@example.com', 'x', ?1, '2026-01-01T00:00:00+00:00', '2026-01-01T00:00:00+00:00')",
            [id],
        )
        .unwrap();
    }

    fn seed_users(conn: &Connection, ids: &[&str]) {
        for id in ids {
            seed_user(conn, id);
        }
    }

    #[test]
    fn direct_chat_is_deduplicated_per_pair() {
        let conn = test_conn();
        seed_users(&conn, &["a", "b"]);

        let first = create_direct_chat(&conn, "a", "b").unwrap();
        let second = create_direct_chat(&conn, "b", "a").unwrap();
        assert_eq!(first, second);

        let chat = get_chat(&conn, &first).unwrap();
        assert!(!chat.is_group);
        assert_eq!(chat.participants.len(), 2);
    }

    #[test]
    fn direct_chat_rejects_self_and_unknown_users() {
        let conn = test_conn();
        seed_user(&conn, "a");

        assert!(matches!(
            create_direct_chat(&conn, "a", "a"),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            create_direct_chat(&conn, "a", "ghost"),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn group_creation_enforces_participant_bounds() {
        let conn = test_conn();
        seed_user(&conn, "creator");

        // Too small: creator alone
        assert!(matches!(
            create_group_chat(&conn, "creator", &[], "crew", None),
            Err(ApiError::Validation(_))
        ));

        // Too large: creator + 20 members = 21
        let members: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        for member in &members {
            seed_user(&conn, member);
        }
        assert!(matches!(
            create_group_chat(&conn, "creator", &members, "crew", None),
            Err(ApiError::Validation(_))
        ));

        // Exactly 20 is fine
        let chat =
            create_group_chat(&conn, "creator", &members[..19], "crew", Some("hello")).unwrap();
        assert_eq!(chat.participants.len(), 20);
        assert_eq!(chat.created_by.as_deref(), Some("creator"));
        assert_eq!(chat.participants[0], "creator");
    }

    #[test]
    fn adding_a_21st_member_fails_and_leaves_membership_unchanged() {
        let conn = test_conn();
        seed_user(&conn, "creator");
        let members: Vec<String> = (0..19).map(|i| format!("m{i}")).collect();
        for member in &members {
            seed_user(&conn, member);
        }
        seed_user(&conn, "extra");

        let chat = create_group_chat(&conn, "creator", &members, "crew", None).unwrap();
        let err = add_participants(&conn, &chat.id, "creator", &["extra".to_string()]);
        assert!(matches!(err, Err(ApiError::Validation(_))));

        let after = get_chat(&conn, &chat.id).unwrap();
        assert_eq!(after.participants.len(), 20);
        assert!(!after.participants.contains(&"extra".to_string()));
    }

    #[test]
    fn only_the_creator_may_mutate_membership_or_metadata() {
        let conn = test_conn();
        seed_users(&conn, &["creator", "member", "other"]);
        let chat = create_group_chat(
            &conn,
            "creator",
            &["member".to_string()],
            "crew",
            None,
        )
        .unwrap();

        assert!(matches!(
            add_participants(&conn, &chat.id, "member", &["other".to_string()]),
            Err(ApiError::Authorization(_))
        ));
        assert!(matches!(
            remove_participant(&conn, &chat.id, "member", "creator"),
            Err(ApiError::Authorization(_))
        ));
        assert!(matches!(
            update_group(&conn, &chat.id, "member", Some("new name"), None),
            Err(ApiError::Authorization(_))
        ));

        let updated = update_group(&conn, &chat.id, "creator", Some("new name"), None).unwrap();
        assert_eq!(updated.name.as_deref(), Some("new name"));
    }

    #[test]
    fn creator_leaving_hands_role_to_first_remaining_by_join_order() {
        let conn = test_conn();
        seed_users(&conn, &["creator", "second", "third"]);
        let chat = create_group_chat(
            &conn,
            "creator",
            &["second".to_string(), "third".to_string()],
            "crew",
            None,
        )
        .unwrap();

        remove_participant(&conn, &chat.id, "creator", "creator").unwrap();

        let after = get_chat(&conn, &chat.id).unwrap();
        assert_eq!(after.created_by.as_deref(), Some("second"));
        assert_eq!(after.participants, vec!["second", "third"]);
    }

    #[test]
    fn sole_creator_leaving_removes_them_without_reassignment() {
        let conn = test_conn();
        seed_users(&conn, &["creator", "member"]);
        let chat =
            create_group_chat(&conn, "creator", &["member".to_string()], "crew", None).unwrap();

        remove_participant(&conn, &chat.id, "creator", "member").unwrap();
        remove_participant(&conn, &chat.id, "creator", "creator").unwrap();

        let after = get_chat(&conn, &chat.id).unwrap();
        assert_eq!(after.created_by, None);
        assert!(after.participants.is_empty());
    }

    #[test]
    fn append_message_updates_last_message_pointer() {
        let conn = test_conn();
        seed_users(&conn, &["a", "b"]);
        let chat_id = create_direct_chat(&conn, "a", "b").unwrap();

        let first = append_message(&conn, &chat_id, "a", Some("hi"), &[]).unwrap();
        assert_eq!(
            get_chat(&conn, &chat_id).unwrap().last_message_id.as_deref(),
            Some(first.id.as_str())
        );

        let second = append_message(&conn, &chat_id, "b", Some("hey"), &[]).unwrap();
        assert_eq!(
            get_chat(&conn, &chat_id).unwrap().last_message_id.as_deref(),
            Some(second.id.as_str())
        );
    }

    #[test]
    fn append_message_rejects_unknown_chat_outsiders_and_empty_content() {
        let conn = test_conn();
        seed_users(&conn, &["a", "b", "stranger"]);
        let chat_id = create_direct_chat(&conn, "a", "b").unwrap();

        assert!(matches!(
            append_message(&conn, "missing", "a", Some("hi"), &[]),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            append_message(&conn, &chat_id, "stranger", Some("hi"), &[]),
            Err(ApiError::Authorization(_))
        ));
        assert!(matches!(
            append_message(&conn, &chat_id, "a", Some("   "), &[]),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn mark_read_is_an_idempotent_set_union() {
        let conn = test_conn();
        seed_users(&conn, &["a", "b"]);
        let chat_id = create_direct_chat(&conn, "a", "b").unwrap();
        let m1 = append_message(&conn, &chat_id, "a", Some("one"), &[]).unwrap();
        let m2 = append_message(&conn, &chat_id, "a", Some("two"), &[]).unwrap();

        let affected = mark_read(&conn, &chat_id, "b").unwrap();
        assert_eq!(affected, vec![m1.id.clone(), m2.id.clone()]);

        // Second call touches nothing and the read sets are identical
        let affected_again = mark_read(&conn, &chat_id, "b").unwrap();
        assert!(affected_again.is_empty());
        assert_eq!(get_message(&conn, &m1.id).unwrap().read_by, vec!["b"]);
        assert_eq!(get_message(&conn, &m2.id).unwrap().read_by, vec!["b"]);
    }

    #[test]
    fn mark_read_only_covers_messages_present_at_call_time() {
        let conn = test_conn();
        seed_users(&conn, &["a", "b"]);
        let chat_id = create_direct_chat(&conn, "a", "b").unwrap();
        append_message(&conn, &chat_id, "a", Some("one"), &[]).unwrap();
        mark_read(&conn, &chat_id, "b").unwrap();

        let m2 = append_message(&conn, &chat_id, "a", Some("two"), &[]).unwrap();
        assert!(get_message(&conn, &m2.id).unwrap().read_by.is_empty());

        let affected = mark_read(&conn, &chat_id, "b").unwrap();
        assert_eq!(affected, vec![m2.id]);
    }

    #[test]
    fn history_is_returned_in_creation_order_with_cursor_paging() {
        let conn = test_conn();
        seed_users(&conn, &["a", "b"]);
        let chat_id = create_direct_chat(&conn, "a", "b").unwrap();
        for i in 0..5 {
            append_message(&conn, &chat_id, "a", Some(&format!("msg {i}")), &[]).unwrap();
        }

        let (page, has_more) = list_messages(&conn, &chat_id, None, 3).unwrap();
        assert!(has_more);
        let bodies: Vec<_> = page.iter().map(|m| m.message.clone().unwrap()).collect();
        assert_eq!(bodies, vec!["msg 2", "msg 3", "msg 4"]);

        let (earlier, has_more) = list_messages(&conn, &chat_id, Some(&page[0].id), 3).unwrap();
        assert!(!has_more);
        let bodies: Vec<_> = earlier.iter().map(|m| m.message.clone().unwrap()).collect();
        assert_eq!(bodies, vec!["msg 0", "msg 1"]);
    }

    #[test]
    fn chat_listing_sorts_by_latest_activity() {
        let conn = test_conn();
        seed_users(&conn, &["a", "b", "c"]);
        let quiet = create_direct_chat(&conn, "a", "b").unwrap();
        let busy = create_direct_chat(&conn, "a", "c").unwrap();
        append_message(&conn, &busy, "c", Some("ping"), &[]).unwrap();

        let chats = list_chats(&conn, "a").unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].id, busy);
        assert_eq!(
            chats[0].last_message.as_ref().unwrap().message.as_deref(),
            Some("ping")
        );
        assert_eq!(chats[1].id, quiet);
        assert!(chats[1].last_message.is_none());
    }
}
