/// Database row types shared across handler modules.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.

/// User record in the users table
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub created_at: String,
}

impl User {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            full_name: row.get(4)?,
            avatar_url: row.get(5)?,
            bio: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

/// Column list matching `User::from_row`.
pub const USER_COLUMNS: &str =
    "id, username, email, password_hash, full_name, avatar_url, bio, created_at";
