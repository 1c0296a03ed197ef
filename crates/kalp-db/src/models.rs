//! Database row types. These map directly to SQLite rows and stay
//! distinct from the kalp-types API models.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub password: Option<String>,
    pub google_id: Option<String>,
    pub avatar: Option<String>,
    pub created_at: String,
}

pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub is_error: bool,
    /// JSON-encoded `MessageContext`
    pub context: Option<String>,
    pub created_at: String,
}

/// Fields for a new message. `created_at` is assigned by the insert.
pub struct NewMessage<'a> {
    pub session_id: &'a str,
    pub user_id: &'a str,
    pub role: &'a str,
    pub content: &'a str,
    pub is_error: bool,
    pub context: Option<&'a str>,
}

pub struct NewUser<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub display_name: &'a str,
    pub email: &'a str,
    pub password_hash: Option<&'a str>,
    pub google_id: Option<&'a str>,
    pub avatar: Option<&'a str>,
}
