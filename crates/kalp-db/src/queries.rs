use crate::Database;
use crate::convert::timestamp;
use crate::models::{MessageRow, NewMessage, NewUser, SessionRow, UserRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str =
    "id, username, display_name, email, password, google_id, avatar, created_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<()> {
        let now = timestamp(chrono::Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, display_name, email, password, google_id, avatar, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    user.id,
                    user.username,
                    user.display_name,
                    user.email,
                    user.password_hash,
                    user.google_id,
                    user.avatar,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_google_id(&self, google_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "google_id", google_id))
    }

    /// Attach a Google account to an existing user. Keeps an existing avatar
    /// when none is supplied.
    pub fn link_google_account(&self, id: &str, google_id: &str, avatar: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET google_id = ?2, avatar = COALESCE(?3, avatar) WHERE id = ?1",
                rusqlite::params![id, google_id, avatar],
            )?;
            Ok(())
        })
    }

    /// Update profile fields that are `Some`. Returns the updated row.
    pub fn update_profile(
        &self,
        id: &str,
        display_name: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users
                 SET display_name = COALESCE(?2, display_name), avatar = COALESCE(?3, avatar)
                 WHERE id = ?1",
                rusqlite::params![id, display_name, avatar],
            )?;
            query_user(conn, "id", id)
        })
    }

    // -- Sessions --

    pub fn create_session(&self, id: &str, user_id: &str, title: &str) -> Result<()> {
        let now = timestamp(chrono::Utc::now());
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, user_id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![id, user_id, title, now],
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_id, title, created_at, updated_at FROM sessions WHERE id = ?1",
                [id],
                session_from_row,
            )
            .optional()
        })
    }

    /// All sessions owned by a user, most recently updated first.
    pub fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, created_at, updated_at
                 FROM sessions
                 WHERE user_id = ?1
                 ORDER BY updated_at DESC, rowid DESC",
            )?;
            let rows = stmt
                .query_map([user_id], session_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete a session and its messages. Returns false if the session does
    /// not exist or belongs to someone else.
    pub fn delete_session(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM sessions WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
            )?;
            Ok(deleted > 0)
        })
    }

    // -- Messages --

    /// Append a message and bump the session's `updated_at`. Returns the new
    /// message's row id.
    pub fn append_message(&self, msg: &NewMessage<'_>) -> Result<i64> {
        let now = timestamp(chrono::Utc::now());
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO messages (session_id, user_id, role, content, is_error, context, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    msg.session_id,
                    msg.user_id,
                    msg.role,
                    msg.content,
                    msg.is_error,
                    msg.context,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![msg.session_id, now],
            )?;
            tx.commit()?;
            Ok(id)
        })
    }

    /// Every message in a session, in append order.
    pub fn get_messages(&self, session_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, is_error, context, created_at
                 FROM messages
                 WHERE session_id = ?1
                 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([session_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The last `limit` messages of a session, oldest first.
    pub fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, is_error, context, created_at
                 FROM messages
                 WHERE session_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )?;
            let mut rows = stmt
                .query_map(rusqlite::params![session_id, limit as i64], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Number of prompts a user has sent since `since` (a `timestamp()` string).
    pub fn count_user_prompts_since(&self, user_id: &str, since: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE user_id = ?1 AND role = 'user' AND created_at >= ?2",
                [user_id, since],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    // -- Token revocation --

    /// Revoke a token id until `expires_at` (unix seconds). Also drops
    /// revocations whose tokens have expired on their own.
    pub fn revoke_token(&self, jti: &str, expires_at: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.with_conn(|conn| {
            conn.execute("DELETE FROM revoked_tokens WHERE expires_at < ?1", [now])?;
            conn.execute(
                "INSERT OR IGNORE INTO revoked_tokens (jti, expires_at) VALUES (?1, ?2)",
                rusqlite::params![jti, expires_at],
            )?;
            Ok(())
        })
    }

    pub fn is_token_revoked(&self, jti: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM revoked_tokens WHERE jti = ?1", [jti], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always one of our own literals, never user input
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                display_name: row.get(2)?,
                email: row.get(3)?,
                password: row.get(4)?,
                google_id: row.get(5)?,
                avatar: row.get(6)?,
                created_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        is_error: row.get(4)?,
        context: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
