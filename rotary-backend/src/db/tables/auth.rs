//! Auth session database operations

use chrono::{Duration, Utc};
use rusqlite::{params, OptionalExtension, Result as SqliteResult, Row};

use crate::db::{ts, Database};
use crate::models::Session;

impl Database {
    /// Create a session for a user. Pending sessions only unlock the MFA step.
    pub fn create_session(
        &self,
        token: &str,
        user_id: &str,
        mfa_pending: bool,
        ttl: Duration,
    ) -> SqliteResult<Session> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let expires_at = now + ttl;

        conn.execute(
            "INSERT INTO auth_sessions (token, user_id, mfa_pending, created_at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![token, user_id, mfa_pending as i64, now.to_rfc3339(), expires_at.to_rfc3339()],
        )?;

        Ok(Session {
            id: conn.last_insert_rowid(),
            token: token.to_string(),
            user_id: user_id.to_string(),
            mfa_pending,
            created_at: now,
            expires_at,
        })
    }

    /// Return a fully authenticated, unexpired session
    pub fn validate_session(&self, token: &str) -> SqliteResult<Option<Session>> {
        Ok(self
            .get_session(token)?
            .filter(|s| !s.mfa_pending && s.expires_at > Utc::now()))
    }

    /// Return an unexpired session still waiting for its second factor
    pub fn get_pending_session(&self, token: &str) -> SqliteResult<Option<Session>> {
        Ok(self
            .get_session(token)?
            .filter(|s| s.mfa_pending && s.expires_at > Utc::now()))
    }

    /// Turn a pending session into a full one with a fresh expiry
    pub fn promote_session(&self, token: &str, ttl: Duration) -> SqliteResult<Option<Session>> {
        {
            let conn = self.conn.lock().unwrap();
            let expires_at = (Utc::now() + ttl).to_rfc3339();
            let rows = conn.execute(
                "UPDATE auth_sessions SET mfa_pending = 0, expires_at = ?1 WHERE token = ?2 AND mfa_pending = 1",
                params![expires_at, token],
            )?;
            if rows == 0 {
                return Ok(None);
            }
        }
        self.get_session(token)
    }

    /// Count a wrong code against a pending session; returns the new total
    pub fn record_failed_mfa_attempt(&self, token: &str) -> SqliteResult<u32> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "UPDATE auth_sessions SET failed_attempts = failed_attempts + 1
             WHERE token = ?1 AND mfa_pending = 1
             RETURNING failed_attempts",
            [token],
            |row| row.get(0),
        )
        .optional()
        .map(|attempts| attempts.unwrap_or(0))
    }

    pub fn delete_session(&self, token: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM auth_sessions WHERE token = ?1", [token])?;
        Ok(rows > 0)
    }

    /// Delete expired sessions, returning how many were removed
    pub fn delete_expired_sessions(&self) -> SqliteResult<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM auth_sessions WHERE expires_at <= ?1",
            [Utc::now().to_rfc3339()],
        )
    }

    fn get_session(&self, token: &str) -> SqliteResult<Option<Session>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, token, user_id, mfa_pending, created_at, expires_at FROM auth_sessions WHERE token = ?1",
            [token],
            Self::row_to_session,
        )
        .optional()
    }

    fn row_to_session(row: &Row<'_>) -> SqliteResult<Session> {
        Ok(Session {
            id: row.get(0)?,
            token: row.get(1)?,
            user_id: row.get(2)?,
            mfa_pending: row.get::<_, i64>(3)? != 0,
            created_at: ts(row, 4)?,
            expires_at: ts(row, 5)?,
        })
    }
}
