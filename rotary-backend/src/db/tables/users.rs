//! User database operations

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Result as SqliteResult, Row};

use crate::db::{new_id, ts, Database};
use crate::models::User;

const USER_COLUMNS: &str =
    "id, email, display_name, password_hash, external_payment_id, created_at, updated_at";

impl Database {
    pub fn create_user(
        &self,
        email: &str,
        display_name: Option<&str>,
        password_hash: &str,
    ) -> SqliteResult<User> {
        let id = new_id();
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO users (id, email, display_name, password_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![&id, email, display_name, password_hash, &now],
            )?;
        }
        self.get_user(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_user(&self, id: &str) -> SqliteResult<Option<User>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            [id],
            Self::row_to_user,
        )
        .optional()
    }

    pub fn get_user_by_email(&self, email: &str) -> SqliteResult<Option<User>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            [email],
            Self::row_to_user,
        )
        .optional()
    }

    pub fn list_users(&self) -> SqliteResult<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM users ORDER BY created_at", USER_COLUMNS))?;
        let users = stmt
            .query_map([], Self::row_to_user)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(users)
    }

    /// Update profile fields; None leaves a field unchanged
    pub fn update_user(
        &self,
        id: &str,
        display_name: Option<&str>,
        password_hash: Option<&str>,
    ) -> SqliteResult<Option<User>> {
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            if let Some(name) = display_name {
                conn.execute(
                    "UPDATE users SET display_name = ?1, updated_at = ?2 WHERE id = ?3",
                    params![name, &now, id],
                )?;
            }
            if let Some(hash) = password_hash {
                conn.execute(
                    "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
                    params![hash, &now, id],
                )?;
            }
        }
        self.get_user(id)
    }

    /// Set or clear the payment provider customer id
    pub fn set_external_payment_id(&self, id: &str, external_payment_id: Option<&str>) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE users SET external_payment_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![external_payment_id, Utc::now().to_rfc3339(), id],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_user(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    fn row_to_user(row: &Row<'_>) -> SqliteResult<User> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            display_name: row.get(2)?,
            password_hash: row.get(3)?,
            external_payment_id: row.get(4)?,
            created_at: ts(row, 5)?,
            updated_at: ts(row, 6)?,
        })
    }
}
