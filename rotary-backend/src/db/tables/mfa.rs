//! MFA method and recovery code database operations

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Result as SqliteResult, Row};

use crate::db::{new_id, opt_ts, ts, Database};
use crate::models::{MfaMethod, NewMfaMethod, RecoveryCode};

const METHOD_COLUMNS: &str = "id, user_id, method_type, identifier, secret, algorithm, digits, period, \
                              verified, is_primary, last_used_at, created_at, updated_at";

impl Database {
    /// Insert a method. A primary method demotes the user's other methods in the same transaction.
    pub fn create_mfa_method(&self, method: &NewMfaMethod) -> SqliteResult<MfaMethod> {
        let id = new_id();
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();

            if method.is_primary {
                tx.execute(
                    "UPDATE mfa_methods SET is_primary = 0, updated_at = ?1 WHERE user_id = ?2 AND is_primary = 1",
                    params![&now, &method.user_id],
                )?;
            }

            tx.execute(
                "INSERT INTO mfa_methods (id, user_id, method_type, identifier, secret, algorithm, digits, period,
                    verified, is_primary, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?10)",
                params![
                    &id,
                    &method.user_id,
                    method.method_type.to_string(),
                    &method.identifier,
                    &method.secret,
                    method.algorithm.to_string(),
                    method.digits,
                    method.period as i64,
                    method.is_primary as i64,
                    &now
                ],
            )?;
            tx.commit()?;
        }
        self.get_mfa_method(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_mfa_method(&self, id: &str) -> SqliteResult<Option<MfaMethod>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM mfa_methods WHERE id = ?1", METHOD_COLUMNS),
            [id],
            Self::row_to_mfa_method,
        )
        .optional()
    }

    pub fn list_mfa_methods(&self, user_id: &str) -> SqliteResult<Vec<MfaMethod>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mfa_methods WHERE user_id = ?1 ORDER BY is_primary DESC, created_at",
            METHOD_COLUMNS
        ))?;
        let methods = stmt
            .query_map([user_id], Self::row_to_mfa_method)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(methods)
    }

    /// The user's primary method, if it has been verified
    pub fn get_primary_mfa_method(&self, user_id: &str) -> SqliteResult<Option<MfaMethod>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "SELECT {} FROM mfa_methods WHERE user_id = ?1 AND is_primary = 1 AND verified = 1",
                METHOD_COLUMNS
            ),
            [user_id],
            Self::row_to_mfa_method,
        )
        .optional()
    }

    pub fn mark_mfa_method_verified(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let rows = conn.execute(
            "UPDATE mfa_methods SET verified = 1, last_used_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![&now, id],
        )?;
        Ok(rows > 0)
    }

    /// Make a method primary, demoting the user's current primary
    pub fn set_primary_mfa_method(&self, user_id: &str, id: &str) -> SqliteResult<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        let exists: bool = tx
            .query_row(
                "SELECT COUNT(*) FROM mfa_methods WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|c| c > 0)?;
        if !exists {
            return Ok(false);
        }

        tx.execute(
            "UPDATE mfa_methods SET is_primary = 0, updated_at = ?1 WHERE user_id = ?2 AND id != ?3 AND is_primary = 1",
            params![&now, user_id, id],
        )?;
        tx.execute(
            "UPDATE mfa_methods SET is_primary = 1, updated_at = ?1 WHERE id = ?2",
            params![&now, id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn touch_mfa_method(&self, id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE mfa_methods SET last_used_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn delete_mfa_method(&self, user_id: &str, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM mfa_methods WHERE id = ?1 AND user_id = ?2", [id, user_id])?;
        Ok(rows > 0)
    }

    fn row_to_mfa_method(row: &Row<'_>) -> SqliteResult<MfaMethod> {
        let method_type: String = row.get(2)?;
        let algorithm: String = row.get(5)?;
        Ok(MfaMethod {
            id: row.get(0)?,
            user_id: row.get(1)?,
            method_type: method_type.parse().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?,
            identifier: row.get(3)?,
            secret: row.get(4)?,
            algorithm: algorithm.parse().unwrap_or_default(),
            digits: row.get(6)?,
            period: row.get::<_, i64>(7)? as u64,
            verified: row.get::<_, i64>(8)? != 0,
            is_primary: row.get::<_, i64>(9)? != 0,
            last_used_at: opt_ts(row, 10)?,
            created_at: ts(row, 11)?,
            updated_at: ts(row, 12)?,
        })
    }

    // ---- recovery codes ----

    /// Replace every recovery code of a user with new (hash, salt) pairs
    pub fn replace_recovery_codes(&self, user_id: &str, codes: &[(String, String)]) -> SqliteResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute("DELETE FROM mfa_recovery_codes WHERE user_id = ?1", [user_id])?;
        for (hash, salt) in codes {
            tx.execute(
                "INSERT INTO mfa_recovery_codes (id, user_id, code_hash, salt, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![new_id(), user_id, hash, salt, &now],
            )?;
        }
        tx.commit()
    }

    pub fn list_unused_recovery_codes(&self, user_id: &str) -> SqliteResult<Vec<RecoveryCode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, code_hash, salt, used_at, created_at FROM mfa_recovery_codes
             WHERE user_id = ?1 AND used_at IS NULL",
        )?;
        let codes = stmt
            .query_map([user_id], |row| {
                Ok(RecoveryCode {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    code_hash: row.get(2)?,
                    salt: row.get(3)?,
                    used_at: opt_ts(row, 4)?,
                    created_at: ts(row, 5)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(codes)
    }

    pub fn count_unused_recovery_codes(&self, user_id: &str) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM mfa_recovery_codes WHERE user_id = ?1 AND used_at IS NULL",
            [user_id],
            |row| row.get(0),
        )
    }

    /// Mark a code used. Returns false if it was already consumed.
    pub fn mark_recovery_code_used(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE mfa_recovery_codes SET used_at = ?1 WHERE id = ?2 AND used_at IS NULL",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::models::{MfaMethodType, NewMfaMethod, TotpAlgorithm};

    fn new_method(user_id: &str, method_type: MfaMethodType, is_primary: bool) -> NewMfaMethod {
        NewMfaMethod {
            user_id: user_id.to_string(),
            method_type,
            identifier: None,
            secret: "JBSWY3DPEHPK3PXP".to_string(),
            algorithm: TotpAlgorithm::Sha1,
            digits: 6,
            period: 30,
            is_primary,
        }
    }

    #[test]
    fn test_new_primary_demotes_previous() {
        let db = Database::new(":memory:").unwrap();
        let user = db.create_user("ada@example.com", None, "h").unwrap();

        let first = db.create_mfa_method(&new_method(&user.id, MfaMethodType::Totp, true)).unwrap();
        let second = db.create_mfa_method(&new_method(&user.id, MfaMethodType::Email, true)).unwrap();

        let methods = db.list_mfa_methods(&user.id).unwrap();
        let primaries: Vec<_> = methods.iter().filter(|m| m.is_primary).collect();
        assert_eq!(primaries.len(), 1);
        assert_eq!(primaries[0].id, second.id);
        assert!(!db.get_mfa_method(&first.id).unwrap().unwrap().is_primary);
    }

    #[test]
    fn test_set_primary_switches_and_rejects_foreign_method() {
        let db = Database::new(":memory:").unwrap();
        let user = db.create_user("ada@example.com", None, "h").unwrap();
        let other = db.create_user("bob@example.com", None, "h").unwrap();

        let first = db.create_mfa_method(&new_method(&user.id, MfaMethodType::Totp, true)).unwrap();
        let second = db.create_mfa_method(&new_method(&user.id, MfaMethodType::Totp, false)).unwrap();

        assert!(!db.set_primary_mfa_method(&other.id, &first.id).unwrap());
        assert!(db.set_primary_mfa_method(&user.id, &second.id).unwrap());
        assert!(!db.get_mfa_method(&first.id).unwrap().unwrap().is_primary);
        assert!(db.get_mfa_method(&second.id).unwrap().unwrap().is_primary);

        // Primary only counts once verified
        assert!(db.get_primary_mfa_method(&user.id).unwrap().is_none());
        db.mark_mfa_method_verified(&second.id).unwrap();
        assert_eq!(db.get_primary_mfa_method(&user.id).unwrap().unwrap().id, second.id);
    }

    #[test]
    fn test_recovery_code_consumed_once() {
        let db = Database::new(":memory:").unwrap();
        let user = db.create_user("ada@example.com", None, "h").unwrap();
        db.replace_recovery_codes(&user.id, &[("h1".into(), "s1".into()), ("h2".into(), "s2".into())])
            .unwrap();

        let codes = db.list_unused_recovery_codes(&user.id).unwrap();
        assert_eq!(codes.len(), 2);
        assert!(db.mark_recovery_code_used(&codes[0].id).unwrap());
        assert!(!db.mark_recovery_code_used(&codes[0].id).unwrap());
        assert_eq!(db.count_unused_recovery_codes(&user.id).unwrap(), 1);

        db.replace_recovery_codes(&user.id, &[("h3".into(), "s3".into())]).unwrap();
        assert_eq!(db.count_unused_recovery_codes(&user.id).unwrap(), 1);
    }
}
