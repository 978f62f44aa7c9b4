//! Provider instance database operations: instances, settings, usage counters
//! and per-instance ability switches

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Result as SqliteResult, Row};
use std::collections::HashMap;

use crate::db::{new_id, ts, Database};
use crate::models::{
    ProviderInstance, ProviderInstanceExtensionAbility, ProviderInstanceSetting, ProviderInstanceUsage,
};

const INSTANCE_COLUMNS: &str = "id, provider_id, name, model_name, api_key, enabled, created_at, updated_at";

impl Database {
    pub fn create_provider_instance(
        &self,
        provider_id: &str,
        name: &str,
        model_name: Option<&str>,
        api_key: Option<&str>,
        enabled: bool,
    ) -> SqliteResult<ProviderInstance> {
        let id = new_id();
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO provider_instances (id, provider_id, name, model_name, api_key, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![&id, provider_id, name, model_name, api_key, enabled as i64, &now],
            )?;
        }
        self.get_provider_instance(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_provider_instance(&self, id: &str) -> SqliteResult<Option<ProviderInstance>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM provider_instances WHERE id = ?1", INSTANCE_COLUMNS),
            [id],
            Self::row_to_instance,
        )
        .optional()
    }

    pub fn get_provider_instance_by_name(&self, provider_id: &str, name: &str) -> SqliteResult<Option<ProviderInstance>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM provider_instances WHERE provider_id = ?1 AND name = ?2", INSTANCE_COLUMNS),
            [provider_id, name],
            Self::row_to_instance,
        )
        .optional()
    }

    pub fn list_provider_instances(&self, provider_id: Option<&str>) -> SqliteResult<Vec<ProviderInstance>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM provider_instances WHERE ?1 IS NULL OR provider_id = ?1 ORDER BY name",
            INSTANCE_COLUMNS
        ))?;
        let instances = stmt
            .query_map([provider_id], Self::row_to_instance)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(instances)
    }

    pub fn update_provider_instance(
        &self,
        id: &str,
        name: Option<&str>,
        model_name: Option<&str>,
        api_key: Option<&str>,
        enabled: Option<bool>,
    ) -> SqliteResult<Option<ProviderInstance>> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE provider_instances SET name = COALESCE(?1, name), model_name = COALESCE(?2, model_name),
                    api_key = COALESCE(?3, api_key), enabled = COALESCE(?4, enabled), updated_at = ?5
                 WHERE id = ?6",
                params![name, model_name, api_key, enabled.map(|e| e as i64), Utc::now().to_rfc3339(), id],
            )?;
        }
        self.get_provider_instance(id)
    }

    pub fn delete_provider_instance(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM provider_instances WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    pub(crate) fn row_to_instance(row: &Row<'_>) -> SqliteResult<ProviderInstance> {
        Ok(ProviderInstance {
            id: row.get(0)?,
            provider_id: row.get(1)?,
            name: row.get(2)?,
            model_name: row.get(3)?,
            api_key: row.get(4)?,
            enabled: row.get::<_, i64>(5)? != 0,
            created_at: ts(row, 6)?,
            updated_at: ts(row, 7)?,
        })
    }

    // ---- settings ----

    pub fn set_instance_setting(&self, instance_id: &str, key: &str, value: &str) -> SqliteResult<ProviderInstanceSetting> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO provider_instance_settings (id, provider_instance_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(provider_instance_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![new_id(), instance_id, key, value, &now],
        )?;
        conn.query_row(
            "SELECT id, provider_instance_id, key, value, updated_at FROM provider_instance_settings
             WHERE provider_instance_id = ?1 AND key = ?2",
            [instance_id, key],
            Self::row_to_setting,
        )
    }

    pub fn list_instance_settings(&self, instance_id: &str) -> SqliteResult<Vec<ProviderInstanceSetting>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, provider_instance_id, key, value, updated_at FROM provider_instance_settings
             WHERE provider_instance_id = ?1 ORDER BY key",
        )?;
        let settings = stmt
            .query_map([instance_id], Self::row_to_setting)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(settings)
    }

    /// Settings as a key/value map for provider backends
    pub fn instance_settings_map(&self, instance_id: &str) -> SqliteResult<HashMap<String, String>> {
        Ok(self
            .list_instance_settings(instance_id)?
            .into_iter()
            .map(|s| (s.key, s.value))
            .collect())
    }

    pub fn delete_instance_setting(&self, instance_id: &str, key: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM provider_instance_settings WHERE provider_instance_id = ?1 AND key = ?2",
            [instance_id, key],
        )?;
        Ok(rows > 0)
    }

    fn row_to_setting(row: &Row<'_>) -> SqliteResult<ProviderInstanceSetting> {
        Ok(ProviderInstanceSetting {
            id: row.get(0)?,
            provider_instance_id: row.get(1)?,
            key: row.get(2)?,
            value: row.get(3)?,
            updated_at: ts(row, 4)?,
        })
    }

    // ---- usage ----

    /// Add `delta` to a usage counter, creating it at zero first
    pub fn increment_instance_usage(&self, instance_id: &str, key: &str, delta: i64) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO provider_instance_usage (id, provider_instance_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(provider_instance_id, key) DO UPDATE SET value = value + excluded.value, updated_at = excluded.updated_at",
            params![new_id(), instance_id, key, delta, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_instance_usage(&self, instance_id: &str) -> SqliteResult<Vec<ProviderInstanceUsage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, provider_instance_id, key, value, updated_at FROM provider_instance_usage
             WHERE provider_instance_id = ?1 ORDER BY key",
        )?;
        let usage = stmt
            .query_map([instance_id], |row| {
                Ok(ProviderInstanceUsage {
                    id: row.get(0)?,
                    provider_instance_id: row.get(1)?,
                    key: row.get(2)?,
                    value: row.get(3)?,
                    updated_at: ts(row, 4)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(usage)
    }

    /// Read a single usage counter (0 when never incremented)
    pub fn instance_usage_value(&self, instance_id: &str, key: &str) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM provider_instance_usage WHERE provider_instance_id = ?1 AND key = ?2",
                [instance_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0))
    }

    // ---- per-instance ability switches ----

    pub fn set_instance_ability(
        &self,
        instance_id: &str,
        provider_extension_ability_id: &str,
        state: bool,
        forced: bool,
    ) -> SqliteResult<ProviderInstanceExtensionAbility> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO provider_instance_extension_abilities
                (id, provider_instance_id, provider_extension_ability_id, state, forced, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(provider_instance_id, provider_extension_ability_id)
             DO UPDATE SET state = excluded.state, forced = excluded.forced, updated_at = excluded.updated_at",
            params![
                new_id(),
                instance_id,
                provider_extension_ability_id,
                state as i64,
                forced as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        conn.query_row(
            "SELECT id, provider_instance_id, provider_extension_ability_id, state, forced, updated_at
             FROM provider_instance_extension_abilities
             WHERE provider_instance_id = ?1 AND provider_extension_ability_id = ?2",
            [instance_id, provider_extension_ability_id],
            Self::row_to_instance_ability,
        )
    }

    pub fn list_instance_abilities(&self, instance_id: &str) -> SqliteResult<Vec<ProviderInstanceExtensionAbility>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, provider_instance_id, provider_extension_ability_id, state, forced, updated_at
             FROM provider_instance_extension_abilities WHERE provider_instance_id = ?1",
        )?;
        let rows = stmt
            .query_map([instance_id], Self::row_to_instance_ability)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    fn row_to_instance_ability(row: &Row<'_>) -> SqliteResult<ProviderInstanceExtensionAbility> {
        Ok(ProviderInstanceExtensionAbility {
            id: row.get(0)?,
            provider_instance_id: row.get(1)?,
            provider_extension_ability_id: row.get(2)?,
            state: row.get::<_, i64>(3)? != 0,
            forced: row.get::<_, i64>(4)? != 0,
            updated_at: ts(row, 5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    fn db_with_instance() -> (Database, String) {
        let db = Database::new(":memory:").unwrap();
        let provider = db.create_provider("SendGrid", None, None).unwrap();
        let instance = db
            .create_provider_instance(&provider.id, "primary", None, Some("SG.secret-key"), true)
            .unwrap();
        (db, instance.id)
    }

    #[test]
    fn test_instance_update_and_masking() {
        let (db, id) = db_with_instance();
        let instance = db.update_provider_instance(&id, None, Some("v3"), None, Some(false)).unwrap().unwrap();

        assert_eq!(instance.model_name.as_deref(), Some("v3"));
        assert!(!instance.enabled);
        assert_eq!(instance.api_key.as_deref(), Some("SG.secret-key"));
        assert_eq!(instance.to_response().api_key_hint.as_deref(), Some("****-key"));
    }

    #[test]
    fn test_settings_upsert() {
        let (db, id) = db_with_instance();
        db.set_instance_setting(&id, "from_email", "a@example.com").unwrap();
        db.set_instance_setting(&id, "from_email", "b@example.com").unwrap();

        let map = db.instance_settings_map(&id).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["from_email"], "b@example.com");

        assert!(db.delete_instance_setting(&id, "from_email").unwrap());
        assert!(db.instance_settings_map(&id).unwrap().is_empty());
    }

    #[test]
    fn test_usage_increments_accumulate() {
        let (db, id) = db_with_instance();
        db.increment_instance_usage(&id, "requests", 1).unwrap();
        db.increment_instance_usage(&id, "requests", 2).unwrap();
        db.increment_instance_usage(&id, "failures", 1).unwrap();

        assert_eq!(db.instance_usage_value(&id, "requests").unwrap(), 3);
        assert_eq!(db.instance_usage_value(&id, "successes").unwrap(), 0);
        assert_eq!(db.list_instance_usage(&id).unwrap().len(), 2);
    }
}
