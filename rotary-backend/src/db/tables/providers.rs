//! Provider and provider-extension bonding database operations

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Result as SqliteResult, Row};
use serde_json::Value;

use crate::db::{new_id, ts, Database};
use crate::models::{Provider, ProviderExtension, ProviderExtensionAbility};

impl Database {
    pub fn create_provider(
        &self,
        name: &str,
        friendly_name: Option<&str>,
        agent_settings: Option<&Value>,
    ) -> SqliteResult<Provider> {
        let id = new_id();
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            let settings_json = agent_settings.map(|v| v.to_string());
            conn.execute(
                "INSERT INTO providers (id, name, friendly_name, agent_settings, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![&id, name, friendly_name, settings_json, &now],
            )?;
        }
        self.get_provider(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_provider(&self, id: &str) -> SqliteResult<Option<Provider>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, friendly_name, agent_settings, created_at, updated_at FROM providers WHERE id = ?1",
            [id],
            Self::row_to_provider,
        )
        .optional()
    }

    pub fn get_provider_by_name(&self, name: &str) -> SqliteResult<Option<Provider>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, friendly_name, agent_settings, created_at, updated_at FROM providers WHERE name = ?1",
            [name],
            Self::row_to_provider,
        )
        .optional()
    }

    pub fn list_providers(&self) -> SqliteResult<Vec<Provider>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, friendly_name, agent_settings, created_at, updated_at FROM providers ORDER BY name",
        )?;
        let providers = stmt
            .query_map([], Self::row_to_provider)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(providers)
    }

    pub fn update_provider(
        &self,
        id: &str,
        friendly_name: Option<&str>,
        agent_settings: Option<&Value>,
    ) -> SqliteResult<Option<Provider>> {
        {
            let conn = self.conn.lock().unwrap();
            let settings_json = agent_settings.map(|v| v.to_string());
            conn.execute(
                "UPDATE providers SET friendly_name = COALESCE(?1, friendly_name),
                    agent_settings = COALESCE(?2, agent_settings), updated_at = ?3 WHERE id = ?4",
                params![friendly_name, settings_json, Utc::now().to_rfc3339(), id],
            )?;
        }
        self.get_provider(id)
    }

    pub fn delete_provider(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM providers WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    pub fn ensure_provider(&self, name: &str, friendly_name: Option<&str>) -> SqliteResult<Provider> {
        match self.get_provider_by_name(name)? {
            Some(provider) => Ok(provider),
            None => self.create_provider(name, friendly_name, None),
        }
    }

    fn row_to_provider(row: &Row<'_>) -> SqliteResult<Provider> {
        let settings_json: Option<String> = row.get(3)?;
        Ok(Provider {
            id: row.get(0)?,
            name: row.get(1)?,
            friendly_name: row.get(2)?,
            agent_settings: settings_json.and_then(|json| serde_json::from_str(&json).ok()),
            created_at: ts(row, 4)?,
            updated_at: ts(row, 5)?,
        })
    }

    // ---- bonding ----

    /// Bond a provider to an extension; returns the existing bond if present
    pub fn bond_provider_extension(&self, provider_id: &str, extension_id: &str) -> SqliteResult<ProviderExtension> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO provider_extensions (id, provider_id, extension_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![new_id(), provider_id, extension_id, Utc::now().to_rfc3339()],
        )?;
        conn.query_row(
            "SELECT id, provider_id, extension_id, created_at FROM provider_extensions
             WHERE provider_id = ?1 AND extension_id = ?2",
            [provider_id, extension_id],
            |row| {
                Ok(ProviderExtension {
                    id: row.get(0)?,
                    provider_id: row.get(1)?,
                    extension_id: row.get(2)?,
                    created_at: ts(row, 3)?,
                })
            },
        )
    }

    /// Bond a provider extension to one of the extension's abilities
    pub fn bond_provider_ability(
        &self,
        provider_extension_id: &str,
        ability_id: &str,
    ) -> SqliteResult<ProviderExtensionAbility> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO provider_extension_abilities (id, provider_extension_id, ability_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![new_id(), provider_extension_id, ability_id, Utc::now().to_rfc3339()],
        )?;
        conn.query_row(
            "SELECT id, provider_extension_id, ability_id, created_at FROM provider_extension_abilities
             WHERE provider_extension_id = ?1 AND ability_id = ?2",
            [provider_extension_id, ability_id],
            Self::row_to_provider_ability,
        )
    }

    pub fn list_provider_extensions(&self, provider_id: &str) -> SqliteResult<Vec<ProviderExtension>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, provider_id, extension_id, created_at FROM provider_extensions WHERE provider_id = ?1",
        )?;
        let bonds = stmt
            .query_map([provider_id], |row| {
                Ok(ProviderExtension {
                    id: row.get(0)?,
                    provider_id: row.get(1)?,
                    extension_id: row.get(2)?,
                    created_at: ts(row, 3)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(bonds)
    }

    /// All ability bonds of a provider across its extensions
    pub fn list_provider_abilities(&self, provider_id: &str) -> SqliteResult<Vec<ProviderExtensionAbility>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT pea.id, pea.provider_extension_id, pea.ability_id, pea.created_at
             FROM provider_extension_abilities pea
             JOIN provider_extensions pe ON pe.id = pea.provider_extension_id
             WHERE pe.provider_id = ?1",
        )?;
        let bonds = stmt
            .query_map([provider_id], Self::row_to_provider_ability)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(bonds)
    }

    pub fn unbond_provider_extension(&self, provider_id: &str, extension_id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM provider_extensions WHERE provider_id = ?1 AND extension_id = ?2",
            [provider_id, extension_id],
        )?;
        Ok(rows > 0)
    }

    fn row_to_provider_ability(row: &Row<'_>) -> SqliteResult<ProviderExtensionAbility> {
        Ok(ProviderExtensionAbility {
            id: row.get(0)?,
            provider_extension_id: row.get(1)?,
            ability_id: row.get(2)?,
            created_at: ts(row, 3)?,
        })
    }
}
