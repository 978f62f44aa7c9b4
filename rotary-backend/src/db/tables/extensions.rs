//! Extension and ability database operations

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Result as SqliteResult, Row};

use crate::db::{new_id, ts, Database};
use crate::models::{Ability, Extension};

impl Database {
    pub fn create_extension(
        &self,
        name: &str,
        friendly_name: Option<&str>,
        description: Option<&str>,
    ) -> SqliteResult<Extension> {
        let id = new_id();
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO extensions (id, name, friendly_name, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![&id, name, friendly_name, description, &now],
            )?;
        }
        self.get_extension(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_extension(&self, id: &str) -> SqliteResult<Option<Extension>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, friendly_name, description, created_at, updated_at FROM extensions WHERE id = ?1",
            [id],
            Self::row_to_extension,
        )
        .optional()
    }

    pub fn get_extension_by_name(&self, name: &str) -> SqliteResult<Option<Extension>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, friendly_name, description, created_at, updated_at FROM extensions WHERE name = ?1",
            [name],
            Self::row_to_extension,
        )
        .optional()
    }

    pub fn list_extensions(&self) -> SqliteResult<Vec<Extension>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, friendly_name, description, created_at, updated_at FROM extensions ORDER BY name",
        )?;
        let extensions = stmt
            .query_map([], Self::row_to_extension)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(extensions)
    }

    pub fn update_extension(
        &self,
        id: &str,
        friendly_name: Option<&str>,
        description: Option<&str>,
    ) -> SqliteResult<Option<Extension>> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE extensions SET friendly_name = COALESCE(?1, friendly_name),
                    description = COALESCE(?2, description), updated_at = ?3 WHERE id = ?4",
                params![friendly_name, description, Utc::now().to_rfc3339(), id],
            )?;
        }
        self.get_extension(id)
    }

    /// Delete an extension and, by cascade, its abilities and provider bonds
    pub fn delete_extension(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM extensions WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    /// Fetch an extension by name, creating it when missing
    pub fn ensure_extension(
        &self,
        name: &str,
        friendly_name: Option<&str>,
        description: Option<&str>,
    ) -> SqliteResult<Extension> {
        match self.get_extension_by_name(name)? {
            Some(ext) => Ok(ext),
            None => self.create_extension(name, friendly_name, description),
        }
    }

    fn row_to_extension(row: &Row<'_>) -> SqliteResult<Extension> {
        Ok(Extension {
            id: row.get(0)?,
            name: row.get(1)?,
            friendly_name: row.get(2)?,
            description: row.get(3)?,
            created_at: ts(row, 4)?,
            updated_at: ts(row, 5)?,
        })
    }

    // ---- abilities ----

    /// Create an ability; fails with a foreign key violation for unknown extensions
    pub fn create_ability(
        &self,
        extension_id: &str,
        name: &str,
        friendly_name: Option<&str>,
        meta: bool,
    ) -> SqliteResult<Ability> {
        let id = new_id();
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO abilities (id, extension_id, name, friendly_name, meta, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![&id, extension_id, name, friendly_name, meta as i64, &now],
            )?;
        }
        self.get_ability(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_ability(&self, id: &str) -> SqliteResult<Option<Ability>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, extension_id, name, friendly_name, meta, created_at, updated_at FROM abilities WHERE id = ?1",
            [id],
            Self::row_to_ability,
        )
        .optional()
    }

    /// Look up an ability by extension name and ability name
    pub fn find_ability(&self, extension_name: &str, ability_name: &str) -> SqliteResult<Option<Ability>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT a.id, a.extension_id, a.name, a.friendly_name, a.meta, a.created_at, a.updated_at
             FROM abilities a JOIN extensions e ON e.id = a.extension_id
             WHERE e.name = ?1 AND a.name = ?2",
            [extension_name, ability_name],
            Self::row_to_ability,
        )
        .optional()
    }

    pub fn list_abilities(&self, extension_id: Option<&str>) -> SqliteResult<Vec<Ability>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, extension_id, name, friendly_name, meta, created_at, updated_at FROM abilities
             WHERE ?1 IS NULL OR extension_id = ?1 ORDER BY name",
        )?;
        let abilities = stmt
            .query_map([extension_id], Self::row_to_ability)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(abilities)
    }

    pub fn update_ability(
        &self,
        id: &str,
        friendly_name: Option<&str>,
        meta: Option<bool>,
    ) -> SqliteResult<Option<Ability>> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE abilities SET friendly_name = COALESCE(?1, friendly_name),
                    meta = COALESCE(?2, meta), updated_at = ?3 WHERE id = ?4",
                params![friendly_name, meta.map(|m| m as i64), Utc::now().to_rfc3339(), id],
            )?;
        }
        self.get_ability(id)
    }

    pub fn delete_ability(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM abilities WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    /// Fetch an ability of an extension by name, creating it when missing
    pub fn ensure_ability(
        &self,
        extension_id: &str,
        name: &str,
        friendly_name: Option<&str>,
        meta: bool,
    ) -> SqliteResult<Ability> {
        let existing = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT id, extension_id, name, friendly_name, meta, created_at, updated_at FROM abilities
                 WHERE extension_id = ?1 AND name = ?2",
                [extension_id, name],
                Self::row_to_ability,
            )
            .optional()?
        };
        match existing {
            Some(ability) => Ok(ability),
            None => self.create_ability(extension_id, name, friendly_name, meta),
        }
    }

    fn row_to_ability(row: &Row<'_>) -> SqliteResult<Ability> {
        Ok(Ability {
            id: row.get(0)?,
            extension_id: row.get(1)?,
            name: row.get(2)?,
            friendly_name: row.get(3)?,
            meta: row.get::<_, i64>(4)? != 0,
            created_at: ts(row, 5)?,
            updated_at: ts(row, 6)?,
        })
    }
}
