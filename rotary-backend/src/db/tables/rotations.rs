//! Rotation database operations

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Result as SqliteResult, Row};

use crate::db::{new_id, ts, Database};
use crate::models::{ProviderInstance, Rotation, RotationCandidate, RotationProviderInstance, RotationStrategy};

impl Database {
    pub fn create_rotation(
        &self,
        name: &str,
        description: Option<&str>,
        strategy: RotationStrategy,
    ) -> SqliteResult<Rotation> {
        let id = new_id();
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO rotations (id, name, description, strategy, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![&id, name, description, strategy.to_string(), &now],
            )?;
        }
        self.get_rotation(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_rotation(&self, id: &str) -> SqliteResult<Option<Rotation>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, description, strategy, created_at, updated_at FROM rotations WHERE id = ?1",
            [id],
            Self::row_to_rotation,
        )
        .optional()
    }

    pub fn get_rotation_by_name(&self, name: &str) -> SqliteResult<Option<Rotation>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, description, strategy, created_at, updated_at FROM rotations WHERE name = ?1",
            [name],
            Self::row_to_rotation,
        )
        .optional()
    }

    pub fn list_rotations(&self) -> SqliteResult<Vec<Rotation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, strategy, created_at, updated_at FROM rotations ORDER BY name",
        )?;
        let rotations = stmt
            .query_map([], Self::row_to_rotation)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rotations)
    }

    pub fn update_rotation(
        &self,
        id: &str,
        description: Option<&str>,
        strategy: Option<RotationStrategy>,
    ) -> SqliteResult<Option<Rotation>> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE rotations SET description = COALESCE(?1, description),
                    strategy = COALESCE(?2, strategy), updated_at = ?3 WHERE id = ?4",
                params![description, strategy.map(|s| s.to_string()), Utc::now().to_rfc3339(), id],
            )?;
        }
        self.get_rotation(id)
    }

    pub fn delete_rotation(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute("DELETE FROM rotations WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    fn row_to_rotation(row: &Row<'_>) -> SqliteResult<Rotation> {
        let strategy: String = row.get(3)?;
        Ok(Rotation {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            strategy: strategy.parse().unwrap_or_default(),
            created_at: ts(row, 4)?,
            updated_at: ts(row, 5)?,
        })
    }

    // ---- entries ----

    /// Add an instance to a rotation; without a position it goes last
    pub fn add_rotation_instance(
        &self,
        rotation_id: &str,
        provider_instance_id: &str,
        position: Option<i64>,
    ) -> SqliteResult<RotationProviderInstance> {
        let conn = self.conn.lock().unwrap();
        let position = match position {
            Some(p) => p,
            None => conn.query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM rotation_provider_instances WHERE rotation_id = ?1",
                [rotation_id],
                |row| row.get(0),
            )?,
        };
        let id = new_id();
        conn.execute(
            "INSERT INTO rotation_provider_instances (id, rotation_id, provider_instance_id, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![&id, rotation_id, provider_instance_id, position, Utc::now().to_rfc3339()],
        )?;
        conn.query_row(
            "SELECT id, rotation_id, provider_instance_id, position, created_at FROM rotation_provider_instances WHERE id = ?1",
            [&id],
            Self::row_to_rotation_entry,
        )
    }

    pub fn list_rotation_instances(&self, rotation_id: &str) -> SqliteResult<Vec<RotationProviderInstance>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, rotation_id, provider_instance_id, position, created_at FROM rotation_provider_instances
             WHERE rotation_id = ?1 ORDER BY position, created_at",
        )?;
        let entries = stmt
            .query_map([rotation_id], Self::row_to_rotation_entry)?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn remove_rotation_instance(&self, rotation_id: &str, entry_id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM rotation_provider_instances WHERE rotation_id = ?1 AND id = ?2",
            [rotation_id, entry_id],
        )?;
        Ok(rows > 0)
    }

    /// Entries of a rotation able to serve an extension ability, in position order.
    ///
    /// An entry qualifies when its instance is enabled, its provider is bonded to the
    /// ability, and the instance has not switched that ability off.
    pub fn list_rotation_candidates(
        &self,
        rotation_id: &str,
        extension_name: &str,
        ability_name: &str,
    ) -> SqliteResult<Vec<RotationCandidate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT rpi.id, rpi.position, p.name,
                    pi.id, pi.provider_id, pi.name, pi.model_name, pi.api_key, pi.enabled, pi.created_at, pi.updated_at,
                    COALESCE(piea.forced, 0)
             FROM rotation_provider_instances rpi
             JOIN provider_instances pi ON pi.id = rpi.provider_instance_id
             JOIN providers p ON p.id = pi.provider_id
             JOIN provider_extensions pe ON pe.provider_id = p.id
             JOIN extensions e ON e.id = pe.extension_id AND e.name = ?2
             JOIN provider_extension_abilities pea ON pea.provider_extension_id = pe.id
             JOIN abilities a ON a.id = pea.ability_id AND a.name = ?3
             LEFT JOIN provider_instance_extension_abilities piea
                    ON piea.provider_instance_id = pi.id AND piea.provider_extension_ability_id = pea.id
             WHERE rpi.rotation_id = ?1 AND pi.enabled = 1 AND COALESCE(piea.state, 1) = 1
             ORDER BY rpi.position, rpi.created_at",
        )?;
        let candidates = stmt
            .query_map([rotation_id, extension_name, ability_name], |row| {
                Ok(RotationCandidate {
                    entry_id: row.get(0)?,
                    position: row.get(1)?,
                    provider_name: row.get(2)?,
                    instance: ProviderInstance {
                        id: row.get(3)?,
                        provider_id: row.get(4)?,
                        name: row.get(5)?,
                        model_name: row.get(6)?,
                        api_key: row.get(7)?,
                        enabled: row.get::<_, i64>(8)? != 0,
                        created_at: ts(row, 9)?,
                        updated_at: ts(row, 10)?,
                    },
                    forced: row.get::<_, i64>(11)? != 0,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(candidates)
    }

    fn row_to_rotation_entry(row: &Row<'_>) -> SqliteResult<RotationProviderInstance> {
        Ok(RotationProviderInstance {
            id: row.get(0)?,
            rotation_id: row.get(1)?,
            provider_instance_id: row.get(2)?,
            position: row.get(3)?,
            created_at: ts(row, 4)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{constraint_kind, ConstraintKind, Database};
    use crate::models::RotationStrategy;

    /// Provider "SendGrid" bonded to email/send_email with two instances
    fn seeded() -> (Database, String, String, String) {
        let db = Database::new(":memory:").unwrap();
        let ext = db.create_extension("email", None, None).unwrap();
        let ability = db.create_ability(&ext.id, "send_email", None, false).unwrap();
        let provider = db.create_provider("SendGrid", None, None).unwrap();
        let pe = db.bond_provider_extension(&provider.id, &ext.id).unwrap();
        let pea = db.bond_provider_ability(&pe.id, &ability.id).unwrap();
        let a = db.create_provider_instance(&provider.id, "a", None, Some("key-a"), true).unwrap();
        let b = db.create_provider_instance(&provider.id, "b", None, Some("key-b"), true).unwrap();
        (db, a.id, b.id, pea.id)
    }

    #[test]
    fn test_rotation_names_are_unique() {
        let db = Database::new(":memory:").unwrap();
        db.create_rotation("email-default", None, RotationStrategy::Ordered).unwrap();
        let err = db.create_rotation("email-default", None, RotationStrategy::RoundRobin).unwrap_err();
        assert_eq!(constraint_kind(&err), Some(ConstraintKind::Unique));
    }

    #[test]
    fn test_strategy_round_trip() {
        let db = Database::new(":memory:").unwrap();
        let rotation = db.create_rotation("pool", Some("desc"), RotationStrategy::RoundRobin).unwrap();
        assert_eq!(rotation.strategy, RotationStrategy::RoundRobin);

        let updated = db.update_rotation(&rotation.id, None, Some(RotationStrategy::Ordered)).unwrap().unwrap();
        assert_eq!(updated.strategy, RotationStrategy::Ordered);
        assert_eq!(updated.description.as_deref(), Some("desc"));
    }

    #[test]
    fn test_entries_append_in_order() {
        let (db, a, b, _) = seeded();
        let rotation = db.create_rotation("pool", None, RotationStrategy::Ordered).unwrap();
        let first = db.add_rotation_instance(&rotation.id, &b, None).unwrap();
        let second = db.add_rotation_instance(&rotation.id, &a, None).unwrap();
        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);

        let ids: Vec<_> = db
            .list_rotation_instances(&rotation.id)
            .unwrap()
            .into_iter()
            .map(|e| e.provider_instance_id)
            .collect();
        assert_eq!(ids, vec![b.clone(), a.clone()]);

        assert!(db.remove_rotation_instance(&rotation.id, &first.id).unwrap());
        assert_eq!(db.list_rotation_instances(&rotation.id).unwrap().len(), 1);
    }

    #[test]
    fn test_candidates_filter_disabled_and_switched_off() {
        let (db, a, b, pea) = seeded();
        let rotation = db.create_rotation("pool", None, RotationStrategy::Ordered).unwrap();
        db.add_rotation_instance(&rotation.id, &a, Some(0)).unwrap();
        db.add_rotation_instance(&rotation.id, &b, Some(1)).unwrap();

        let all = db.list_rotation_candidates(&rotation.id, "email", "send_email").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].provider_name, "SendGrid");
        assert_eq!(all[0].instance.api_key.as_deref(), Some("key-a"));

        // Unknown ability: nothing qualifies
        assert!(db.list_rotation_candidates(&rotation.id, "email", "send_sms").unwrap().is_empty());

        db.update_provider_instance(&a, None, None, None, Some(false)).unwrap();
        db.set_instance_ability(&b, &pea, true, true).unwrap();
        let remaining = db.list_rotation_candidates(&rotation.id, "email", "send_email").unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].forced);

        db.set_instance_ability(&b, &pea, false, false).unwrap();
        assert!(db.list_rotation_candidates(&rotation.id, "email", "send_email").unwrap().is_empty());
    }
}
