use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::extensions::{seed_default_instance, AbilitySpec, Extension, ExtensionContext};
use crate::providers::{ProviderBackend, SqliteQueryProvider};

pub struct DatabaseExtension;

#[async_trait]
impl Extension for DatabaseExtension {
    fn name(&self) -> &'static str {
        "database"
    }

    fn friendly_name(&self) -> &'static str {
        "Database"
    }

    fn description(&self) -> &'static str {
        "SQL queries against configured databases"
    }

    fn abilities(&self) -> Vec<AbilitySpec> {
        vec![AbilitySpec::new("execute_sql", "Execute SQL")]
    }

    fn providers(&self) -> Vec<Arc<dyn ProviderBackend>> {
        vec![Arc::new(SqliteQueryProvider::new())]
    }

    fn validate_config(&self, config: &Config) -> Result<(), String> {
        match config.sql_extension_database.as_deref() {
            Some(path) if !Path::new(path).exists() => {
                Err(format!("SQL_EXTENSION_DATABASE '{}' does not exist", path))
            }
            _ => Ok(()),
        }
    }

    fn seed(&self, ctx: &ExtensionContext) -> rusqlite::Result<()> {
        match ctx.config.sql_extension_database.as_deref() {
            Some(path) => seed_default_instance(ctx, self.name(), "SQLite", None, &[("database_path", path)]),
            None => seed_default_instance(ctx, self.name(), "SQLite", None, &[]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::tests::context;
    use crate::extensions::ExtensionRegistry;
    use crate::hooks::HookManager;
    use serde_json::json;

    #[tokio::test]
    async fn test_seeded_database_is_queryable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.db");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (7);")
            .unwrap();

        let mut config = Config::for_tests();
        config.sql_extension_database = Some(path.to_str().unwrap().to_string());
        let ctx = context(config);
        let registry = ExtensionRegistry::new(ctx.clone(), Arc::new(HookManager::new()));
        registry.register(Arc::new(DatabaseExtension));
        assert_eq!(registry.initialize_all().await, 1);

        let outcome = ctx
            .rotation
            .rotate_default("database", "execute_sql", &json!({ "query": "SELECT v FROM t" }))
            .await
            .unwrap();
        assert_eq!(outcome.value["rows"][0]["v"], 7);
        assert_eq!(outcome.provider_name, "SQLite");
    }

    #[test]
    fn test_missing_database_file_is_invalid() {
        let mut config = Config::for_tests();
        config.sql_extension_database = Some("/nonexistent/rotary/reports.db".to_string());
        assert!(DatabaseExtension.validate_config(&config).is_err());
    }
}
