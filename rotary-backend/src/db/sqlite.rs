//! SQLite database - schema definitions and connection management
//!
//! This file contains:
//! - Database struct definition
//! - Connection management (new, init)
//! - Schema creation and migrations
//!
//! All table operations live in the tables/ subdirectory.

use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::Mutex;

/// Main database wrapper with a single connection guarded by a Mutex
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    /// Create a new database connection and initialize schema
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(database_url)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Initialize all database tables and run migrations
    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                display_name TEXT,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Migration: payment extension field on users
        add_column_if_missing(&conn, "users", "external_payment_id", "TEXT")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT UNIQUE NOT NULL,
                user_id TEXT NOT NULL,
                mfa_pending INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_auth_sessions_expires ON auth_sessions(expires_at)",
            [],
        )?;

        // Migration: wrong second-factor codes per pending login
        add_column_if_missing(&conn, "auth_sessions", "failed_attempts", "INTEGER NOT NULL DEFAULT 0")?;

        // =====================================================
        // Extension catalog
        // =====================================================

        conn.execute(
            "CREATE TABLE IF NOT EXISTS extensions (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                friendly_name TEXT,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS abilities (
                id TEXT PRIMARY KEY,
                extension_id TEXT NOT NULL,
                name TEXT NOT NULL,
                friendly_name TEXT,
                meta INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (extension_id) REFERENCES extensions(id) ON DELETE CASCADE,
                UNIQUE(extension_id, name)
            )",
            [],
        )?;

        // =====================================================
        // Providers and their configured instances
        // =====================================================

        conn.execute(
            "CREATE TABLE IF NOT EXISTS providers (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL COLLATE NOCASE,
                friendly_name TEXT,
                agent_settings TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS provider_instances (
                id TEXT PRIMARY KEY,
                provider_id TEXT NOT NULL,
                name TEXT NOT NULL,
                model_name TEXT,
                api_key TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (provider_id) REFERENCES providers(id) ON DELETE CASCADE,
                UNIQUE(provider_id, name)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS provider_extensions (
                id TEXT PRIMARY KEY,
                provider_id TEXT NOT NULL,
                extension_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (provider_id) REFERENCES providers(id) ON DELETE CASCADE,
                FOREIGN KEY (extension_id) REFERENCES extensions(id) ON DELETE CASCADE,
                UNIQUE(provider_id, extension_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS provider_extension_abilities (
                id TEXT PRIMARY KEY,
                provider_extension_id TEXT NOT NULL,
                ability_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (provider_extension_id) REFERENCES provider_extensions(id) ON DELETE CASCADE,
                FOREIGN KEY (ability_id) REFERENCES abilities(id) ON DELETE CASCADE,
                UNIQUE(provider_extension_id, ability_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS provider_instance_usage (
                id TEXT PRIMARY KEY,
                provider_instance_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (provider_instance_id) REFERENCES provider_instances(id) ON DELETE CASCADE,
                UNIQUE(provider_instance_id, key)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS provider_instance_settings (
                id TEXT PRIMARY KEY,
                provider_instance_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (provider_instance_id) REFERENCES provider_instances(id) ON DELETE CASCADE,
                UNIQUE(provider_instance_id, key)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS provider_instance_extension_abilities (
                id TEXT PRIMARY KEY,
                provider_instance_id TEXT NOT NULL,
                provider_extension_ability_id TEXT NOT NULL,
                state INTEGER NOT NULL DEFAULT 1,
                forced INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (provider_instance_id) REFERENCES provider_instances(id) ON DELETE CASCADE,
                FOREIGN KEY (provider_extension_ability_id) REFERENCES provider_extension_abilities(id) ON DELETE CASCADE,
                UNIQUE(provider_instance_id, provider_extension_ability_id)
            )",
            [],
        )?;

        // =====================================================
        // Rotations (failover pools)
        // =====================================================

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rotations (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Migration: selection strategy column
        add_column_if_missing(&conn, "rotations", "strategy", "TEXT NOT NULL DEFAULT 'ordered'")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rotation_provider_instances (
                id TEXT PRIMARY KEY,
                rotation_id TEXT NOT NULL,
                provider_instance_id TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                FOREIGN KEY (rotation_id) REFERENCES rotations(id) ON DELETE CASCADE,
                FOREIGN KEY (provider_instance_id) REFERENCES provider_instances(id) ON DELETE CASCADE,
                UNIQUE(rotation_id, provider_instance_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_rotation_entries_order ON rotation_provider_instances(rotation_id, position)",
            [],
        )?;

        // =====================================================
        // Multi-factor authentication
        // =====================================================

        conn.execute(
            "CREATE TABLE IF NOT EXISTS mfa_methods (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                method_type TEXT NOT NULL,
                identifier TEXT,
                secret TEXT NOT NULL,
                algorithm TEXT NOT NULL DEFAULT 'SHA1',
                digits INTEGER NOT NULL DEFAULT 6,
                period INTEGER NOT NULL DEFAULT 30,
                verified INTEGER NOT NULL DEFAULT 0,
                is_primary INTEGER NOT NULL DEFAULT 0,
                last_used_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_mfa_methods_user ON mfa_methods(user_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS mfa_recovery_codes (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                code_hash TEXT NOT NULL,
                salt TEXT NOT NULL,
                used_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_mfa_recovery_codes_user ON mfa_recovery_codes(user_id, used_at)",
            [],
        )?;

        Ok(())
    }
}

/// Add a column unless an older database already has it
fn add_column_if_missing(conn: &Connection, table: &str, column: &str, definition: &str) -> SqliteResult<()> {
    let exists: bool = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM pragma_table_info('{}') WHERE name = ?1", table),
            [column],
            |row| row.get::<_, i64>(0),
        )
        .map(|c| c > 0)
        .unwrap_or(false);

    if !exists {
        conn.execute(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition), [])?;
    }
    Ok(())
}
