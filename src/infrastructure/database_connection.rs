// Database connection and pool management
// This module handles SQLite database connections using sqlx

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::{debug, info};

use crate::infrastructure::config::DatabaseConfig;
use crate::infrastructure::entity_store::StoreError;

/// Durable schema. Every child table references its parent, so a row can never be
/// written before the row it belongs to.
const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS brands (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        logo_url TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    r"
    CREATE TABLE IF NOT EXISTS series (
        id INTEGER PRIMARY KEY,
        brand_id INTEGER NOT NULL REFERENCES brands (id),
        name TEXT NOT NULL,
        is_new_energy BOOLEAN,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    r"
    CREATE TABLE IF NOT EXISTS specifications (
        id INTEGER PRIMARY KEY,
        series_id INTEGER NOT NULL REFERENCES series (id),
        name TEXT NOT NULL,
        min_price TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    r"
    CREATE TABLE IF NOT EXISTS param_titles (
        series_id INTEGER NOT NULL REFERENCES series (id),
        title_id INTEGER NOT NULL,
        item_name TEXT NOT NULL,
        group_name TEXT,
        item_type TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (series_id, title_id)
    )",
    r"
    CREATE TABLE IF NOT EXISTS param_values (
        spec_id INTEGER NOT NULL REFERENCES specifications (id),
        title_id INTEGER NOT NULL,
        item_name TEXT NOT NULL,
        sub_name TEXT NOT NULL DEFAULT '',
        series_id INTEGER NOT NULL,
        value TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (spec_id, title_id, item_name, sub_name),
        FOREIGN KEY (series_id, title_id) REFERENCES param_titles (series_id, title_id)
    )",
    r"
    CREATE TABLE IF NOT EXISTS photo_colors (
        id INTEGER PRIMARY KEY,
        series_id INTEGER NOT NULL REFERENCES series (id),
        color_type TEXT NOT NULL,
        name TEXT NOT NULL,
        value TEXT,
        is_on_sale BOOLEAN,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    r"
    CREATE TABLE IF NOT EXISTS photo_categories (
        series_id INTEGER NOT NULL REFERENCES series (id),
        category_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (series_id, category_id)
    )",
    // color_id is advisory: the payload may name a color the palette listing never returned
    r"
    CREATE TABLE IF NOT EXISTS photos (
        id TEXT PRIMARY KEY,
        series_id INTEGER NOT NULL REFERENCES series (id),
        spec_id INTEGER NOT NULL REFERENCES specifications (id),
        category_id INTEGER NOT NULL,
        color_id INTEGER,
        remote_url TEXT,
        spec_name TEXT,
        local_path TEXT,
        asset_state TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY (series_id, category_id) REFERENCES photo_categories (series_id, category_id)
    )",
    r"
    CREATE TABLE IF NOT EXISTS panorama_colors (
        id INTEGER PRIMARY KEY,
        spec_id INTEGER NOT NULL REFERENCES specifications (id),
        ext_id INTEGER,
        base_color_name TEXT,
        color_name TEXT NOT NULL,
        color_value TEXT,
        color_id INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (spec_id, color_id)
    )",
    r"
    CREATE TABLE IF NOT EXISTS panorama_photos (
        seq INTEGER NOT NULL,
        spec_id INTEGER NOT NULL,
        color_id INTEGER NOT NULL,
        remote_url TEXT,
        local_path TEXT,
        asset_state TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (seq, spec_id, color_id),
        FOREIGN KEY (spec_id, color_id) REFERENCES panorama_colors (spec_id, color_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_series_brand ON series (brand_id)",
    "CREATE INDEX IF NOT EXISTS idx_specifications_series ON specifications (series_id)",
    "CREATE INDEX IF NOT EXISTS idx_photos_spec ON photos (spec_id)",
    "CREATE INDEX IF NOT EXISTS idx_photos_state ON photos (asset_state)",
    "CREATE INDEX IF NOT EXISTS idx_panorama_photos_color ON panorama_photos (spec_id, color_id)",
];

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let database_url = config.url.as_str();

        // Create database file directory if it doesn't exist
        let db_path = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or(database_url);
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        if !db_path.is_empty() && !db_path.starts_with(':') {
            if let Some(parent) = Path::new(db_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            // every upsert is durable once the call returns
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        info!("Connected to entity store at {}", db_path);
        Ok(Self { pool })
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Schema ready ({} statements)", SCHEMA.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &Path) -> DatabaseConfig {
        DatabaseConfig {
            url: format!("sqlite://{}/nested/store.db", dir.display()),
            ..DatabaseConfig::default()
        }
    }

    #[tokio::test]
    async fn test_migrate_creates_all_tables_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseConnection::new(&test_config(dir.path())).await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        for table in crate::domain::EntityKind::ALL.map(crate::domain::EntityKind::table) {
            assert!(names.contains(&table), "missing table {table}");
        }
    }

    #[tokio::test]
    async fn test_foreign_keys_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseConnection::new(&test_config(dir.path())).await.unwrap();
        db.migrate().await.unwrap();

        let orphan = sqlx::query(
            "INSERT INTO series (id, brand_id, name, created_at, updated_at) VALUES (1, 99, 'x', '', '')",
        )
        .execute(db.pool())
        .await;
        assert!(orphan.is_err());
    }
}
