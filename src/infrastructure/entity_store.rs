//! Entity Store
//!
//! Composite-key upserts over the SQLite schema. An upsert compares the incoming record with the
//! stored one field by field and writes nothing when they match, so audit timestamps only move
//! on real changes. Concurrent upserts to one key are serialized; the last writer wins.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqlitePool};
use thiserror::Error;
use tracing::trace;

use crate::domain::entities::{EntityKind, PanoramaPhoto, Record, SqlValue};
use crate::domain::keys::{EntityKey, PanoramaFrameKey, PhotoKey};
use crate::domain::media::{AssetKey, AssetState, MediaRecord};
use crate::infrastructure::config::DatabaseConfig;
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::keyed_lock::KeyedLocks;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        })
    }
}

/// The outcome together with the record as it now stands in the store.
#[derive(Debug, Clone)]
pub struct Upserted<R> {
    pub outcome: UpsertOutcome,
    pub record: R,
}

/// Stored frame-set shape for one panorama color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FrameSetSummary {
    pub spec_id: i64,
    pub color_id: i64,
    pub frame_count: i64,
    pub max_seq: Option<i64>,
    pub without_local_path: i64,
}

/// Media rows that still need a download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMedia {
    pub photos: i64,
    pub panorama_frames: i64,
}

#[derive(Clone)]
pub struct EntityStore {
    pool: SqlitePool,
    locks: Arc<KeyedLocks>,
}

type Query<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;
type QueryAs<'q, R> = sqlx::query::QueryAs<'q, Sqlite, R, SqliteArguments<'q>>;

fn bind(query: Query<'_>, value: SqlValue) -> Query<'_> {
    match value {
        SqlValue::Int(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
        SqlValue::Bool(v) => query.bind(v),
    }
}

fn bind_as<R>(query: QueryAs<'_, R>, value: SqlValue) -> QueryAs<'_, R> {
    match value {
        SqlValue::Int(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
        SqlValue::Bool(v) => query.bind(v),
    }
}

fn key_predicate(kind: EntityKind) -> String {
    kind.key_columns()
        .iter()
        .map(|column| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn select_sql(kind: EntityKind) -> String {
    let columns: Vec<&str> = kind
        .key_columns()
        .iter()
        .chain(kind.field_columns())
        .copied()
        .collect();
    format!(
        "SELECT {} FROM {} WHERE {}",
        columns.join(", "),
        kind.table(),
        key_predicate(kind)
    )
}

fn insert_sql(kind: EntityKind) -> String {
    let columns: Vec<&str> = kind
        .key_columns()
        .iter()
        .chain(kind.field_columns())
        .copied()
        .chain(["created_at", "updated_at"])
        .collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        kind.table(),
        columns.join(", "),
        placeholders
    )
}

fn update_sql(kind: EntityKind) -> String {
    let assignments: Vec<String> = kind
        .field_columns()
        .iter()
        .chain(&["updated_at"])
        .map(|column| format!("{column} = ?"))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {}",
        kind.table(),
        assignments.join(", "),
        key_predicate(kind)
    )
}

impl EntityStore {
    #[must_use]
    pub fn new(db: &DatabaseConnection) -> Self {
        Self::from_pool(db.pool().clone())
    }

    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Connects, applies the schema and returns a ready store.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let db = DatabaseConnection::new(config).await?;
        db.migrate().await?;
        Ok(Self::new(&db))
    }

    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts, updates or leaves alone the row for `incoming.key()`.
    ///
    /// Durable before returning: each write is a single autocommit statement on a
    /// `synchronous = FULL` connection.
    pub async fn upsert<R: Record>(&self, incoming: R) -> Result<Upserted<R>, StoreError> {
        let key = incoming.key();
        let _guard = self.locks.lock(&format!("{}:{}", R::KIND, key)).await;

        let mut record = incoming;
        let outcome = match self.lookup::<R>(&key).await? {
            None => {
                self.insert(&record).await?;
                UpsertOutcome::Inserted
            }
            Some(stored) => {
                record.merge_stored(&stored);
                if record.fields() == stored.fields() {
                    UpsertOutcome::Unchanged
                } else {
                    self.update(&record).await?;
                    UpsertOutcome::Updated
                }
            }
        };

        trace!(kind = %R::KIND, key = %key, %outcome, "upsert");
        Ok(Upserted { outcome, record })
    }

    /// Moves a media row to `state` without touching its other columns.
    ///
    /// Applies only while the row still points at `remote_url` and returns whether it did, so a
    /// metadata upsert that lands during a download is never overwritten by it.
    pub async fn set_asset_state<R: MediaRecord>(
        &self,
        key: &R::Key,
        remote_url: &str,
        state: AssetState,
        local_path: Option<&str>,
    ) -> Result<bool, StoreError> {
        let _guard = self.locks.lock(&format!("{}:{}", R::KIND, key)).await;
        let sql = format!(
            "UPDATE {} SET asset_state = ?, local_path = ?, updated_at = ? WHERE {} AND remote_url = ?",
            R::KIND.table(),
            key_predicate(R::KIND)
        );
        let query = sqlx::query(&sql)
            .bind(state.as_str())
            .bind(local_path)
            .bind(Utc::now());
        let query = key.values().into_iter().fold(query, bind).bind(remote_url);
        let applied = query.execute(&self.pool).await?.rows_affected() == 1;

        trace!(kind = %R::KIND, key = %key, %state, applied, "asset state");
        Ok(applied)
    }

    /// Exact-key lookup.
    pub async fn lookup<R: Record>(&self, key: &R::Key) -> Result<Option<R>, StoreError> {
        let sql = select_sql(R::KIND);
        let query = key
            .values()
            .into_iter()
            .fold(sqlx::query_as::<_, R>(&sql), bind_as);
        Ok(query.fetch_optional(&self.pool).await?)
    }

    async fn insert<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let sql = insert_sql(R::KIND);
        let now = Utc::now();
        let query = record
            .key()
            .values()
            .into_iter()
            .chain(record.fields())
            .fold(sqlx::query(&sql), bind)
            .bind(now)
            .bind(now);
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn update<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let sql = update_sql(R::KIND);
        let query = record.fields().into_iter().fold(sqlx::query(&sql), bind);
        let query = record
            .key()
            .values()
            .into_iter()
            .fold(query.bind(Utc::now()), bind);
        query.execute(&self.pool).await?;
        Ok(())
    }

    pub async fn count(&self, kind: EntityKind) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    pub async fn series_has_specifications(&self, series_id: i64) -> Result<bool, StoreError> {
        let (exists,): (i64,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM specifications WHERE series_id = ?)")
                .bind(series_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists != 0)
    }

    /// Stored frames of one panorama color, ordered by sequence.
    pub async fn panorama_frames(
        &self,
        spec_id: i64,
        color_id: i64,
    ) -> Result<Vec<PanoramaPhoto>, StoreError> {
        let frames = sqlx::query_as::<_, PanoramaPhoto>(
            "SELECT seq, spec_id, color_id, remote_url, local_path, asset_state \
             FROM panorama_photos WHERE spec_id = ? AND color_id = ? ORDER BY seq",
        )
        .bind(spec_id)
        .bind(color_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(frames)
    }

    pub async fn frame_set_summaries(&self) -> Result<Vec<FrameSetSummary>, StoreError> {
        let summaries = sqlx::query_as::<_, FrameSetSummary>(
            "SELECT c.spec_id AS spec_id, c.color_id AS color_id, \
                    COUNT(p.seq) AS frame_count, MAX(p.seq) AS max_seq, \
                    COALESCE(SUM(CASE WHEN p.seq IS NOT NULL AND p.local_path IS NULL THEN 1 ELSE 0 END), 0) \
                        AS without_local_path \
             FROM panorama_colors c \
             LEFT JOIN panorama_photos p ON p.spec_id = c.spec_id AND p.color_id = c.color_id \
             GROUP BY c.spec_id, c.color_id \
             ORDER BY c.spec_id, c.color_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }

    /// Stored assets of one series that have a remote URL but are not local yet, photos first.
    pub async fn pending_assets(&self, series_id: i64) -> Result<Vec<AssetKey>, StoreError> {
        let photos: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM photos \
             WHERE series_id = ? AND remote_url IS NOT NULL AND asset_state != 'local' \
             ORDER BY spec_id, id",
        )
        .bind(series_id)
        .fetch_all(&self.pool)
        .await?;
        let frames: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT p.seq, p.spec_id, p.color_id FROM panorama_photos p \
             JOIN specifications s ON s.id = p.spec_id \
             WHERE s.series_id = ? AND p.remote_url IS NOT NULL AND p.asset_state != 'local' \
             ORDER BY p.spec_id, p.color_id, p.seq",
        )
        .bind(series_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(photos
            .into_iter()
            .map(|(id,)| AssetKey::Photo(PhotoKey(id)))
            .chain(frames.into_iter().map(|(seq, spec_id, color_id)| {
                AssetKey::PanoramaFrame(PanoramaFrameKey {
                    seq,
                    spec_id,
                    color_id,
                })
            }))
            .collect())
    }

    /// Rows with a remote URL that are not yet local.
    pub async fn pending_media(&self) -> Result<PendingMedia, StoreError> {
        let (photos,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM photos WHERE remote_url IS NOT NULL AND asset_state != 'local'",
        )
        .fetch_one(&self.pool)
        .await?;
        let (panorama_frames,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM panorama_photos \
             WHERE remote_url IS NOT NULL AND asset_state != 'local'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(PendingMedia {
            photos,
            panorama_frames,
        })
    }
}
