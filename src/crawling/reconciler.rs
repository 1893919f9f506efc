//! Reconciler: raw feed records in, idempotent upserts out
//!
//! Every record is resolved to its canonical key and handed to the store. Rejected records and
//! failed writes are logged and counted; they never stop the caller.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::crawling::state::SharedState;
use crate::domain::{Record, Resolve};
use crate::infrastructure::entity_store::{EntityStore, UpsertOutcome, Upserted};

/// A record written with part of its observed state held back.
///
/// The stored row is `held`. [`Reconciler::commit`] writes `observed` once the children the
/// held-back fields describe are stored, and [`Reconciler::abandon`] leaves `held` in place. Either
/// one counts the outcome exactly once.
#[derive(Debug, Clone)]
#[must_use]
pub struct Staged<R> {
    pub previous: Option<R>,
    pub held: Upserted<R>,
    observed: R,
}

impl<R> Staged<R> {
    pub const fn observed(&self) -> &R {
        &self.observed
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: EntityStore,
    state: Arc<SharedState>,
}

impl Reconciler {
    #[must_use]
    pub const fn new(store: EntityStore, state: Arc<SharedState>) -> Self {
        Self { store, state }
    }

    /// Resolves and upserts one record. `None` when it was rejected or could not be written.
    pub async fn reconcile<T>(&self, raw: T) -> Option<Upserted<T::Output>>
    where
        T: Resolve + Send,
    {
        let record = self.resolve(raw).await?;
        self.write(record).await
    }

    /// Resolves `raw` and stores it after `hold_back` has reset the fields that must not be
    /// committed yet. `hold_back` sees the stored row, `None` on first sight.
    pub async fn stage<T, F>(&self, raw: T, hold_back: F) -> Option<Staged<T::Output>>
    where
        T: Resolve + Send,
        F: FnOnce(&mut T::Output, Option<&T::Output>) + Send,
    {
        let observed = self.resolve(raw).await?;
        let kind = <T::Output as Record>::KIND;
        let key = observed.key();
        let previous = match self.store.lookup::<T::Output>(&key).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!("Lookup of {} {} failed: {}", kind, key, e);
                self.state.record_store_error(kind).await;
                return None;
            }
        };

        let mut held = observed.clone();
        hold_back(&mut held, previous.as_ref());
        match self.store.upsert(held).await {
            Ok(held) => Some(Staged {
                previous,
                held,
                observed,
            }),
            Err(e) => {
                warn!("Failed to store {} {}: {}", kind, key, e);
                self.state.record_store_error(kind).await;
                None
            }
        }
    }

    /// Writes the full observed record of a staged write.
    pub async fn commit<R: Record>(&self, staged: Staged<R>) -> Option<Upserted<R>> {
        let Staged { held, observed, .. } = staged;
        let key = observed.key();
        if held.record == observed {
            self.count::<R>(&key, held.outcome).await;
            return Some(held);
        }
        match self.store.upsert(observed).await {
            Ok(committed) => {
                // an insert stays an insert
                let outcome = match held.outcome {
                    UpsertOutcome::Unchanged => committed.outcome,
                    earlier => earlier,
                };
                self.count::<R>(&key, outcome).await;
                Some(Upserted {
                    outcome,
                    record: committed.record,
                })
            }
            Err(e) => {
                warn!("Failed to commit {} {}: {}", R::KIND, key, e);
                self.count::<R>(&key, held.outcome).await;
                None
            }
        }
    }

    /// Keeps the held-back row of a staged write.
    pub async fn abandon<R: Record>(&self, staged: Staged<R>) {
        let key = staged.held.record.key();
        debug!("{} {} left uncommitted", R::KIND, key);
        self.count::<R>(&key, staged.held.outcome).await;
    }

    /// Reconciles a whole listing in order, returning the records that were stored.
    pub async fn reconcile_all<T>(&self, raws: Vec<T>) -> Vec<T::Output>
    where
        T: Resolve + Send,
    {
        let mut stored = Vec::with_capacity(raws.len());
        for raw in raws {
            if let Some(upserted) = self.reconcile(raw).await {
                stored.push(upserted.record);
            }
        }
        stored
    }

    async fn resolve<T>(&self, raw: T) -> Option<T::Output>
    where
        T: Resolve + Send,
    {
        match raw.resolve() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping record: {}", e);
                self.state.record_rejection(e.kind()).await;
                None
            }
        }
    }

    async fn write<R: Record>(&self, record: R) -> Option<Upserted<R>> {
        let key = record.key();
        match self.store.upsert(record).await {
            Ok(upserted) => {
                self.count::<R>(&key, upserted.outcome).await;
                Some(upserted)
            }
            Err(e) => {
                warn!("Failed to store {} {}: {}", R::KIND, key, e);
                self.state.record_store_error(R::KIND).await;
                None
            }
        }
    }

    async fn count<R: Record>(&self, key: &R::Key, outcome: UpsertOutcome) {
        debug!("{} {}: {}", R::KIND, key, outcome);
        self.state.record_outcome(R::KIND, outcome).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::keys::{BrandKey, RawBrand, RawSeries};
    use crate::domain::{Brand, EntityKind};
    use crate::infrastructure::config::DatabaseConfig;
    use tokio_util::sync::CancellationToken;

    async fn reconciler(dir: &std::path::Path) -> (Reconciler, Arc<SharedState>) {
        let store = EntityStore::open(&DatabaseConfig {
            url: format!("sqlite://{}/store.db", dir.display()),
            ..DatabaseConfig::default()
        })
        .await
        .unwrap();
        let state = Arc::new(SharedState::new(CancellationToken::new()));
        (Reconciler::new(store, Arc::clone(&state)), state)
    }

    fn brand(id: Option<i64>, name: &str) -> RawBrand {
        RawBrand {
            id,
            name: Some(name.into()),
            logo_url: None,
        }
    }

    #[tokio::test]
    async fn test_rejected_records_are_counted_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, state) = reconciler(dir.path()).await;

        let stored = reconciler
            .reconcile_all(vec![brand(Some(33), "奥迪"), brand(None, "nameless")])
            .await;
        assert_eq!(stored.len(), 1);

        let report = state.snapshot().await;
        assert_eq!(report.counts(EntityKind::Brand).inserted, 1);
        assert_eq!(report.counts(EntityKind::Brand).rejected, 1);
    }

    #[tokio::test]
    async fn test_orphan_child_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, state) = reconciler(dir.path()).await;

        let orphan = RawSeries {
            brand_id: 404,
            id: Some(1),
            name: Some("A4L".into()),
            is_new_energy: None,
        };
        assert!(reconciler.reconcile(orphan).await.is_none());
        assert_eq!(state.snapshot().await.counts(EntityKind::Series).store_errors, 1);
    }

    fn keep_stored_logo(held: &mut Brand, stored: Option<&Brand>) {
        held.logo_url = stored.and_then(|b| b.logo_url.clone());
    }

    fn logo(url: &str) -> RawBrand {
        RawBrand {
            logo_url: Some(url.into()),
            ..brand(Some(33), "奥迪")
        }
    }

    #[tokio::test]
    async fn test_staged_insert_counts_once_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, state) = reconciler(dir.path()).await;

        let staged = reconciler
            .stage(logo("//img/v1.png"), keep_stored_logo)
            .await
            .unwrap();
        assert!(staged.previous.is_none());
        assert_eq!(staged.held.record.logo_url, None);

        let committed = reconciler.commit(staged).await.unwrap();
        assert_eq!(committed.outcome, UpsertOutcome::Inserted);
        assert_eq!(committed.record.logo_url.as_deref(), Some("//img/v1.png"));

        let counts = state.snapshot().await.counts(EntityKind::Brand);
        assert_eq!((counts.inserted, counts.updated), (1, 0));
    }

    #[tokio::test]
    async fn test_abandoned_stage_keeps_stored_fields() {
        let dir = tempfile::tempdir().unwrap();
        let (reconciler, state) = reconciler(dir.path()).await;
        let staged = reconciler.stage(logo("//img/v1.png"), keep_stored_logo).await.unwrap();
        reconciler.commit(staged).await.unwrap();

        let staged = reconciler.stage(logo("//img/v2.png"), keep_stored_logo).await.unwrap();
        assert_eq!(
            staged.previous.as_ref().and_then(|b| b.logo_url.as_deref()),
            Some("//img/v1.png")
        );
        assert_eq!(staged.observed().logo_url.as_deref(), Some("//img/v2.png"));
        reconciler.abandon(staged).await;

        let stored = reconciler.store.lookup::<Brand>(&BrandKey(33)).await.unwrap().unwrap();
        assert_eq!(stored.logo_url.as_deref(), Some("//img/v1.png"));
        assert_eq!(state.snapshot().await.counts(EntityKind::Brand).unchanged, 1);

        // committing later moves the row forward as an update
        let staged = reconciler.stage(logo("//img/v2.png"), keep_stored_logo).await.unwrap();
        assert_eq!(
            reconciler.commit(staged).await.unwrap().outcome,
            UpsertOutcome::Updated
        );
    }
}
