//! Interrupting a pass after any listing call leaves a consistent store that the next pass
//! completes.

mod common;

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use autocat_sync::domain::EntityKind;

use common::{Catalog, Harness};

async fn row_counts(harness: &Harness) -> BTreeMap<EntityKind, i64> {
    let mut counts = BTreeMap::new();
    for kind in EntityKind::ALL {
        counts.insert(kind, harness.store.count(kind).await.unwrap());
    }
    counts
}

async fn local_files_exist(harness: &Harness) -> bool {
    let mut paths: Vec<(Option<String>,)> =
        sqlx::query_as("SELECT local_path FROM photos WHERE asset_state = 'local'")
            .fetch_all(harness.store.pool())
            .await
            .unwrap();
    paths.extend(
        sqlx::query_as::<_, (Option<String>,)>(
            "SELECT local_path FROM panorama_photos WHERE asset_state = 'local'",
        )
        .fetch_all(harness.store.pool())
        .await
        .unwrap(),
    );
    paths.into_iter().all(|(path,)| {
        path.is_some_and(|path| harness.media_root().join(path).exists())
    })
}

#[tokio::test]
async fn every_interruption_point_resumes_to_the_full_tree() {
    let baseline = Harness::new(Catalog::sample()).await;
    baseline.pass().await;
    let expected = row_counts(&baseline).await;
    let total_calls = baseline.feed.total_calls();
    assert!(total_calls > 10);

    for after in 1..=total_calls {
        let harness = Harness::new(Catalog::sample()).await;
        let token = CancellationToken::new();
        harness.feed.cancel_after(after, token.clone());

        let interrupted = harness.orchestrator(token).run_pass().await.unwrap();
        assert!(interrupted.cancelled, "after {after} calls");
        assert_eq!(
            harness.foreign_key_violations().await,
            0,
            "after {after} calls"
        );
        assert!(local_files_exist(&harness).await, "after {after} calls");

        let resumed = harness.pass().await;
        assert!(!resumed.cancelled);
        assert_eq!(row_counts(&harness).await, expected, "after {after} calls");
        let pending = harness.store.pending_media().await.unwrap();
        assert_eq!(
            (pending.photos, pending.panorama_frames),
            (0, 0),
            "after {after} calls"
        );
        assert!(resumed.partial_panoramas.is_empty(), "after {after} calls");
    }
}

#[tokio::test]
async fn cancelled_before_start_writes_nothing() {
    let harness = Harness::new(Catalog::sample()).await;
    let token = CancellationToken::new();
    token.cancel();

    let report = harness.orchestrator(token).run_pass().await.unwrap();

    assert!(report.cancelled);
    assert_eq!(harness.feed.total_calls(), 0);
    assert_eq!(report.total_written(), 0);
    for kind in EntityKind::ALL {
        assert_eq!(harness.store.count(kind).await.unwrap(), 0, "{kind}");
    }
}
