// tests/lifecycle_test.rs
// Decay state machine and consolidation behavior against a real store.

mod common;

use chrono::{Duration, Utc};
use engram::storage::MemoryStore;
use engram::types::{ListFilter, MemoryStatus, StoreRequest};

fn fact(content: &str, tags: Vec<&str>) -> StoreRequest {
    StoreRequest {
        content: content.to_string(),
        kind: "fact".to_string(),
        tags: tags.into_iter().map(String::from).collect(),
        source: "test".to_string(),
        confidence: 0.8,
        user_context: None,
        defer_embedding: false,
    }
}

// Defaults: interval 1h, rate 0.05/interval, archive < 0.3, expire < 0.1.

#[tokio::test]
async fn test_decay_score_is_monotone_and_bounded() {
    let (service, _) = common::setup().await;
    let record = service.store(fact("idle memory", vec![])).await.unwrap();

    // Simulated clock: two hours of idleness per pass, no accesses between.
    let now = Utc::now() + Duration::hours(2);
    let mut previous = record.decay_score;
    for _ in 0..12 {
        service.run_decay_pass(now).await.unwrap();
        let current = service.get(&record.id).await.unwrap().unwrap();
        assert!(current.decay_score <= previous);
        assert!((0.0..=1.0).contains(&current.decay_score));
        previous = current.decay_score;
    }
}

#[tokio::test]
async fn test_decay_archives_then_expires() {
    let (service, _) = common::setup().await;
    let record = service.store(fact("fading memory", vec![])).await.unwrap();

    // Fifteen idle intervals: 1.0 - 0.75 = 0.25, below the archival
    // threshold but above expiration.
    let now = Utc::now() + Duration::hours(15);
    let report = service.run_decay_pass(now).await.unwrap();
    assert_eq!(report.archived, 1);
    assert_eq!(report.expired, 0);

    let archived = service.get(&record.id).await.unwrap().unwrap();
    assert_eq!(archived.status, MemoryStatus::Archived);

    // The next pass pushes the archived record under the expiration line.
    let report = service.run_decay_pass(now).await.unwrap();
    assert_eq!(report.expired, 1);

    let expired = service.get(&record.id).await.unwrap().unwrap();
    assert_eq!(expired.status, MemoryStatus::Expired);

    // Expired is terminal: further passes leave it alone.
    service.run_decay_pass(now).await.unwrap();
    let unchanged = service.get(&record.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, MemoryStatus::Expired);

    // And expired rows are invisible to list.
    let listed = service.list(ListFilter::default()).await.unwrap();
    assert!(listed.iter().all(|r| r.id != record.id));
}

#[tokio::test]
async fn test_preservation_tag_freezes_score_and_status() {
    let (service, _) = common::setup().await;
    let pinned = service
        .store(fact("never forget", vec!["pinned"]))
        .await
        .unwrap();
    let plain = service.store(fact("forgettable", vec![])).await.unwrap();

    let now = Utc::now() + Duration::hours(100);
    for _ in 0..3 {
        service.run_decay_pass(now).await.unwrap();
    }

    let preserved = service.get(&pinned.id).await.unwrap().unwrap();
    assert_eq!(preserved.status, pinned.status);
    assert_eq!(preserved.decay_score, pinned.decay_score);

    // The control record decayed all the way out.
    let control = service.get(&plain.id).await.unwrap().unwrap();
    assert_eq!(control.status, MemoryStatus::Expired);
}

#[tokio::test]
async fn test_disabled_decay_is_a_noop_scan() {
    let mut config = common::test_config();
    config.decay_enabled = false;
    let (service, _) = common::setup_with_config(config).await;
    let record = service.store(fact("untouched", vec![])).await.unwrap();

    let report = service
        .run_decay_pass(Utc::now() + Duration::hours(1000))
        .await
        .unwrap();
    assert_eq!(report.scanned, 0);

    let unchanged = service.get(&record.id).await.unwrap().unwrap();
    assert_eq!(unchanged.decay_score, 1.0);
    assert_eq!(unchanged.status, MemoryStatus::Active);
}

#[tokio::test]
async fn test_decay_respects_scope_boundaries() {
    let (service, _) = common::setup().await;

    let mut scoped = fact("alice memory", vec![]);
    scoped.user_context = Some("alice".to_string());
    let a = service.store(scoped).await.unwrap();
    let b = service.store(fact("unscoped memory", vec![])).await.unwrap();

    let report = service
        .run_decay_pass(Utc::now() + Duration::hours(2))
        .await
        .unwrap();
    // Both scopes are visited in one pass.
    assert_eq!(report.scanned, 2);

    for id in [&a.id, &b.id] {
        let rec = service.get(id).await.unwrap().unwrap();
        assert!(rec.decay_score < 1.0);
    }
}

#[tokio::test]
async fn test_decay_write_cannot_revive_a_deleted_record() {
    let (service, store) = common::setup().await;
    let record = service.store(fact("short lived", vec![])).await.unwrap();
    service.delete(&record.id).await.unwrap();

    // A decay pass that loaded the record before the delete still issues
    // this write; the status guard must reject it.
    let applied = store
        .apply_decay(&record.id, 0.5, MemoryStatus::Archived)
        .await
        .unwrap();
    assert!(!applied);

    let current = service.get(&record.id).await.unwrap().unwrap();
    assert_eq!(current.status, MemoryStatus::Deleted);
}

#[tokio::test]
async fn test_consolidation_write_cannot_revive_a_deleted_record() {
    let (service, store) = common::setup().await;
    let record = service.store(fact("short lived", vec![])).await.unwrap();
    service.delete(&record.id).await.unwrap();

    let assigned = store
        .assign_cluster(&record.id, "stale-plan", MemoryStatus::Archived, Utc::now())
        .await
        .unwrap();
    assert!(!assigned);

    let current = service.get(&record.id).await.unwrap().unwrap();
    assert_eq!(current.status, MemoryStatus::Deleted);
    assert!(current.cluster_id.is_none());
}

#[tokio::test]
async fn test_consolidation_merges_near_duplicates() {
    let (service, _) = common::setup().await;

    // Same vocabulary profile: near-identical vectors.
    let low = {
        let mut r = fact("rust memory database alpha", vec![]);
        r.confidence = 0.5;
        service.store(r).await.unwrap()
    };
    let high = {
        let mut r = fact("rust memory database beta", vec![]);
        r.confidence = 0.9;
        service.store(r).await.unwrap()
    };
    let unrelated = service.store(fact("coffee brewing notes", vec![])).await.unwrap();

    let report = service.consolidate(None).await.unwrap();
    assert_eq!(report.clusters_created, 1);
    assert_eq!(report.records_archived, 1);

    // Highest confidence wins representative and stays active.
    let representative = service.get(&high.id).await.unwrap().unwrap();
    assert_eq!(representative.status, MemoryStatus::Active);
    assert!(representative.cluster_id.is_some());

    let absorbed = service.get(&low.id).await.unwrap().unwrap();
    assert_eq!(absorbed.status, MemoryStatus::Archived);
    assert_eq!(absorbed.cluster_id, representative.cluster_id);

    let untouched = service.get(&unrelated.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, MemoryStatus::Active);
    assert!(untouched.cluster_id.is_none());
}

#[tokio::test]
async fn test_consolidation_is_idempotent() {
    let (service, _) = common::setup().await;

    service.store(fact("rust memory database alpha", vec![])).await.unwrap();
    service.store(fact("rust memory database beta", vec![])).await.unwrap();

    let first = service.consolidate(None).await.unwrap();
    assert_eq!(first.clusters_created, 1);

    // No new records between calls: nothing left to cluster.
    let second = service.consolidate(None).await.unwrap();
    assert_eq!(second.clusters_created, 0);
    assert_eq!(second.records_archived, 0);
}

#[tokio::test]
async fn test_absorbed_members_leave_search_but_stay_retrievable() {
    let (service, _) = common::setup().await;

    let a = service.store(fact("rust memory database alpha", vec![])).await.unwrap();
    let b = service.store(fact("rust memory database beta", vec![])).await.unwrap();
    service.consolidate(None).await.unwrap();

    let results = service
        .search("rust memory database", None, Some(0.3), None)
        .await
        .unwrap();
    // Exactly one of the pair survives in search: the representative.
    let surviving: Vec<&str> = results
        .iter()
        .map(|s| s.record.id.as_str())
        .filter(|id| *id == a.id || *id == b.id)
        .collect();
    assert_eq!(surviving.len(), 1);

    // The archived member is still reachable by direct lookup.
    let archived_id = if surviving[0] == a.id { &b.id } else { &a.id };
    assert!(service.get(archived_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_disabled_consolidation_is_a_noop() {
    let mut config = common::test_config();
    config.consolidation_enabled = false;
    let (service, _) = common::setup_with_config(config).await;

    service.store(fact("rust memory database alpha", vec![])).await.unwrap();
    service.store(fact("rust memory database beta", vec![])).await.unwrap();

    let report = service.consolidate(None).await.unwrap();
    assert_eq!(report.clusters_created, 0);
}

#[tokio::test]
async fn test_consolidation_respects_scope_boundaries() {
    let (service, _) = common::setup().await;

    let mut in_alice = fact("rust memory database alpha", vec![]);
    in_alice.user_context = Some("alice".to_string());
    service.store(in_alice).await.unwrap();

    // The near-duplicate lives in another scope, so consolidating alice
    // finds no cluster.
    let mut in_bob = fact("rust memory database beta", vec![]);
    in_bob.user_context = Some("bob".to_string());
    service.store(in_bob).await.unwrap();

    let report = service.consolidate(Some("alice")).await.unwrap();
    assert_eq!(report.clusters_created, 0);
}
