#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Store contract tests against the in-memory SQLite backend: request
//! deduplication, the claim protocol, progress monotonicity, and batch
//! semantics.

use serde_json::json;

use zonewatch_broker::storage::{
    AddUserOutcome, CreateTest, SqliteStore, Store, StoreError,
};
use zonewatch_core::fingerprint;
use zonewatch_core::validation::{self, HistoryFilter, HistoryQuery};
use zonewatch_core::Config;

async fn store() -> SqliteStore {
    SqliteStore::open_in_memory().await.unwrap()
}

fn request_for(params: serde_json::Value) -> CreateTest {
    let config = Config::default();
    let parsed = validation::parse_start_test(&params, &config).unwrap();
    CreateTest::from_params(&parsed).unwrap()
}

fn request(domain: &str) -> CreateTest {
    request_for(json!({ "domain": domain }))
}

/// Rewind a test's creation time so reuse-window expiry is observable
/// without sleeping. The test id is derived from the creation time, so the
/// row is rewritten to the id it would have carried; the new id is
/// returned.
async fn backdate(store: &SqliteStore, hash_id: &str, canonical: &str, seconds: i64) -> String {
    let row = store.read_test(hash_id).await.unwrap();
    let aged_time = row.creation_time - seconds;
    let aged_id = fingerprint::test_id(canonical, aged_time);
    sqlx::query("UPDATE test_results SET creation_time = ?, hash_id = ? WHERE hash_id = ?")
        .bind(aged_time)
        .bind(&aged_id)
        .bind(hash_id)
        .execute(store.pool())
        .await
        .unwrap();
    aged_id
}

async fn finish(store: &SqliteStore, hash_id: &str) {
    store.store_results(hash_id, Vec::new()).await.unwrap();
}

// === Dedup ===

#[tokio::test]
async fn same_params_reuse_the_same_test() {
    let store = store().await;
    let a = store.create_test(&request("dedup.test"), 600).await.unwrap();
    let b = store.create_test(&request("dedup.test"), 600).await.unwrap();
    assert_eq!(a, b);

    let other = store.create_test(&request("other.test"), 600).await.unwrap();
    assert_ne!(a, other);
}

#[tokio::test]
async fn permuted_lists_reuse_the_same_test() {
    let store = store().await;
    let a = request_for(json!({
        "domain": "perm.test",
        "nameservers": [
            {"ns": "ns1.perm.test", "ip": "192.0.2.1"},
            {"ns": "ns2.perm.test"}
        ]
    }));
    let b = request_for(json!({
        "domain": "perm.test",
        "nameservers": [
            {"ns": "ns2.perm.test"},
            {"ns": "ns1.perm.test", "ip": "192.0.2.1"}
        ]
    }));
    assert_eq!(a.fingerprint, b.fingerprint);

    let first = store.create_test(&a, 600).await.unwrap();
    let second = store.create_test(&b, 600).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn unfinished_test_is_reused_past_the_window() {
    let store = store().await;
    let req = request("slow.test");
    let a = store.create_test(&req, 600).await.unwrap();
    let aged = backdate(&store, &a, &req.canonical, 10_000).await;

    // Still at progress 0, so the window does not matter.
    let b = store.create_test(&req, 600).await.unwrap();
    assert_eq!(b, aged);
}

#[tokio::test]
async fn finished_test_is_reused_only_inside_the_window() {
    let store = store().await;
    let req = request("done.test");
    let a = store.create_test(&req, 600).await.unwrap();
    store.claim_next(0, 10).await.unwrap();
    finish(&store, &a).await;

    // Finished but fresh: reused.
    let b = store.create_test(&req, 600).await.unwrap();
    assert_eq!(a, b);

    // Finished and aged out: a fresh test id on a fresh row.
    let aged = backdate(&store, &a, &req.canonical, 10_000).await;
    let c = store.create_test(&req, 600).await.unwrap();
    assert_ne!(c, aged);
    assert_eq!(store.read_test(&c).await.unwrap().progress, 0);
    assert_eq!(store.read_test(&aged).await.unwrap().progress, 100);
}

// === Claim protocol ===

#[tokio::test]
async fn claim_orders_by_priority_then_id() {
    let store = store().await;
    let low = store
        .create_test(&request_for(json!({"domain": "low.test", "priority": 1})), 600)
        .await
        .unwrap();
    let high = store
        .create_test(&request_for(json!({"domain": "high.test", "priority": 20})), 600)
        .await
        .unwrap();
    let mid_a = store
        .create_test(&request_for(json!({"domain": "mid-a.test", "priority": 5})), 600)
        .await
        .unwrap();
    let mid_b = store
        .create_test(&request_for(json!({"domain": "mid-b.test", "priority": 5})), 600)
        .await
        .unwrap();

    assert_eq!(store.claim_next(0, 10).await.unwrap(), Some(high));
    assert_eq!(store.claim_next(0, 10).await.unwrap(), Some(mid_a));
    assert_eq!(store.claim_next(0, 10).await.unwrap(), Some(mid_b));
    assert_eq!(store.claim_next(0, 10).await.unwrap(), Some(low));
    assert_eq!(store.claim_next(0, 10).await.unwrap(), None);
}

#[tokio::test]
async fn claimed_test_is_never_redispatched() {
    let store = store().await;
    let id = store.create_test(&request("once.test"), 600).await.unwrap();

    assert_eq!(store.claim_next(0, 10).await.unwrap(), Some(id));
    assert_eq!(store.claim_next(0, 10).await.unwrap(), None);
}

#[tokio::test]
async fn claim_respects_queue_isolation() {
    let store = store().await;
    let q0 = store
        .create_test(&request_for(json!({"domain": "q0.test", "queue": 0})), 600)
        .await
        .unwrap();
    let q1 = store
        .create_test(&request_for(json!({"domain": "q1.test", "queue": 1})), 600)
        .await
        .unwrap();

    assert_eq!(store.claim_next(1, 10).await.unwrap(), Some(q1));
    assert_eq!(store.claim_next(1, 10).await.unwrap(), None);
    assert_eq!(store.claim_next(0, 10).await.unwrap(), Some(q0));
}

#[tokio::test]
async fn claim_respects_concurrency_cap() {
    let store = store().await;
    store.create_test(&request("cap-a.test"), 600).await.unwrap();
    store.create_test(&request("cap-b.test"), 600).await.unwrap();

    let first = store.claim_next(0, 1).await.unwrap();
    assert!(first.is_some());

    // One test is running on the queue; the cap blocks the second claim.
    assert_eq!(store.claim_next(0, 1).await.unwrap(), None);

    // Finishing the first frees the slot.
    finish(&store, &first.unwrap()).await;
    assert!(store.claim_next(0, 1).await.unwrap().is_some());
}

// === Progress and results ===

#[tokio::test]
async fn progress_is_monotone_and_caps_at_100() {
    let store = store().await;
    let id = store.create_test(&request("prog.test"), 600).await.unwrap();
    store.claim_next(0, 10).await.unwrap();

    store.set_progress(&id, 40).await.unwrap();
    assert_eq!(store.read_test(&id).await.unwrap().progress, 40);

    // Lower write is a silent no-op.
    store.set_progress(&id, 10).await.unwrap();
    assert_eq!(store.read_test(&id).await.unwrap().progress, 40);

    store.set_progress(&id, 100).await.unwrap();
    let row = store.read_test(&id).await.unwrap();
    assert_eq!(row.progress, 100);
    assert!(row.end_time.is_some());

    // Finished progress never moves again.
    store.set_progress(&id, 50).await.unwrap();
    assert_eq!(store.read_test(&id).await.unwrap().progress, 100);
}

#[tokio::test]
async fn set_progress_on_unknown_test_fails() {
    let store = store().await;
    let err = store.set_progress("0123456789abcdef", 10).await.unwrap_err();
    assert!(matches!(err, StoreError::TestNotFound(_)));
}

#[tokio::test]
async fn results_require_a_claim() {
    let store = store().await;
    let id = store.create_test(&request("early.test"), 600).await.unwrap();

    let err = store.store_results(&id, Vec::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotStarted(_)));

    store.claim_next(0, 10).await.unwrap();
    store.store_results(&id, Vec::new()).await.unwrap();

    let row = store.read_test(&id).await.unwrap();
    assert_eq!(row.progress, 100);
    assert!(row.end_time.is_some());
    assert_eq!(row.result_entries().unwrap(), Vec::new());
}

#[tokio::test]
async fn debug_levels_are_filtered_at_the_store_boundary() {
    let store = store().await;
    let id = store.create_test(&request("filter.test"), 600).await.unwrap();
    store.claim_next(0, 10).await.unwrap();

    let entries = serde_json::from_value(json!([
        {"module": "SYSTEM", "tag": "T1", "level": "DEBUG3"},
        {"module": "SYSTEM", "tag": "T2", "level": "DEBUG"},
        {"module": "NAMESERVER", "tag": "T3", "level": "WARNING"}
    ]))
    .unwrap();
    store.store_results(&id, entries).await.unwrap();

    let kept = store.read_test(&id).await.unwrap().result_entries().unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].tag, "T3");
}

// === History ===

#[tokio::test]
async fn history_lists_started_tests_newest_first() {
    let store = store().await;
    let delegated = store.create_test(&request("hist.test"), 600).await.unwrap();
    let undelegated = store
        .create_test(
            &request_for(json!({
                "domain": "hist.test",
                "nameservers": [{"ns": "ns1.hist.test"}]
            })),
            600,
        )
        .await
        .unwrap();
    let waiting = store
        .create_test(&request_for(json!({"domain": "hist.test", "ipv6": false})), 600)
        .await
        .unwrap();

    // Start the first two; the third stays waiting and out of history.
    store.claim_next(0, 10).await.unwrap();
    store.claim_next(0, 10).await.unwrap();

    let all = store
        .history(&HistoryQuery {
            domain: "hist.test".to_string(),
            offset: 0,
            limit: 200,
            filter: HistoryFilter::All,
        })
        .await
        .unwrap();
    let ids: Vec<&str> = all.iter().map(|r| r.hash_id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&delegated.as_str()));
    assert!(ids.contains(&undelegated.as_str()));
    assert!(!ids.contains(&waiting.as_str()));

    let only_undelegated = store
        .history(&HistoryQuery {
            domain: "hist.test".to_string(),
            offset: 0,
            limit: 200,
            filter: HistoryFilter::Undelegated,
        })
        .await
        .unwrap();
    assert_eq!(only_undelegated.len(), 1);
    assert_eq!(only_undelegated[0].hash_id, undelegated);
    assert!(only_undelegated[0].undelegated);
}

// === Users and batches ===

#[tokio::test]
async fn add_user_is_idempotent_and_detects_conflicts() {
    let store = store().await;
    assert_eq!(
        store.add_user("alice", "secret").await.unwrap(),
        AddUserOutcome::Created
    );
    assert_eq!(
        store.add_user("alice", "secret").await.unwrap(),
        AddUserOutcome::AlreadyExists { same_key: true }
    );
    assert_eq!(
        store.add_user("alice", "other").await.unwrap(),
        AddUserOutcome::AlreadyExists { same_key: false }
    );

    assert!(store.verify_user("alice", "secret").await.unwrap());
    assert!(!store.verify_user("alice", "other").await.unwrap());
    assert!(!store.verify_user("bob", "secret").await.unwrap());
}

#[tokio::test]
async fn batch_requires_valid_credentials() {
    let store = store().await;
    store.add_user("alice", "secret").await.unwrap();

    let tests = vec![request("a.test")];
    let err = store
        .create_batch("alice", "wrong", &tests)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unauthorized(_)));

    let err = store.create_batch("bob", "secret", &tests).await.unwrap_err();
    assert!(matches!(err, StoreError::Unauthorized(_)));
}

#[tokio::test]
async fn one_open_batch_per_user() {
    let store = store().await;
    store.add_user("alice", "secret").await.unwrap();

    let tests = vec![request("a.test"), request("b.test")];
    let batch_id = store.create_batch("alice", "secret", &tests).await.unwrap();
    assert_eq!(batch_id, 1);

    let status = store.batch_status(batch_id).await.unwrap();
    assert_eq!(status.nb_running, 2);
    assert_eq!(status.nb_finished, 0);

    // Both tests still waiting: the user is gated.
    let err = store
        .create_batch("alice", "secret", &[request("c.test")])
        .await
        .unwrap_err();
    match err {
        StoreError::BatchStillRunning { batch_id: open, .. } => assert_eq!(open, batch_id),
        other => panic!("unexpected error: {other}"),
    }

    // Finish every test in the batch; the next batch goes through.
    while let Some(id) = store.claim_next(0, 10).await.unwrap() {
        finish(&store, &id).await;
    }
    let status = store.batch_status(batch_id).await.unwrap();
    assert_eq!(status.nb_finished, 2);
    assert_eq!(status.finished_test_ids.len(), 2);

    let second = store
        .create_batch("alice", "secret", &[request("c.test")])
        .await
        .unwrap();
    assert_eq!(second, 2);
}

#[tokio::test]
async fn batch_tests_carry_batch_defaults() {
    let store = store().await;
    store.add_user("alice", "secret").await.unwrap();

    let config = Config::default();
    let parsed = validation::parse_batch(
        &json!({
            "username": "alice",
            "api_key": "secret",
            "domains": ["a.test", "b.test"]
        }),
        &config,
    )
    .unwrap();

    let mut tests = Vec::new();
    for domain in &parsed.domains {
        let mut template = parsed.template.clone();
        template.domain = domain.clone();
        tests.push(CreateTest::from_params(&template).unwrap());
    }
    let batch_id = store
        .create_batch(&parsed.username, &parsed.api_key, &tests)
        .await
        .unwrap();

    let id = store.claim_next(0, 10).await.unwrap().unwrap();
    let row = store.read_test(&id).await.unwrap();
    assert_eq!(row.batch_id, Some(batch_id));
    assert_eq!(row.priority, 5);
    assert_eq!(row.queue, 0);
}

#[tokio::test]
async fn unknown_batch_id_is_an_error() {
    let store = store().await;
    let err = store.batch_status(99).await.unwrap_err();
    assert!(matches!(err, StoreError::BatchNotFound(99)));
}
