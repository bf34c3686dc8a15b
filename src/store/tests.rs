#![cfg(test)]

use crate::error::StoreError;
use crate::model::{Contribution, ContributionTimestamp, Pool, PoolStatus};
use crate::store::PoolStore;

// =========================================================================
// Helpers
// =========================================================================

fn sample_pool(id: &str) -> Pool {
    Pool {
        pool_id: id.to_string(),
        creator_uuid: "creator-1".to_string(),
        pool_title: format!("Pool {id}"),
        goal_amount: 100_000,
        current_amount: 0,
        status: PoolStatus::Active,
        spark_address: format!("sprt1q{id}"),
        identity_pub_key: "02ab".to_string(),
        derivation_index: 1000,
        pool_denomination: "USD".to_string(),
        created_at: 1_700_000_000_000,
        closed_at: None,
        transfer_tx_id: None,
        contributor_count: 0,
        last_contribution_at: None,
        top_contributors: vec![],
        last_updated: 0,
    }
}

fn sample_contribution(id: &str, pool_id: &str, seconds: i64) -> Contribution {
    Contribution {
        contribution_id: id.to_string(),
        pool_id: pool_id.to_string(),
        contributor_name: "anon".to_string(),
        amount: 2_500,
        created_at: ContributionTimestamp::new(seconds, 0),
    }
}

// =========================================================================
// Pools
// =========================================================================

#[tokio::test]
async fn upsert_inserts_then_updates() {
    let store = PoolStore::in_memory();
    let mut pool = sample_pool("p1");

    store.upsert_pool(&pool).await.unwrap();
    let loaded = store.get_pool("p1").await.unwrap().unwrap();
    assert_eq!(loaded.pool_title, "Pool p1");

    pool.current_amount = 5_000;
    store.upsert_pool(&pool).await.unwrap();
    let loaded = store.get_pool("p1").await.unwrap().unwrap();
    assert_eq!(loaded.current_amount, 5_000);
    assert_eq!(store.count_pools().await.unwrap(), 1);
}

#[tokio::test]
async fn upsert_rejects_missing_identity_fields() {
    let store = PoolStore::in_memory();

    let mut no_id = sample_pool("p1");
    no_id.pool_id.clear();
    assert!(matches!(
        store.upsert_pool(&no_id).await,
        Err(StoreError::Validation("poolId"))
    ));

    let mut no_creator = sample_pool("p1");
    no_creator.creator_uuid.clear();
    assert!(matches!(
        store.upsert_pool(&no_creator).await,
        Err(StoreError::Validation("creatorUUID"))
    ));
}

#[tokio::test]
async fn delete_is_idempotent_and_cascades() {
    let store = PoolStore::in_memory();
    store.upsert_pool(&sample_pool("p1")).await.unwrap();
    store
        .save_contribution(&sample_contribution("c1", "p1", 10))
        .await
        .unwrap();

    assert!(store.delete_pool("p1").await.unwrap());
    assert_eq!(store.contributions_count("p1").await.unwrap(), 0);

    // Second delete: nothing happened, not an error.
    assert!(!store.delete_pool("p1").await.unwrap());
}

#[tokio::test]
async fn get_all_orders_by_last_updated_desc() {
    let store = PoolStore::in_memory();
    for id in ["a", "b", "c"] {
        store.upsert_pool(&sample_pool(id)).await.unwrap();
    }
    // Pin deterministic lastUpdated values beneath the typed API.
    store
        .execute_raw("UPDATE pools SET lastUpdated = 100 WHERE uuid = 'a'")
        .await
        .unwrap();
    store
        .execute_raw("UPDATE pools SET lastUpdated = 300 WHERE uuid = 'b'")
        .await
        .unwrap();
    store
        .execute_raw("UPDATE pools SET lastUpdated = 200 WHERE uuid = 'c'")
        .await
        .unwrap();

    let pools = store.get_all_pools().await.unwrap();
    let ids: Vec<&str> = pools.iter().map(|p| p.pool_id.as_str()).collect();
    assert_eq!(ids, ["b", "c", "a"]);
    assert_eq!(pools[0].last_updated, 300);
}

#[tokio::test]
async fn corrupt_pool_row_is_skipped_not_fatal() {
    let store = PoolStore::in_memory();
    for i in 0..9 {
        store.upsert_pool(&sample_pool(&format!("p{i}"))).await.unwrap();
    }
    store
        .execute_raw(
            "INSERT INTO pools (uuid, createdBy, storageObject, lastUpdated)
             VALUES ('bad', 'creator-1', '{not json', 999)",
        )
        .await
        .unwrap();

    let pools = store.get_all_pools().await.unwrap();
    assert_eq!(pools.len(), 9);
    assert!(pools.iter().all(|p| p.pool_id != "bad"));
}

#[tokio::test]
async fn update_pool_fields_merges_partial_document() {
    let store = PoolStore::in_memory();
    store.upsert_pool(&sample_pool("p1")).await.unwrap();

    let updated = store
        .update_pool_fields(
            "p1",
            serde_json::json!({ "currentAmount": 7_500, "contributorCount": 3 }),
        )
        .await
        .unwrap();

    assert_eq!(updated.current_amount, 7_500);
    assert_eq!(updated.contributor_count, 3);
    // Untouched fields survive the merge.
    assert_eq!(updated.goal_amount, 100_000);

    let err = store
        .update_pool_fields("missing", serde_json::json!({ "currentAmount": 1 }))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pools.db");

    {
        let store = PoolStore::new(&path);
        store.upsert_pool(&sample_pool("p1")).await.unwrap();
        store
            .save_contribution(&sample_contribution("c1", "p1", 10))
            .await
            .unwrap();
    }

    let reopened = PoolStore::new(&path);
    assert!(reopened.get_pool("p1").await.unwrap().is_some());
    assert_eq!(reopened.contributions_count("p1").await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_first_callers_share_one_init() {
    let store = PoolStore::in_memory();
    let pool_a = sample_pool("a");
    let pool_b = sample_pool("b");

    let (a, b) = tokio::join!(store.upsert_pool(&pool_a), store.upsert_pool(&pool_b));
    a.unwrap();
    b.unwrap();

    // Both writes must land in the same database.
    assert_eq!(store.count_pools().await.unwrap(), 2);
}

// =========================================================================
// Contributions
// =========================================================================

#[tokio::test]
async fn replaying_a_batch_does_not_duplicate_rows() {
    let store = PoolStore::in_memory();
    let batch = vec![
        sample_contribution("c1", "p1", 10),
        sample_contribution("c2", "p1", 20),
        sample_contribution("c3", "p1", 30),
    ];

    assert_eq!(store.save_contributions_batch(&batch).await.unwrap(), 3);
    assert_eq!(store.save_contributions_batch(&batch).await.unwrap(), 3);
    assert_eq!(store.contributions_count("p1").await.unwrap(), 3);
}

#[tokio::test]
async fn batch_skips_invalid_rows_and_keeps_the_rest() {
    let store = PoolStore::in_memory();
    let mut bad = sample_contribution("c2", "p1", 20);
    bad.amount = 0;
    let batch = vec![sample_contribution("c1", "p1", 10), bad];

    assert_eq!(store.save_contributions_batch(&batch).await.unwrap(), 1);
    assert_eq!(store.contributions_count("p1").await.unwrap(), 1);
}

#[tokio::test]
async fn contributions_come_back_newest_first() {
    let store = PoolStore::in_memory();
    let batch = vec![
        sample_contribution("c1", "p1", 10),
        sample_contribution("c3", "p1", 30),
        sample_contribution("c2", "p1", 20),
    ];
    store.save_contributions_batch(&batch).await.unwrap();

    let rows = store.contributions_for_pool("p1").await.unwrap();
    let ids: Vec<&str> = rows.iter().map(|c| c.contribution_id.as_str()).collect();
    assert_eq!(ids, ["c3", "c2", "c1"]);
}

#[tokio::test]
async fn cursor_is_zero_then_tracks_newest_row() {
    let store = PoolStore::in_memory();
    assert_eq!(
        store.latest_timestamp("p1").await.unwrap(),
        ContributionTimestamp::ZERO
    );

    let mut newest = sample_contribution("c2", "p1", 30);
    newest.created_at.nanos = 500;
    store
        .save_contributions_batch(&[sample_contribution("c1", "p1", 10), newest])
        .await
        .unwrap();

    let cursor = store.latest_timestamp("p1").await.unwrap();
    assert_eq!(cursor, ContributionTimestamp::new(30, 500));
}

#[tokio::test]
async fn legacy_millisecond_rows_are_rescaled_on_read() {
    let store = PoolStore::in_memory();
    // Force lazy init so the raw insert has a table to land in.
    store.contributions_count("p1").await.unwrap();

    // A legacy row that stored epoch millis in the seconds column, both in
    // the sort column and inside the blob.
    store
        .execute_raw(
            r#"INSERT INTO contributions
                 (contributionId, poolId, storageObject, createdAtSeconds, createdAtNanos)
               VALUES ('old', 'p1',
                 '{"contributionId":"old","poolId":"p1","contributorName":"anon","amount":100,"createdAt":{"seconds":1700000000123,"nanos":0}}',
                 1700000000123, 0)"#,
        )
        .await
        .unwrap();

    let cursor = store.latest_timestamp("p1").await.unwrap();
    assert_eq!(cursor.seconds, 1_700_000_000);
    assert_eq!(cursor.nanos, 123_000_000);

    let rows = store.contributions_for_pool("p1").await.unwrap();
    assert_eq!(rows[0].created_at.seconds, 1_700_000_000);
}

#[tokio::test]
async fn legacy_rows_are_rescaled_in_place_so_newer_rows_outsort_them() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pools.db");

    // Session one leaves a legacy row with epoch millis in the sort column.
    {
        let store = PoolStore::new(&path);
        store.contributions_count("p1").await.unwrap();
        store
            .execute_raw(
                r#"INSERT INTO contributions
                     (contributionId, poolId, storageObject, createdAtSeconds, createdAtNanos)
                   VALUES ('old', 'p1',
                     '{"contributionId":"old","poolId":"p1","contributorName":"anon","amount":100,"createdAt":{"seconds":1700000000123,"nanos":0}}',
                     1700000000123, 0)"#,
            )
            .await
            .unwrap();
    }

    // Reopen rescales the column, so a strictly newer second-granularity
    // row sorts first and owns the cursor.
    let store = PoolStore::new(&path);
    store
        .save_contribution(&sample_contribution("new", "p1", 1_800_000_000))
        .await
        .unwrap();

    let cursor = store.latest_timestamp("p1").await.unwrap();
    assert_eq!(cursor, ContributionTimestamp::new(1_800_000_000, 0));

    let rows = store.contributions_for_pool("p1").await.unwrap();
    let ids: Vec<&str> = rows.iter().map(|c| c.contribution_id.as_str()).collect();
    assert_eq!(ids, ["new", "old"]);
    assert_eq!(rows[1].created_at, ContributionTimestamp::new(1_700_000_000, 123_000_000));
}
