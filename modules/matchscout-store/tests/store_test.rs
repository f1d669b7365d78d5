//! Integration tests for the store crate.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use sqlx::PgPool;
use uuid::Uuid;

use matchscout_store::accounts::{self, ResetKind};
use matchscout_store::submissions::{self, DiscoveredRef, HeroItem};
use matchscout_store::{progress, schema, stats, StoreError};

/// Tests share one database; serialize them so truncation in one cannot race
/// the assertions of another.
static DB_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Get a clean test database pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    schema::ensure_schema(&pool).await.ok()?;

    // Clean slate for each test
    sqlx::query("TRUNCATE accounts, hero_stats, hero_top100, scheduler_meta")
        .execute(&pool)
        .await
        .ok()?;

    Some(pool)
}

fn item(hero_id: i32, matches: i32, wins: i32) -> HeroItem {
    serde_json::from_value(serde_json::json!({
        "heroId": hero_id,
        "matches": matches,
        "wins": wins,
    }))
    .unwrap()
}

async fn account(pool: &PgPool, id: i64) -> accounts::AccountRow {
    accounts::fetch(pool, id).await.unwrap().expect("account exists")
}

async fn assign_lease(pool: &PgPool, id: i64) -> Uuid {
    let lease = Uuid::new_v4();
    sqlx::query("UPDATE accounts SET assigned_lease = $2, assigned_at = now() WHERE account_id = $1")
        .bind(id)
        .bind(lease)
        .execute(pool)
        .await
        .unwrap();
    lease
}

// =========================================================================
// Account frontier
// =========================================================================

#[tokio::test]
async fn create_if_absent_is_idempotent() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    assert!(accounts::create_if_absent(&pool, 100, 3).await.unwrap());
    assert!(!accounts::create_if_absent(&pool, 100, 7).await.unwrap());

    let row = account(&pool, 100).await;
    assert_eq!(row.depth, 3);
    assert!(!row.hero_done);
    assert!(!row.discover_done);
    assert!(row.assigned_lease.is_none());
    assert!(row.highest_match_id.is_none());
}

#[tokio::test]
async fn seed_range_inserts_at_depth_zero() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    assert_eq!(accounts::seed_range(&pool, 100, 104).await.unwrap(), 5);
    // Re-seeding the same range touches nothing.
    assert_eq!(accounts::seed_range(&pool, 100, 104).await.unwrap(), 0);

    let p = progress::fetch_progress(&pool).await.unwrap();
    assert_eq!(p.total_accounts, 5);
    assert_eq!(p.hero_phase_complete_count, 0);
    assert_eq!(p.discovery_phase_complete_count, 0);
    assert_eq!(account(&pool, 102).await.depth, 0);
}

// =========================================================================
// Hero submissions
// =========================================================================

#[tokio::test]
async fn hero_submission_completes_phase_and_releases_lease() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 0).await.unwrap();
    let lease = assign_lease(&pool, 100).await;

    let outcome = submissions::submit_hero_stats(
        &pool,
        100,
        Some(lease),
        &[item(14, 120, 66), item(22, 40, 18)],
        100,
    )
    .await
    .unwrap();
    assert_eq!(outcome.applied, 2);
    assert_eq!(outcome.skipped, 0);

    let row = account(&pool, 100).await;
    assert!(row.hero_done);
    assert!(row.hero_refreshed_at.is_some());
    assert!(row.assigned_lease.is_none());
    assert!(row.assigned_at.is_none());

    let board = stats::hero_leaderboard(&pool, 14).await.unwrap();
    assert_eq!(board.len(), 1);
    assert_eq!(board[0].account_id, 100);
    assert_eq!(board[0].matches, 120);
}

#[tokio::test]
async fn hero_submission_replay_is_idempotent() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 0).await.unwrap();
    let payload = [item(14, 120, 66)];

    submissions::submit_hero_stats(&pool, 100, None, &payload, 100)
        .await
        .unwrap();
    submissions::submit_hero_stats(&pool, 100, None, &payload, 100)
        .await
        .unwrap();

    let (matches, wins) = sqlx::query_as::<_, (i32, i32)>(
        "SELECT matches, wins FROM hero_stats WHERE account_id = 100 AND hero_id = 14",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!((matches, wins), (120, 66));

    let (cache_rows,) =
        sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM hero_top100 WHERE hero_id = 14")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(cache_rows, 1);
}

#[tokio::test]
async fn hero_submission_never_regresses_totals() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 0).await.unwrap();
    submissions::submit_hero_stats(&pool, 100, None, &[item(14, 120, 66)], 100)
        .await
        .unwrap();
    // A delayed replay of an older payload arrives after the newer one.
    submissions::submit_hero_stats(&pool, 100, None, &[item(14, 80, 40)], 100)
        .await
        .unwrap();

    let (matches, wins) = sqlx::query_as::<_, (i32, i32)>(
        "SELECT matches, wins FROM hero_stats WHERE account_id = 100 AND hero_id = 14",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!((matches, wins), (120, 66));

    let board = stats::hero_leaderboard(&pool, 14).await.unwrap();
    assert_eq!(board[0].matches, 120);
}

#[tokio::test]
async fn hero_submission_skips_invalid_entries_without_aborting() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 0).await.unwrap();
    let outcome = submissions::submit_hero_stats(
        &pool,
        100,
        None,
        &[item(14, 10, 40), item(22, 40, 18), item(-3, 5, 1)],
        100,
    )
    .await
    .unwrap();
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.skipped, 2);

    let (rows,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM hero_stats WHERE account_id = 100")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
    // The bad entries never block phase completion.
    assert!(account(&pool, 100).await.hero_done);
}

#[tokio::test]
async fn hero_submission_rejects_mismatched_lease() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 0).await.unwrap();
    assign_lease(&pool, 100).await;

    let err = submissions::submit_hero_stats(&pool, 100, Some(Uuid::new_v4()), &[item(14, 10, 5)], 100)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LeaseConflict(100)));

    // Nothing applied, assignment untouched.
    let row = account(&pool, 100).await;
    assert!(!row.hero_done);
    assert!(row.assigned_lease.is_some());
    let (rows,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM hero_stats")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[tokio::test]
async fn unknown_account_is_rejected() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    let err = submissions::submit_hero_stats(&pool, 999, None, &[item(14, 10, 5)], 100)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AccountNotFound(999)));
}

// =========================================================================
// Top-performer cache
// =========================================================================

#[tokio::test]
async fn cache_is_capped_and_keeps_the_best() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    for (id, matches) in [(100, 10), (101, 50), (102, 30), (103, 70), (104, 20)] {
        accounts::create_if_absent(&pool, id, 0).await.unwrap();
        submissions::submit_hero_stats(&pool, id, None, &[item(7, matches, matches / 2)], 3)
            .await
            .unwrap();
    }

    let board = stats::hero_leaderboard(&pool, 7).await.unwrap();
    assert_eq!(board.len(), 3);
    let ids: Vec<i64> = board.iter().map(|row| row.account_id).collect();
    assert_eq!(ids, vec![103, 101, 102]);
}

#[tokio::test]
async fn best_performers_returns_one_row_per_hero() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 0).await.unwrap();
    accounts::create_if_absent(&pool, 101, 0).await.unwrap();
    submissions::submit_hero_stats(&pool, 100, None, &[item(7, 40, 20), item(8, 10, 5)], 100)
        .await
        .unwrap();
    submissions::submit_hero_stats(&pool, 101, None, &[item(7, 90, 50)], 100)
        .await
        .unwrap();

    let best = stats::best_performers(&pool).await.unwrap();
    assert_eq!(best.len(), 2);
    assert_eq!(best[0].hero_id, 7);
    assert_eq!(best[0].account_id, 101);
    assert_eq!(best[1].hero_id, 8);
    assert_eq!(best[1].account_id, 100);
}

#[tokio::test]
async fn rebuild_repopulates_an_empty_cache() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 0).await.unwrap();
    submissions::submit_hero_stats(&pool, 100, None, &[item(7, 40, 20)], 100)
        .await
        .unwrap();
    sqlx::query("DELETE FROM hero_top100").execute(&pool).await.unwrap();

    assert!(stats::cache_is_empty(&pool).await.unwrap());
    stats::rebuild_cache(&pool, 100).await.unwrap();
    assert!(!stats::cache_is_empty(&pool).await.unwrap());

    let board = stats::hero_leaderboard(&pool, 7).await.unwrap();
    assert_eq!(board.len(), 1);
    assert_eq!(board[0].matches, 40);
}

// =========================================================================
// Discovery submissions
// =========================================================================

#[tokio::test]
async fn discovery_grows_the_frontier_one_level_deeper() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 2).await.unwrap();
    let lease = assign_lease(&pool, 100).await;

    let outcome = submissions::submit_discovery(
        &pool,
        100,
        Some(lease),
        &[DiscoveredRef::Id(200), DiscoveredRef::Id(201)],
        Some(7_700_000_001),
        None,
        false,
    )
    .await
    .unwrap();
    assert_eq!(outcome.reported, 2);

    let parent = account(&pool, 100).await;
    assert!(parent.discover_done);
    assert!(parent.assigned_lease.is_none());
    assert_eq!(parent.highest_match_id, Some(7_700_000_001));

    for id in [200, 201] {
        let child = account(&pool, id).await;
        assert_eq!(child.depth, 3);
        assert!(!child.hero_done);
        assert!(!child.discover_done);
    }
}

#[tokio::test]
async fn discovery_watermark_never_regresses() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 0).await.unwrap();
    submissions::submit_discovery(&pool, 100, None, &[], Some(500), None, false)
        .await
        .unwrap();
    submissions::submit_discovery(&pool, 100, None, &[], Some(300), None, false)
        .await
        .unwrap();

    assert_eq!(account(&pool, 100).await.highest_match_id, Some(500));
}

#[tokio::test]
async fn rediscovery_lowers_depth_and_accumulates_popularity() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 0).await.unwrap();
    accounts::create_if_absent(&pool, 300, 5).await.unwrap();

    submissions::submit_discovery(
        &pool,
        100,
        None,
        &[DiscoveredRef::Counted { id: 300, count: 4 }],
        None,
        None,
        false,
    )
    .await
    .unwrap();

    let row = account(&pool, 300).await;
    assert_eq!(row.depth, 1);
    assert_eq!(row.seen_count, 4);

    // Once the account's own discovery is done, re-sightings no longer count.
    submissions::submit_discovery(&pool, 300, None, &[], None, None, false)
        .await
        .unwrap();
    submissions::submit_discovery(
        &pool,
        100,
        None,
        &[DiscoveredRef::Counted { id: 300, count: 9 }],
        None,
        None,
        false,
    )
    .await
    .unwrap();
    assert_eq!(account(&pool, 300).await.seen_count, 4);
}

#[tokio::test]
async fn partial_discovery_keeps_the_lease_for_the_hero_half() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 0).await.unwrap();
    let lease = assign_lease(&pool, 100).await;

    submissions::submit_discovery(
        &pool,
        100,
        Some(lease),
        &[DiscoveredRef::Id(200)],
        Some(42),
        None,
        true,
    )
    .await
    .unwrap();

    let row = account(&pool, 100).await;
    assert!(row.discover_done);
    assert_eq!(row.assigned_lease, Some(lease));

    // The hero half completes the compound task and releases the lease.
    submissions::submit_hero_stats(&pool, 100, Some(lease), &[item(14, 10, 5)], 100)
        .await
        .unwrap();
    let row = account(&pool, 100).await;
    assert!(row.hero_done);
    assert!(row.assigned_lease.is_none());
}

// =========================================================================
// Resets
// =========================================================================

#[tokio::test]
async fn hero_reset_discards_partial_stats() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 0).await.unwrap();
    submissions::submit_hero_stats(&pool, 100, None, &[item(14, 10, 5)], 100)
        .await
        .unwrap();

    accounts::reset_task(&pool, 100, ResetKind::Hero, None)
        .await
        .unwrap();

    let row = account(&pool, 100).await;
    assert!(!row.hero_done);
    assert!(row.hero_refreshed_at.is_none());
    let (rows,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM hero_stats WHERE account_id = 100")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[tokio::test]
async fn reset_requires_the_lease_while_assigned() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::create_if_absent(&pool, 100, 0).await.unwrap();
    let lease = assign_lease(&pool, 100).await;

    let err = accounts::reset_task(&pool, 100, ResetKind::Discovery, Some(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LeaseConflict(100)));
    assert!(account(&pool, 100).await.assigned_lease.is_some());

    accounts::reset_task(&pool, 100, ResetKind::Discovery, Some(lease))
        .await
        .unwrap();
    assert!(account(&pool, 100).await.assigned_lease.is_none());

    let err = accounts::reset_task(&pool, 999, ResetKind::Any, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AccountNotFound(999)));
}

// =========================================================================
// Progress
// =========================================================================

#[tokio::test]
async fn progress_counts_phase_completion() {
    let _guard = DB_LOCK.lock().await;
    let Some(pool) = test_pool().await else {
        return;
    };

    accounts::seed_range(&pool, 100, 102).await.unwrap();
    submissions::submit_hero_stats(&pool, 100, None, &[item(14, 10, 5)], 100)
        .await
        .unwrap();
    submissions::submit_hero_stats(&pool, 101, None, &[], 100)
        .await
        .unwrap();
    submissions::submit_discovery(&pool, 100, None, &[], None, None, false)
        .await
        .unwrap();

    let p = progress::fetch_progress(&pool).await.unwrap();
    assert_eq!(p.total_accounts, 3);
    assert_eq!(p.hero_phase_complete_count, 2);
    assert_eq!(p.discovery_phase_complete_count, 1);
}
