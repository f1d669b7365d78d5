//! Top-performer cache maintenance and leaderboard reads.
//!
//! The cache (`hero_top100`) is the only table the leaderboard endpoints
//! read. It is maintained incrementally inside each hero submission and never
//! holds more than the configured cap per hero.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CachedPerformance {
    pub hero_id: i32,
    pub account_id: i64,
    pub matches: i32,
    pub wins: i32,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OverallPerformance {
    pub account_id: i64,
    pub matches: i64,
    pub wins: i64,
}

// ---------------------------------------------------------------------------
// Cache maintenance (called from the submission transaction)
// ---------------------------------------------------------------------------

/// Insert or update the cache row for (hero, account). Values come from the
/// already-upserted `hero_stats` row, so a replay writes the same numbers.
pub(crate) async fn raise_cache_row(
    conn: &mut PgConnection,
    hero_id: i32,
    account_id: i64,
    matches: i32,
    wins: i32,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO hero_top100 (hero_id, account_id, matches, wins)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (hero_id, account_id) DO UPDATE SET
            matches = excluded.matches,
            wins = excluded.wins
        "#,
    )
    .bind(hero_id)
    .bind(account_id)
    .bind(matches)
    .bind(wins)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Evict every row ranked beyond the cap for this hero.
pub(crate) async fn trim_cache(conn: &mut PgConnection, hero_id: i32, cap: i64) -> Result<()> {
    sqlx::query(
        r#"
        DELETE FROM hero_top100
        WHERE hero_id = $1
          AND account_id IN (
              SELECT account_id
              FROM hero_top100
              WHERE hero_id = $1
              ORDER BY matches DESC, wins DESC, account_id ASC
              OFFSET $2
          )
        "#,
    )
    .bind(hero_id)
    .bind(cap)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Full rebuild
// ---------------------------------------------------------------------------

pub async fn cache_is_empty(pool: &PgPool) -> Result<bool> {
    let row = sqlx::query_as::<_, (i32,)>("SELECT 1 FROM hero_top100 LIMIT 1")
        .fetch_optional(pool)
        .await?;
    Ok(row.is_none())
}

/// Rebuild the cache from scratch with a ranked scan of `hero_stats`. Used at
/// startup when the cache table is empty; submissions keep it current after
/// that.
pub async fn rebuild_cache(pool: &PgPool, cap: i64) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM hero_top100")
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO hero_top100 (hero_id, account_id, matches, wins)
        SELECT hero_id, account_id, matches, wins
        FROM (
            SELECT
                hero_id,
                account_id,
                matches,
                wins,
                ROW_NUMBER() OVER (
                    PARTITION BY hero_id
                    ORDER BY matches DESC, wins DESC, account_id ASC
                ) AS rn
            FROM hero_stats
        ) ranked
        WHERE ranked.rn <= $1
        "#,
    )
    .bind(cap)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Leaderboard reads
// ---------------------------------------------------------------------------

/// Full cached leaderboard for one hero, best first.
pub async fn hero_leaderboard(pool: &PgPool, hero_id: i32) -> Result<Vec<CachedPerformance>> {
    let rows = sqlx::query_as::<_, CachedPerformance>(
        r#"
        SELECT hero_id, account_id, matches, wins
        FROM hero_top100
        WHERE hero_id = $1
        ORDER BY matches DESC, wins DESC, account_id ASC
        "#,
    )
    .bind(hero_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// The single best cached performer per hero.
pub async fn best_performers(pool: &PgPool) -> Result<Vec<CachedPerformance>> {
    let rows = sqlx::query_as::<_, CachedPerformance>(
        r#"
        SELECT DISTINCT ON (hero_id) hero_id, account_id, matches, wins
        FROM hero_top100
        ORDER BY hero_id ASC, matches DESC, wins DESC, account_id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Accounts ranked by total matches across every hero. This one aggregates
/// `hero_stats` directly; it has no per-hero cache to lean on.
pub async fn overall_leaderboard(pool: &PgPool, limit: i64) -> Result<Vec<OverallPerformance>> {
    let rows = sqlx::query_as::<_, OverallPerformance>(
        r#"
        SELECT account_id, SUM(matches)::bigint AS matches, SUM(wins)::bigint AS wins
        FROM hero_stats
        GROUP BY account_id
        ORDER BY matches DESC, wins DESC, account_id ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
