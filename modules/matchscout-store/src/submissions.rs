//! Submission application: validates worker results and applies them in one
//! transaction, so a rejected submission leaves no partial state behind.
//!
//! Both shapes are idempotent. The first submit clears the lease; a replayed
//! duplicate finds the account unassigned and applies the same writes again
//! to the same effect.

use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::stats;

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

/// One per-hero entry of a hero submission. `matches`/`wins` are the
/// authoritative upstream totals, not deltas.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroItem {
    pub hero_id: i32,
    #[serde(alias = "games")]
    pub matches: i32,
    #[serde(default)]
    pub wins: i32,
}

/// A discovered account reference. Workers send either bare ids or
/// `{id, count}` objects, where `count` is how often the account appeared in
/// the scanned matches.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DiscoveredRef {
    Id(i64),
    Counted {
        #[serde(alias = "accountId")]
        id: i64,
        #[serde(default = "default_seen_count", alias = "seenCount")]
        count: i32,
    },
}

fn default_seen_count() -> i32 {
    1
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeroOutcome {
    pub applied: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryOutcome {
    /// Distinct child ids written to the frontier (created or re-seen).
    pub reported: usize,
}

// ---------------------------------------------------------------------------
// Hero submission
// ---------------------------------------------------------------------------

/// Apply a hero-stats submission: upsert each entry, maintain the
/// top-performer cache, then mark the hero phase complete and release the
/// lease.
pub async fn submit_hero_stats(
    pool: &PgPool,
    account_id: i64,
    lease: Option<Uuid>,
    items: &[HeroItem],
    cache_cap: i64,
) -> Result<HeroOutcome> {
    let mut tx = pool.begin().await?;
    verify_lease(&mut tx, account_id, lease).await?;

    let mut outcome = HeroOutcome::default();
    // Valid entries, in hero order so concurrent submissions take cache row
    // locks in the same sequence.
    let mut valid: Vec<&HeroItem> = Vec::with_capacity(items.len());
    for item in items {
        if item.hero_id <= 0 || item.matches < 0 || item.wins < 0 || item.wins > item.matches {
            warn!(
                account_id,
                hero_id = item.hero_id,
                matches = item.matches,
                wins = item.wins,
                "Skipping invalid hero entry"
            );
            outcome.skipped += 1;
            continue;
        }
        valid.push(item);
    }
    valid.sort_by_key(|item| item.hero_id);

    for item in valid {
        // Monotonic replace: a delayed replay of an older payload must not
        // regress the stored totals.
        sqlx::query(
            r#"
            INSERT INTO hero_stats (account_id, hero_id, matches, wins)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (account_id, hero_id) DO UPDATE SET
                matches = excluded.matches,
                wins = excluded.wins
            WHERE excluded.matches > hero_stats.matches
            "#,
        )
        .bind(account_id)
        .bind(item.hero_id)
        .bind(item.matches)
        .bind(item.wins)
        .execute(&mut *tx)
        .await?;

        // Read back what the guard actually kept and push that through the
        // cache, so cache and stats can never disagree.
        let (matches, wins) = sqlx::query_as::<_, (i32, i32)>(
            r#"
            SELECT matches, wins
            FROM hero_stats
            WHERE account_id = $1 AND hero_id = $2
            "#,
        )
        .bind(account_id)
        .bind(item.hero_id)
        .fetch_one(&mut *tx)
        .await?;

        stats::raise_cache_row(&mut tx, item.hero_id, account_id, matches, wins).await?;
        stats::trim_cache(&mut tx, item.hero_id, cache_cap).await?;
        outcome.applied += 1;
    }

    sqlx::query(
        r#"
        UPDATE accounts
        SET hero_done = TRUE,
            hero_refreshed_at = now(),
            assigned_lease = NULL,
            assigned_at = NULL
        WHERE account_id = $1
        "#,
    )
    .bind(account_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Discovery submission
// ---------------------------------------------------------------------------

/// Apply a discovery submission: grow the frontier with every reported id,
/// advance the watermark, and mark the discovery phase complete.
///
/// `partial` is the staged first half of a compound refresh: results are
/// applied but the lease stays held for the hero half that follows.
#[allow(clippy::too_many_arguments)]
pub async fn submit_discovery(
    pool: &PgPool,
    account_id: i64,
    lease: Option<Uuid>,
    discovered: &[DiscoveredRef],
    highest_match_id: Option<i64>,
    next_depth: Option<i32>,
    partial: bool,
) -> Result<DiscoveryOutcome> {
    let mut tx = pool.begin().await?;
    let parent_depth = verify_lease(&mut tx, account_id, lease).await?;

    let child_depth = next_depth.unwrap_or(parent_depth.saturating_add(1));
    let children = normalize_discovered(discovered, account_id);

    if !children.is_empty() {
        let (ids, counts): (Vec<i64>, Vec<i32>) = children.iter().copied().unzip();
        // New accounts start with both phase flags false. Re-seen accounts
        // keep the smaller depth and accumulate popularity while their own
        // discovery is still outstanding.
        sqlx::query(
            r#"
            INSERT INTO accounts (account_id, depth, seen_count)
            SELECT child.id, $1, child.count
            FROM UNNEST($2::bigint[], $3::int[]) AS child(id, count)
            ORDER BY child.id
            ON CONFLICT (account_id) DO UPDATE SET
                depth = LEAST(accounts.depth, excluded.depth),
                seen_count = CASE
                    WHEN NOT accounts.discover_done
                        THEN accounts.seen_count + excluded.seen_count
                    ELSE accounts.seen_count
                END
            WHERE NOT accounts.discover_done
               OR excluded.depth < accounts.depth
            "#,
        )
        .bind(child_depth)
        .bind(&ids)
        .bind(&counts)
        .execute(&mut *tx)
        .await?;
    }

    if let Some(watermark) = highest_match_id {
        sqlx::query(
            r#"
            UPDATE accounts
            SET highest_match_id = GREATEST(highest_match_id, $2)
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .bind(watermark)
        .execute(&mut *tx)
        .await?;
    }

    if partial {
        // Staged half of a compound refresh: the discovery work is done but
        // the lease stays held for the hero half.
        sqlx::query("UPDATE accounts SET discover_done = TRUE WHERE account_id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
    } else {
        sqlx::query(
            r#"
            UPDATE accounts
            SET discover_done = TRUE,
                assigned_lease = NULL,
                assigned_at = NULL
            WHERE account_id = $1
            "#,
        )
        .bind(account_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(DiscoveryOutcome {
        reported: children.len(),
    })
}

// ---------------------------------------------------------------------------
// Internal
// ---------------------------------------------------------------------------

/// Lock the account row and check the caller's lease against the current
/// assignment. Returns the account depth. An unassigned account accepts any
/// caller so replays of an already-completed submission stay idempotent.
async fn verify_lease(
    conn: &mut PgConnection,
    account_id: i64,
    lease: Option<Uuid>,
) -> Result<i32> {
    let row = sqlx::query_as::<_, (i32, Option<Uuid>)>(
        r#"
        SELECT depth, assigned_lease
        FROM accounts
        WHERE account_id = $1
        FOR UPDATE
        "#,
    )
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((depth, current_lease)) = row else {
        return Err(StoreError::AccountNotFound(account_id));
    };
    if let Some(current) = current_lease {
        if lease != Some(current) {
            return Err(StoreError::LeaseConflict(account_id));
        }
    }
    Ok(depth)
}

/// Fold the raw discovered list into distinct `(id, count)` pairs, dropping
/// the submitting account itself, non-positive ids, and non-positive counts.
/// Sorted by id so concurrent submissions always take row locks in the same
/// order and cannot deadlock each other.
fn normalize_discovered(discovered: &[DiscoveredRef], parent_id: i64) -> Vec<(i64, i32)> {
    let mut counts: std::collections::BTreeMap<i64, i32> = std::collections::BTreeMap::new();

    for entry in discovered {
        let (id, count) = match *entry {
            DiscoveredRef::Id(id) => (id, 1),
            DiscoveredRef::Counted { id, count } => (id, count),
        };
        if id <= 0 || id == parent_id || count <= 0 {
            continue;
        }
        let total = counts.entry(id).or_insert(0);
        *total = total.saturating_add(count);
    }

    counts.into_iter().collect()
}
