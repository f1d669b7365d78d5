//! Account frontier operations: creation, seeding, and task resets.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub account_id: i64,
    pub depth: i32,
    pub hero_done: bool,
    pub discover_done: bool,
    pub assigned_lease: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub hero_refreshed_at: Option<DateTime<Utc>>,
    pub highest_match_id: Option<i64>,
    pub seen_count: i32,
}

/// Which assignment a reset applies to. `Any` clears the lease without
/// touching phase flags (a worker backing out of an unknown task type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Hero,
    Discovery,
    Any,
}

impl ResetKind {
    /// Parse the wire task-type string; absent or unrecognized types fall
    /// back to a plain lease clear.
    pub fn from_task_type(task_type: Option<&str>) -> Self {
        match task_type {
            Some("fetch_hero_stats") => ResetKind::Hero,
            Some("discover_matches") => ResetKind::Discovery,
            _ => ResetKind::Any,
        }
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Insert a newly discovered account. Returns `true` when the row was
/// created, `false` when it already existed. Safe under concurrent discovery
/// submissions racing to insert the same id.
pub async fn create_if_absent(pool: &PgPool, account_id: i64, depth: i32) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO accounts (account_id, depth)
        VALUES ($1, $2)
        ON CONFLICT (account_id) DO NOTHING
        "#,
    )
    .bind(account_id)
    .bind(depth)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Seed a contiguous id range at depth 0. Existing rows are left untouched.
pub async fn seed_range(pool: &PgPool, start: i64, end: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO accounts (account_id, depth)
        SELECT gs, 0
        FROM generate_series($1::bigint, $2::bigint) AS gs
        ON CONFLICT (account_id) DO NOTHING
        "#,
    )
    .bind(start)
    .bind(end)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn fetch(pool: &PgPool, account_id: i64) -> Result<Option<AccountRow>> {
    let row = sqlx::query_as::<_, AccountRow>(
        r#"
        SELECT account_id, depth, hero_done, discover_done,
               assigned_lease, assigned_at, hero_refreshed_at,
               highest_match_id, seen_count
        FROM accounts
        WHERE account_id = $1
        "#,
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Release a task so it can be reassigned.
///
/// Hero resets also discard the account's `hero_stats` rows so the retry
/// starts from a clean slate. The lease must match while the assignment
/// stands; once the lease is gone the reset degrades to an idempotent no-op.
pub async fn reset_task(
    pool: &PgPool,
    account_id: i64,
    kind: ResetKind,
    lease: Option<Uuid>,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, (Option<Uuid>,)>(
        r#"
        SELECT assigned_lease
        FROM accounts
        WHERE account_id = $1
        FOR UPDATE
        "#,
    )
    .bind(account_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((current_lease,)) = row else {
        return Err(StoreError::AccountNotFound(account_id));
    };
    if let Some(current) = current_lease {
        if lease != Some(current) {
            return Err(StoreError::LeaseConflict(account_id));
        }
    }

    match kind {
        ResetKind::Hero => {
            sqlx::query("DELETE FROM hero_stats WHERE account_id = $1")
                .bind(account_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                r#"
                UPDATE accounts
                SET hero_done = FALSE,
                    hero_refreshed_at = NULL,
                    assigned_lease = NULL,
                    assigned_at = NULL
                WHERE account_id = $1
                "#,
            )
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        }
        ResetKind::Discovery => {
            sqlx::query(
                r#"
                UPDATE accounts
                SET discover_done = FALSE,
                    assigned_lease = NULL,
                    assigned_at = NULL
                WHERE account_id = $1
                "#,
            )
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        }
        ResetKind::Any => {
            sqlx::query(
                r#"
                UPDATE accounts
                SET assigned_lease = NULL,
                    assigned_at = NULL
                WHERE account_id = $1
                "#,
            )
            .bind(account_id)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(())
}
