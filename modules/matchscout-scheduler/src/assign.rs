//! Candidate selection and assignment.
//!
//! One transaction per poll: bump the persisted dispatch counter, pick the
//! globally active phase, claim the first eligible candidate under the
//! counter-alternated ordering, and return the task descriptor. Claiming is a
//! conditional `UPDATE .. RETURNING` over a `FOR UPDATE SKIP LOCKED`
//! candidate scan, so two concurrent polls can never be handed the same
//! account: a row claimed by one transaction is skipped by the other and the
//! scan moves on to the next candidate inside the same statement.

use sqlx::{PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use matchscout_common::Task;
use matchscout_store::Result;

// Hero queue: scanned from alternating ends of the id space.
const ASSIGN_HERO_ASC: &str = r#"
    WITH candidate AS (
        SELECT account_id
        FROM accounts
        WHERE NOT hero_done AND assigned_lease IS NULL
        ORDER BY account_id ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    UPDATE accounts a
    SET assigned_lease = $1, assigned_at = now()
    FROM candidate c
    WHERE a.account_id = c.account_id AND a.assigned_lease IS NULL
    RETURNING a.account_id, a.depth
"#;

const ASSIGN_HERO_DESC: &str = r#"
    WITH candidate AS (
        SELECT account_id
        FROM accounts
        WHERE NOT hero_done AND assigned_lease IS NULL
        ORDER BY account_id DESC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    UPDATE accounts a
    SET assigned_lease = $1, assigned_at = now()
    FROM candidate c
    WHERE a.account_id = c.account_id AND a.assigned_lease IS NULL
    RETURNING a.account_id, a.depth
"#;

// Discovery queue: depth first (the BFS frontier), then how often the
// account has been seen, then id under the alternated direction.
const ASSIGN_DISCOVERY_ASC: &str = r#"
    WITH candidate AS (
        SELECT account_id
        FROM accounts
        WHERE hero_done AND NOT discover_done AND assigned_lease IS NULL
        ORDER BY depth ASC, seen_count DESC, account_id ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    UPDATE accounts a
    SET assigned_lease = $1, assigned_at = now()
    FROM candidate c
    WHERE a.account_id = c.account_id AND a.assigned_lease IS NULL
    RETURNING a.account_id, a.depth, a.highest_match_id
"#;

const ASSIGN_DISCOVERY_DESC: &str = r#"
    WITH candidate AS (
        SELECT account_id
        FROM accounts
        WHERE hero_done AND NOT discover_done AND assigned_lease IS NULL
        ORDER BY depth ASC, seen_count DESC, account_id DESC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    UPDATE accounts a
    SET assigned_lease = $1, assigned_at = now()
    FROM candidate c
    WHERE a.account_id = c.account_id AND a.assigned_lease IS NULL
    RETURNING a.account_id, a.depth, a.highest_match_id
"#;

// Re-crawl: reopen the stalest completed account and hand out both phases
// under one lease.
const ASSIGN_REFRESH: &str = r#"
    WITH candidate AS (
        SELECT account_id
        FROM accounts
        WHERE hero_done AND assigned_lease IS NULL
        ORDER BY hero_refreshed_at ASC NULLS FIRST, account_id ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    UPDATE accounts a
    SET hero_done = FALSE,
        discover_done = FALSE,
        assigned_lease = $1,
        assigned_at = now()
    FROM candidate c
    WHERE a.account_id = c.account_id AND a.assigned_lease IS NULL
    RETURNING a.account_id, a.depth, a.highest_match_id
"#;

/// Hands out typed units of work to polling workers.
#[derive(Clone)]
pub struct Scheduler {
    pool: PgPool,
    rerun_interval: i64,
}

impl Scheduler {
    pub fn new(pool: PgPool, rerun_interval: i64) -> Self {
        Self {
            pool,
            rerun_interval,
        }
    }

    /// Select, claim, and describe the next task. `None` means no eligible
    /// work right now; workers back off and repoll.
    pub async fn next_task(&self) -> Result<Option<Task>> {
        let lease = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        let counter = bump_task_counter(&mut tx).await?;
        let ascending = scan_ascending(counter);

        let mut task = None;
        if rerun_due(counter, self.rerun_interval) {
            task = assign_refresh(&mut tx, lease).await?;
        }
        if task.is_none() {
            task = assign_hero(&mut tx, lease, ascending).await?;
        }
        // Discovery only once no account anywhere still owes hero stats;
        // pending-but-assigned accounts keep the system in hero phase.
        if task.is_none() && !hero_pending(&mut tx).await? {
            task = assign_discovery(&mut tx, lease, ascending).await?;
        }

        tx.commit().await?;

        if let Some(task) = &task {
            debug!(counter, account_id = task.account_id(), "Dispatched task");
        }
        Ok(task)
    }
}

/// Even counter values scan ascending, odd descending, so the queue is
/// consumed from both ends.
fn scan_ascending(counter: i64) -> bool {
    counter % 2 == 0
}

/// Every Nth dispatch may reopen a completed account to pick up upstream
/// changes.
fn rerun_due(counter: i64, rerun_interval: i64) -> bool {
    rerun_interval > 0 && counter % rerun_interval == 0
}

/// Increment the persisted dispatch counter and return its new value.
/// Restarts resume the sequence, preserving alternation parity.
async fn bump_task_counter(conn: &mut PgConnection) -> Result<i64> {
    let (counter,) = sqlx::query_as::<_, (i64,)>(
        r#"
        INSERT INTO scheduler_meta (key, value)
        VALUES ('task_counter', '1')
        ON CONFLICT (key) DO UPDATE
        SET value = ((scheduler_meta.value)::bigint + 1)::text
        RETURNING (value)::bigint
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    Ok(counter)
}

async fn hero_pending(conn: &mut PgConnection) -> Result<bool> {
    let (pending,) = sqlx::query_as::<_, (bool,)>(
        "SELECT EXISTS (SELECT 1 FROM accounts WHERE NOT hero_done)",
    )
    .fetch_one(&mut *conn)
    .await?;

    Ok(pending)
}

async fn assign_hero(
    conn: &mut PgConnection,
    lease: Uuid,
    ascending: bool,
) -> Result<Option<Task>> {
    let sql = if ascending {
        ASSIGN_HERO_ASC
    } else {
        ASSIGN_HERO_DESC
    };
    let row = sqlx::query_as::<_, (i64, i32)>(sql)
        .bind(lease)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(|(account_id, depth)| Task::FetchHeroStats {
        account_id,
        depth,
        lease,
    }))
}

async fn assign_discovery(
    conn: &mut PgConnection,
    lease: Uuid,
    ascending: bool,
) -> Result<Option<Task>> {
    let sql = if ascending {
        ASSIGN_DISCOVERY_ASC
    } else {
        ASSIGN_DISCOVERY_DESC
    };
    let row = sqlx::query_as::<_, (i64, i32, Option<i64>)>(sql)
        .bind(lease)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(
        row.map(|(account_id, depth, highest_match_id)| Task::DiscoverMatches {
            account_id,
            depth,
            highest_match_id,
            lease,
        }),
    )
}

async fn assign_refresh(conn: &mut PgConnection, lease: Uuid) -> Result<Option<Task>> {
    let row = sqlx::query_as::<_, (i64, i32, Option<i64>)>(ASSIGN_REFRESH)
        .bind(lease)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(
        row.map(|(account_id, depth, highest_match_id)| Task::RefreshAccount {
            account_id,
            depth,
            highest_match_id,
            lease,
        }),
    )
}
