//! Lease reclamation sweep.
//!
//! Workers are anonymous browser tabs: they crash, lose connectivity, or
//! close without resetting. There is no heartbeat protocol; this time-based
//! sweep is the only recovery path, so the staleness threshold stays generous
//! enough not to steal from legitimately slow discovery pagination.

use std::time::Duration;

use sqlx::PgPool;
use tracing::{info, warn};

use matchscout_store::Result;

/// Clear every assignment older than `max_age` (or with no timestamp at
/// all), returning the affected accounts to the eligible pool. Returns how
/// many leases were released.
pub async fn release_stale_assignments(pool: &PgPool, max_age: Duration) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET assigned_lease = NULL,
            assigned_at = NULL
        WHERE assigned_lease IS NOT NULL
          AND (
              assigned_at IS NULL
              OR assigned_at <= now() - make_interval(secs => $1)
          )
        "#,
    )
    .bind(max_age.as_secs_f64())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Run the sweep on a fixed interval until the process exits.
pub fn spawn_reclaimer(
    pool: PgPool,
    interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match release_stale_assignments(&pool, max_age).await {
                Ok(0) => {}
                Ok(released) => info!(released, "Reclaimed stale assignments"),
                Err(e) => warn!(error = %e, "Reclaim sweep failed"),
            }
            tokio::time::sleep(interval).await;
        }
    })
}
