//! Schema bootstrap. Idempotent, run once before the server starts serving.

use sqlx::PgPool;

use crate::error::Result;

/// Create every table the coordinator persists to.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            account_id        BIGINT       PRIMARY KEY,
            depth             INTEGER      NOT NULL DEFAULT 0,
            hero_done         BOOLEAN      NOT NULL DEFAULT FALSE,
            discover_done     BOOLEAN      NOT NULL DEFAULT FALSE,
            assigned_lease    UUID,
            assigned_at       TIMESTAMPTZ,
            hero_refreshed_at TIMESTAMPTZ,
            highest_match_id  BIGINT,
            seen_count        INTEGER      NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hero_stats (
            account_id BIGINT  NOT NULL,
            hero_id    INTEGER NOT NULL,
            matches    INTEGER NOT NULL,
            wins       INTEGER NOT NULL,
            PRIMARY KEY (account_id, hero_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hero_top100 (
            hero_id    INTEGER NOT NULL,
            account_id BIGINT  NOT NULL,
            matches    INTEGER NOT NULL,
            wins       INTEGER NOT NULL,
            PRIMARY KEY (hero_id, account_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scheduler_meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    ensure_indexes(pool).await
}

/// Partial indexes matching the scheduler's candidate scans, so queue
/// selection stays index-only as the frontier grows.
async fn ensure_indexes(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_accounts_hero_pending
            ON accounts (account_id)
            WHERE NOT hero_done
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_accounts_hero_queue
            ON accounts (account_id)
            WHERE NOT hero_done AND assigned_lease IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_accounts_discover_queue
            ON accounts (depth, seen_count DESC, account_id)
            WHERE hero_done AND NOT discover_done AND assigned_lease IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_accounts_assignment_state
            ON accounts (assigned_at)
            WHERE assigned_lease IS NOT NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_accounts_refresh_order
            ON accounts (hero_refreshed_at ASC NULLS FIRST, account_id)
            WHERE hero_done AND assigned_lease IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
