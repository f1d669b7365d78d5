//! Crawl progress counters.

use serde::Serialize;
use sqlx::PgPool;

use crate::error::Result;

#[derive(Debug, Clone, Copy, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub total_accounts: i64,
    pub hero_phase_complete_count: i64,
    pub discovery_phase_complete_count: i64,
}

pub async fn fetch_progress(pool: &PgPool) -> Result<Progress> {
    let progress = sqlx::query_as::<_, Progress>(
        r#"
        SELECT
            COUNT(*)                                 AS total_accounts,
            COUNT(*) FILTER (WHERE hero_done)        AS hero_phase_complete_count,
            COUNT(*) FILTER (WHERE discover_done)    AS discovery_phase_complete_count
        FROM accounts
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(progress)
}
