use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use matchscout_common::Config;
use matchscout_scheduler::{release_stale_assignments, spawn_reclaimer, Scheduler};
use matchscout_store::{accounts, schema, stats};

mod rest;

pub struct AppState {
    pub pool: PgPool,
    pub scheduler: Scheduler,
    pub top_performers_cap: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("matchscout=info".parse()?))
        .init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    // Idempotent bootstrap before the first request.
    schema::ensure_schema(&pool).await?;
    if let Some(seed_id) = config.seed_account_id {
        if accounts::create_if_absent(&pool, seed_id, 0).await? {
            info!(account_id = seed_id, "Seeded initial account");
        }
    }
    if stats::cache_is_empty(&pool).await? {
        stats::rebuild_cache(&pool, config.top_performers_cap).await?;
    }

    // Free leases abandoned before this restart, then keep sweeping.
    let max_age = Duration::from_secs(config.assignment_max_age_secs);
    release_stale_assignments(&pool, max_age).await?;
    spawn_reclaimer(
        pool.clone(),
        Duration::from_secs(config.reclaim_interval_secs),
        max_age,
    );

    let state = Arc::new(AppState {
        pool: pool.clone(),
        scheduler: Scheduler::new(pool, config.rerun_interval),
        top_performers_cap: config.top_performers_cap,
    });

    let app = Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Worker protocol
        .route("/task", post(rest::task))
        .route("/task/reset", post(rest::reset_task))
        .route("/submit", post(rest::submit::submit))
        // Progress and operator tooling
        .route("/progress", get(rest::progress))
        .route("/seed", get(rest::seed))
        // Leaderboards
        .route("/best", get(rest::best))
        .route("/leaderboards/overall", get(rest::overall_leaderboard))
        .route("/leaderboards/{hero_id}", get(rest::hero_leaderboard))
        .with_state(state)
        // CORS: workers run as browser pages on arbitrary origins
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Logging layer: method + path + status + latency only
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        );

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("matchscout coordinator starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
