pub mod submit;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use matchscout_store::accounts::ResetKind;
use matchscout_store::progress::fetch_progress;
use matchscout_store::{accounts, stats, StoreError};

use crate::AppState;

// --- Request structs ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    account_id: Option<i64>,
    #[serde(rename = "type")]
    task_type: Option<String>,
    lease: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct SeedQuery {
    start: Option<i64>,
    end: Option<i64>,
}

// --- Handlers ---

/// Hand the next unit of work to a polling worker. A null task is a valid
/// answer, not an error; the worker backs off and repolls.
pub async fn task(State(state): State<Arc<AppState>>) -> Response {
    match state.scheduler.next_task().await {
        Ok(task) => Json(serde_json::json!({ "task": task })).into_response(),
        Err(e) => {
            error!(error = %e, "Task assignment failed");
            internal_error()
        }
    }
}

/// Fire-and-forget release of an assignment after a worker-side failure.
pub async fn reset_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResetRequest>,
) -> Response {
    let Some(account_id) = body.account_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "accountId is required"})),
        )
            .into_response();
    };

    let kind = ResetKind::from_task_type(body.task_type.as_deref());
    match accounts::reset_task(&state.pool, account_id, kind, body.lease).await {
        Ok(()) => Json(serde_json::json!({"ok": true})).into_response(),
        Err(e) => store_error_response(e),
    }
}

pub async fn progress(State(state): State<Arc<AppState>>) -> Response {
    match fetch_progress(&state.pool).await {
        Ok(p) => Json(p).into_response(),
        Err(e) => {
            error!(error = %e, "Progress query failed");
            internal_error()
        }
    }
}

/// Insert a contiguous account id range at depth 0. Trusted-operator only:
/// the request must originate from the loopback interface.
pub async fn seed(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<SeedQuery>,
) -> Response {
    if !is_local_request(addr.ip(), &headers) {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "Forbidden"})),
        )
            .into_response();
    }
    let (Some(start), Some(end)) = (query.start, query.end) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Use /seed?start=1&end=100"})),
        )
            .into_response();
    };
    if end < start {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "End must be >= start"})),
        )
            .into_response();
    }

    match accounts::seed_range(&state.pool, start, end).await {
        Ok(_) => Json(serde_json::json!({"seeded": [start, end]})).into_response(),
        Err(e) => {
            error!(error = %e, "Seeding failed");
            internal_error()
        }
    }
}

/// Best cached performer per hero.
pub async fn best(State(state): State<Arc<AppState>>) -> Response {
    match stats::best_performers(&state.pool).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            error!(error = %e, "Best-performers query failed");
            internal_error()
        }
    }
}

/// Cached top-N leaderboard for one hero.
pub async fn hero_leaderboard(
    State(state): State<Arc<AppState>>,
    Path(hero_id): Path<i32>,
) -> Response {
    match stats::hero_leaderboard(&state.pool, hero_id).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            error!(error = %e, hero_id, "Hero leaderboard query failed");
            internal_error()
        }
    }
}

/// Accounts ranked by total matches across all heroes.
pub async fn overall_leaderboard(State(state): State<Arc<AppState>>) -> Response {
    match stats::overall_leaderboard(&state.pool, state.top_performers_cap).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            error!(error = %e, "Overall leaderboard query failed");
            internal_error()
        }
    }
}

// --- Helpers ---

pub(crate) fn store_error_response(e: StoreError) -> Response {
    match e {
        StoreError::AccountNotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("Unknown account: {id}")})),
        )
            .into_response(),
        StoreError::LeaseConflict(id) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": format!("Lease does not match the current assignment for account {id}")
            })),
        )
            .into_response(),
        StoreError::InvalidSubmission(msg) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": msg})),
        )
            .into_response(),
        e => {
            error!(error = %e, "Store operation failed");
            internal_error()
        }
    }
}

pub(crate) fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"error": "internal error"})),
    )
        .into_response()
}

/// True when the request originated on this machine, directly or through a
/// local reverse proxy that forwarded the loopback address.
fn is_local_request(remote: IpAddr, headers: &HeaderMap) -> bool {
    if remote.is_loopback() {
        return true;
    }
    let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    forwarded
        .split(',')
        .filter_map(|part| part.trim().parse::<IpAddr>().ok())
        .any(|ip| ip.is_loopback())
}
