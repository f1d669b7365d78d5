use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use matchscout_store::submissions::{self, DiscoveredRef, HeroItem};

use crate::rest::store_error_response;
use crate::AppState;

/// One body shape for both submission types, discriminated by `type`.
///
/// `partial: true` marks the staged discovery half of a compound refresh:
/// results are applied but the lease is kept for the hero half. `task: true`
/// asks for the next assignment in the same round trip.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(rename = "type")]
    kind: String,
    account_id: Option<i64>,
    #[serde(default, alias = "heroes")]
    items: Vec<HeroItem>,
    #[serde(default)]
    discovered: Vec<DiscoveredRef>,
    highest_match_id: Option<i64>,
    next_depth: Option<i32>,
    lease: Option<Uuid>,
    #[serde(default)]
    partial: bool,
    #[serde(default)]
    task: bool,
}

pub async fn submit(State(state): State<Arc<AppState>>, Json(body): Json<SubmitRequest>) -> Response {
    let Some(account_id) = body.account_id else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "accountId is required"})),
        )
            .into_response();
    };

    let applied = match body.kind.as_str() {
        "fetch_hero_stats" => submissions::submit_hero_stats(
            &state.pool,
            account_id,
            body.lease,
            &body.items,
            state.top_performers_cap,
        )
        .await
        .map(|_| ()),
        "discover_matches" => submissions::submit_discovery(
            &state.pool,
            account_id,
            body.lease,
            &body.discovered,
            body.highest_match_id,
            body.next_depth,
            body.partial,
        )
        .await
        .map(|_| ()),
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("Unknown submit type: {other}")})),
            )
                .into_response();
        }
    };

    if let Err(e) = applied {
        return store_error_response(e);
    }

    // The submission is committed; a follow-up assignment failure must not
    // turn the response into an error the worker would retry against.
    let mut payload = serde_json::json!({"ok": true});
    if body.task {
        let next = match state.scheduler.next_task().await {
            Ok(next) => next,
            Err(e) => {
                error!(error = %e, "Follow-up task assignment failed");
                None
            }
        };
        payload["task"] = serde_json::to_value(next).unwrap_or(serde_json::Value::Null);
    }
    Json(payload).into_response()
}
