// SPDX-License-Identifier: MIT
//! HTTP surface: webhook intake, manual triggers, and read-only status routes.
//!
//! Endpoints:
//!   POST /webhook/github                        — signed GitHub deliveries
//!   POST /review                                — manual review trigger
//!   GET  /reviews/{owner}/{repo}/{pull_number}  — latest session + comments
//!   GET  /stats                                 — aggregate counters
//!   GET  /health                                — liveness + db check
//!
//! The webhook handler never blocks on the pipeline: it verifies, dedups,
//! enqueues, and answers immediately.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::review::ReviewJob;
use crate::webhook;
use crate::AppContext;

type ApiError = (StatusCode, Json<Value>);

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/webhook/github", post(github_webhook))
        .route("/review", post(trigger_review))
        .route(
            "/reviews/{owner}/{repo}/{pull_number}",
            get(get_latest_review),
        )
        .route("/stats", get(get_stats))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// ─── Webhook intake ───────────────────────────────────────────────────────────

async fn github_webhook(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    if let Err(e) =
        webhook::verify_signature(&ctx.config.github_webhook_secret, &body, signature)
    {
        warn!(err = %e, "rejected webhook delivery");
        return Err(api_error(StatusCode::UNAUTHORIZED, "invalid signature"));
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    // Every verified delivery is acknowledged as accepted; `reason` records
    // why no review was queued.
    if event_type != "pull_request" {
        return Ok(Json(json!({ "status": "accepted", "reason": "event type" })));
    }

    let event = webhook::parse_event(&body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    // Log every verified delivery, reviewed or not; a redelivered GUID is
    // answered without re-enqueueing.
    let delivery_id = headers
        .get("x-github-delivery")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(delivery) = &delivery_id {
        let fresh = ctx
            .storage
            .record_webhook_event(
                event_type,
                &event.action,
                delivery,
                event.owner(),
                event.repo(),
                event.number,
            )
            .await
            .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        if !fresh {
            info!(delivery_id = %delivery, "duplicate webhook delivery");
            return Ok(Json(json!({ "status": "accepted", "reason": "duplicate delivery" })));
        }
    }

    if !webhook::should_review(&event.action) {
        return Ok(Json(json!({ "status": "accepted", "reason": "action" })));
    }
    // Drafts wait until they are marked ready.
    if event.pull_request.draft && event.action != "ready_for_review" {
        return Ok(Json(json!({ "status": "accepted", "reason": "draft" })));
    }

    let installation_id = event
        .installation
        .as_ref()
        .map(|i| i.id)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "payload has no installation"))?;

    let job = ReviewJob {
        owner: event.owner().to_string(),
        repo: event.repo().to_string(),
        pull_number: event.number,
        installation_id,
        trigger_action: event.action.clone(),
        focus_area: None,
        delivery_id,
    };
    ctx.queue
        .enqueue(job)
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    info!(
        owner = %event.owner(),
        repo = %event.repo(),
        pull = event.number,
        action = %event.action,
        "review queued from webhook"
    );
    Ok(Json(json!({ "status": "accepted" })))
}

// ─── Manual trigger ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TriggerReviewRequest {
    owner: String,
    repo: String,
    pull_number: u64,
    focus_area: Option<String>,
}

async fn trigger_review(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<TriggerReviewRequest>,
) -> Result<Json<Value>, ApiError> {
    let installation_id = ctx
        .github
        .get_installation_id(&body.owner, &body.repo)
        .await
        .map_err(|e| api_error(StatusCode::BAD_GATEWAY, e.to_string()))?
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("app is not installed for {}/{}", body.owner, body.repo),
            )
        })?;

    let job = ReviewJob {
        owner: body.owner.clone(),
        repo: body.repo.clone(),
        pull_number: body.pull_number,
        installation_id,
        trigger_action: "manual_trigger".to_string(),
        focus_area: body.focus_area,
        delivery_id: None,
    };
    ctx.queue
        .enqueue(job)
        .map_err(|e| api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    info!(owner = %body.owner, repo = %body.repo, pull = body.pull_number,
          "manual review queued");
    Ok(Json(json!({ "status": "accepted" })))
}

// ─── Status routes ────────────────────────────────────────────────────────────

async fn get_latest_review(
    State(ctx): State<Arc<AppContext>>,
    Path((owner, repo, pull_number)): Path<(String, String, u64)>,
) -> Result<Json<Value>, ApiError> {
    let session = ctx
        .storage
        .latest_session_for_pr(&owner, &repo, pull_number)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no review for this pull request"))?;
    let comments = ctx
        .storage
        .comments_for_session(&session.id)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let comment_list: Vec<Value> = comments
        .iter()
        .map(|c| {
            json!({
                "file_path": c.file_path,
                "start_line": c.start_line,
                "end_line": c.end_line,
                "severity": c.severity,
                "category": c.category,
                "body": c.body,
                "posted_to_github": c.posted_to_github,
            })
        })
        .collect();

    Ok(Json(json!({
        "session": {
            "id": session.id,
            "owner": session.owner,
            "repo": session.repo,
            "pull_number": session.pull_number,
            "status": session.status.as_str(),
            "risk_level": session.risk_level,
            "approval_recommendation": session.approval_recommendation,
            "breaking_changes": session.breaking_changes,
            "ai_model_used": session.ai_model_used,
            "lines_added": session.lines_added,
            "lines_removed": session.lines_removed,
            "retry_count": session.retry_count,
            "error_message": session.error_message,
            "created_at": session.created_at.to_rfc3339(),
            "completed_at": session.completed_at.map(|t| t.to_rfc3339()),
        },
        "comments": comment_list,
    })))
}

async fn get_stats(State(ctx): State<Arc<AppContext>>) -> Result<Json<Value>, ApiError> {
    let stats = ctx
        .storage
        .stats()
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({
        "total_sessions": stats.total_sessions,
        "completed": stats.completed,
        "failed": stats.failed,
        "success_rate": stats.success_rate,
        "reviews_today": stats.reviews_today,
    })))
}

async fn health(State(ctx): State<Arc<AppContext>>) -> Result<Json<Value>, ApiError> {
    let db_ok = ctx.storage.test_connection().await;
    let status = if db_ok { "ok" } else { "degraded" };
    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": status,
        "database": db_ok,
        "version": env!("CARGO_PKG_VERSION"),
    });
    if db_ok {
        Ok(Json(body))
    } else {
        Err((code, Json(body)))
    }
}
