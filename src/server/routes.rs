//! HTTP route handlers for the reference message store.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::channel::mpsc;
use serde::Deserialize;

use crate::conversation::{Message, Role, SendRequest, StreamRecord};

use super::state::{AppState, DEFAULT_PAGE_LIMIT, draft_reply};

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/chat/messages", get(history))
        .route("/api/chat/send", post(send))
        .route("/api/chat/clear", post(clear))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "postpilot-store",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Reject requests that carry no bearer credential.
fn require_bearer(headers: &HeaderMap) -> Result<(), (StatusCode, String)> {
    let has_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| !token.trim().is_empty());
    if has_token {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "missing bearer token".to_string()))
    }
}

/// History page query.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Return messages strictly older than this id.
    #[serde(alias = "start")]
    pub before: Option<String>,
    /// Maximum number of messages.
    pub limit: Option<usize>,
}

/// Return one history page, oldest first.
async fn history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, (StatusCode, String)> {
    require_bearer(&headers)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, state.max_page_limit);
    let page = state.page(query.before.as_deref(), limit).await;
    tracing::debug!("Serving history page of {} (before {:?})", page.len(), query.before);
    Ok(Json(page))
}

/// Store the submission and stream back NDJSON records.
async fn send(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> Result<Response, (StatusCode, String)> {
    require_bearer(&headers)?;

    let (tx, rx) = mpsc::unbounded::<Result<String, Infallible>>();
    tokio::spawn(async move {
        if let Err(err) = stream_reply(&state, request, &tx).await {
            tracing::warn!("Reply stream ended early: {err}");
        }
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(rx),
    )
        .into_response())
}

type LineSender = mpsc::UnboundedSender<Result<String, Infallible>>;

async fn emit(tx: &LineSender, record: &StreamRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tx.unbounded_send(Ok(record.to_line()?))?;
    tokio::task::yield_now().await;
    Ok(())
}

/// Produce the records for one submission: image, text, then the agent's draft.
async fn stream_reply(
    state: &AppState,
    request: SendRequest,
    tx: &LineSender,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut inputs = 0;
    let image = request.image_uri.filter(|uri| !uri.is_empty());

    if let Some(uri) = &image {
        emit(tx, &StreamRecord::Status("Processing input...".to_string())).await?;
        let message = state.push_image(Role::User, uri).await;
        emit(tx, &StreamRecord::Message(message)).await?;
        inputs += 1;
    }

    if !request.text.trim().is_empty() {
        let message = state.push_text(Role::User, &request.text).await;
        emit(tx, &StreamRecord::Message(message)).await?;
        inputs += 1;
    }

    if inputs == 0 {
        return Ok(());
    }

    emit(tx, &StreamRecord::Status("Drafting\u{2026}".to_string())).await?;
    let reply = state
        .push_text(Role::Agent, &draft_reply(&request.text, image.is_some()))
        .await;
    emit(tx, &StreamRecord::Message(reply)).await?;
    Ok(())
}

/// Delete the whole conversation.
async fn clear(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<StatusCode, (StatusCode, String)> {
    require_bearer(&headers)?;
    state.clear().await;
    Ok(StatusCode::OK)
}
