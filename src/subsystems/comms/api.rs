//! Axum handlers for the chat API.
//!
//! Each handler receives [`ApiState`] via [`axum::extract::State`] and
//! returns an axum [`Response`]. Errors are `{"error": code, "message": ...}`.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::AppError;
use crate::subsystems::agents::ChatRequest;
use crate::subsystems::memory::{ConversationTurn, TurnRole};

use super::ApiState;

// ── Request / response types ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct ChatBody {
    user_id: String,
    message: String,
    #[serde(default)]
    persona_name: Option<String>,
}

#[derive(Serialize)]
struct TurnView {
    role: TurnRole,
    message: String,
    timestamp: String,
}

impl From<ConversationTurn> for TurnView {
    fn from(turn: ConversationTurn) -> Self {
        Self { role: turn.role, message: turn.message, timestamp: turn.timestamp }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Build a JSON error response body.
fn json_error(code: &str, msg: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(json!({ "error": code, "message": format!("{msg}") }))
}

fn error_response(e: AppError) -> Response {
    let (status, code) = match &e {
        AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        AppError::UserNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        AppError::Llm(_) => (StatusCode::BAD_GATEWAY, "llm"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    if status.is_server_error() {
        warn!(error = %e, "request failed");
    }
    (status, json_error(code, e)).into_response()
}

/// User ids are stored trimmed, so path segments are looked up the same way.
fn path_user_id(raw: &str) -> String {
    raw.trim().to_string()
}

async fn require_user(state: &ApiState, user_id: &str) -> Result<(), AppError> {
    if state.pipeline.memory().user_exists(user_id).await? {
        Ok(())
    } else {
        Err(AppError::UserNotFound(user_id.to_string()))
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /
pub(super) async fn health(State(state): State<ApiState>) -> Response {
    Json(json!({
        "status": "online",
        "service": &*state.service,
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

/// POST /chat
pub(super) async fn chat(
    State(state): State<ApiState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return (StatusCode::BAD_REQUEST, json_error("bad_request", rejection.body_text()))
                .into_response();
        }
    };
    let request = ChatRequest {
        user_id: body.user_id,
        message: body.message,
        persona_name: body.persona_name,
    };
    match state.pipeline.run(request).await {
        Ok(out) => Json(json!({
            "reply": out.reply,
            "persona_name": out.persona_name,
            "user_id": out.user_id,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// GET /chat_history/{user_id}
pub(super) async fn chat_history(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Response {
    let user_id = path_user_id(&user_id);
    let result = async {
        require_user(&state, &user_id).await?;
        let memory = state.pipeline.memory();
        let personas = memory.persona_names(&user_id).await?;
        let threads = memory.threads_by_persona(&user_id).await?;
        Ok::<_, AppError>((personas, threads))
    }
    .await;

    match result {
        Ok((personas, threads)) => {
            let history: BTreeMap<String, Vec<TurnView>> = threads
                .into_iter()
                .map(|(persona, turns)| (persona, turns.into_iter().map(TurnView::from).collect()))
                .collect();
            Json(json!({ "user_id": user_id, "personas": personas, "history": history }))
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /personas/{user_id}
pub(super) async fn personas(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Response {
    let user_id = path_user_id(&user_id);
    let result = async {
        require_user(&state, &user_id).await?;
        state.pipeline.memory().persona_names(&user_id).await
    }
    .await;

    match result {
        Ok(personas) => Json(json!({ "user_id": user_id, "personas": personas })).into_response(),
        Err(e) => error_response(e),
    }
}

/// DELETE /user/{user_id}
pub(super) async fn delete_user(
    State(state): State<ApiState>,
    Path(user_id): Path<String>,
) -> Response {
    let user_id = path_user_id(&user_id);
    match state.pipeline.memory().delete_user(&user_id).await {
        Ok(true) => {
            info!(%user_id, "user deleted");
            Json(json!({ "message": format!("User {user_id} deleted successfully") })).into_response()
        }
        Ok(false) => error_response(AppError::UserNotFound(user_id)),
        Err(e) => error_response(e),
    }
}
