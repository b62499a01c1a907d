//! Comms subsystem — the axum HTTP channel.
//!
//! ## URL layout
//!
//! ```text
//! GET    /                        health / service banner
//! POST   /chat                    run the persona pipeline for one message
//! GET    /chat_history/{user_id}  every persona thread of a user
//! GET    /personas/{user_id}      persona names of a user
//! DELETE /user/{user_id}          remove a user with all its data
//! GET    /favicon.ico             → 204
//! ```
//!
//! `run()` drives the axum event loop; the shared [`CancellationToken`] is
//! wired to axum's graceful shutdown.

mod api;

use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::AppError;
use crate::subsystems::agents::PersonaPipeline;

// ── Shared request state ──────────────────────────────────────────────────────

/// Router state injected into every handler via [`axum::extract::State`].
///
/// Cheap to clone — all fields are reference-counted.
#[derive(Clone)]
pub struct ApiState {
    /// Service name reported by `GET /`.
    pub service: Arc<str>,
    pub pipeline: Arc<PersonaPipeline>,
}

impl ApiState {
    pub fn new(service: impl Into<Arc<str>>, pipeline: PersonaPipeline) -> Self {
        Self { service: service.into(), pipeline: Arc::new(pipeline) }
    }
}

// ── HttpChannel ───────────────────────────────────────────────────────────────

pub struct HttpChannel {
    bind_addr: String,
    state: ApiState,
}

impl HttpChannel {
    pub fn new(bind_addr: impl Into<String>, state: ApiState) -> Self {
        Self { bind_addr: bind_addr.into(), state }
    }

    /// Bind and serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), AppError> {
        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| AppError::Comms(format!("http bind failed on {}: {e}", self.bind_addr)))?;

        let local = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.bind_addr.clone());
        info!(bind_addr = %local, "http channel listening");

        axum::serve(listener, build_router(self.state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| AppError::Comms(format!("http server error: {e}")))?;

        info!("http channel shut down");
        Ok(())
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/",                        get(api::health))
        .route("/chat",                    post(api::chat))
        .route("/chat_history/{user_id}",  get(api::chat_history))
        .route("/personas/{user_id}",      get(api::personas))
        .route("/user/{user_id}",          delete(api::delete_user))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
