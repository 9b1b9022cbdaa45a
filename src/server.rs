//! HTTP job submission: each POST starts a job and streams its events back
//! as newline-delimited JSON.

use crate::events::JobEvent;
use crate::job::{ManualEvalRequest, ModelEvalRequest, PromptEvalRequest};
use crate::runner::Runner;
use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

pub fn router(runner: Arc<Runner>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/test", post(model_eval))
        .route("/api/test-prompt", post(prompt_eval))
        .route("/api/manual-eval", post(manual_eval))
        .with_state(runner)
}

/// Bind `addr` and serve until the process is stopped
pub async fn serve(runner: Arc<Runner>, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router(runner)).await.context("Server error")
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).context("Invalid request body")
}

async fn model_eval(State(runner): State<Arc<Runner>>, body: Bytes) -> Response {
    let job = parse_body::<ModelEvalRequest>(&body).and_then(ModelEvalRequest::into_job);
    stream_events(runner.spawn_job(job))
}

async fn prompt_eval(State(runner): State<Arc<Runner>>, body: Bytes) -> Response {
    let job = parse_body::<PromptEvalRequest>(&body).and_then(PromptEvalRequest::into_job);
    stream_events(runner.spawn_job(job))
}

async fn manual_eval(State(runner): State<Arc<Runner>>, body: Bytes) -> Response {
    let job = parse_body::<ManualEvalRequest>(&body).and_then(ManualEvalRequest::into_job);
    stream_events(runner.spawn_job(job))
}

fn stream_events(rx: mpsc::Receiver<JobEvent>) -> Response {
    let lines = ReceiverStream::new(rx).map(|event| event.to_ndjson().map(Bytes::from));
    (
        [
            (CONTENT_TYPE, "application/x-ndjson"),
            (CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(lines),
    )
        .into_response()
}
