//! HTTP surface: interactive harvest submission over SSE, liveness probe.
//!
//! `POST /api/harvests` validates the credential fields, admits the run
//! through the bounded queue, and answers with a one-way event stream. The
//! keep-alive heartbeat runs independently of harvest events, and dropping
//! the stream cancels the run cooperatively.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::admission::{Admission, AdmissionQueue};
use crate::cancel::CancelSignal;
use crate::error::HarvestError;
use crate::harvest::Harvester;
use crate::progress::{HarvestEvent, LiveProgressSink};
use crate::types::Credential;

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub harvester: Arc<Harvester>,
    pub admissions: Arc<AdmissionQueue>,
}

/// Build the axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/harvests", post(submit_harvest))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct HarvestRequest {
    pub email: String,
    pub password: String,
}

/// Capacity of the per-request event channel.
const EVENT_BUFFER: usize = 256;

async fn submit_harvest(
    State(state): State<AppState>,
    Json(request): Json<HarvestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = request.email.trim().to_string();
    if email.is_empty() {
        return Err(ApiError::validation("email must not be empty"));
    }
    if request.password.trim().is_empty() {
        return Err(ApiError::validation("password must not be empty"));
    }

    // Interactive callers are identified by their portal login.
    let owner_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, email.as_bytes());
    let credential = Credential {
        username: email,
        password: request.password,
    };

    let (tx, rx) = broadcast::channel(EVENT_BUFFER);
    let cancel = CancelSignal::new();

    let sink = LiveProgressSink::new(tx.clone());
    let harvester = state.harvester.clone();
    let run_cancel = cancel.clone();
    let task = async move {
        match harvester
            .harvest(owner_id, &credential, &sink, &run_cancel)
            .await
        {
            Ok(metrics) => sink.send(HarvestEvent::Done {
                total: metrics.imported,
            }),
            Err(HarvestError::Cancelled) => {
                // The caller is gone; nothing left to tell them.
            }
            Err(e) => sink.send(HarvestEvent::Error {
                message: e.to_string(),
            }),
        }
    };

    if let Admission::Queued(position) = state.admissions.submit(cancel.clone(), task) {
        let _ = tx.send(HarvestEvent::Queued { position });
    }

    // The guard rides inside the stream: dropping the response cancels the
    // run (or marks a still-queued entry as abandoned).
    let guard = cancel.drop_guard();
    let stream = BroadcastStream::new(rx).filter_map(move |item| {
        let _hold = &guard;
        match item {
            Ok(event) => Some(sse_event(&event)),
            Err(BroadcastStreamRecvError::Lagged(_)) => {
                Some(Ok(Event::default().event("lagged").data("{}")))
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &HarvestEvent) -> Result<Event, Infallible> {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Ok(Event::default().event(event.name()).data(data))
}

/// Client error carrying validation detail.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn validation(message: &str) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
