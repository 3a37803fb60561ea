use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::DbHandle;
use crate::errors::GateError;
use crate::release::{
    NewRelease, NewStream, Release, ReleaseExecutor, ReleaseGate, ReleaseSnapshot, ReleaseState,
    ReleaseStore, SignoffOutcome,
};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub gate: ReleaseGate,
    pub executor: Arc<dyn ReleaseExecutor>,
    /// Base URL for sign links, without a trailing slash.
    pub public_url: String,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payload types ──────────────────────────────────

#[derive(Deserialize)]
pub struct PushReleaseRequest {
    pub build_id: i64,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// A release as presented to dashboards.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseStatus {
    #[serde(flatten)]
    pub release: Release,
    pub stream: String,
    pub signoff_count: i64,
    pub signoff_remaining: i64,
    pub status: ReleaseState,
    pub state_code: u8,
    pub message: String,
}

impl ReleaseStatus {
    pub fn from_snapshot(gate: &ReleaseGate, snapshot: ReleaseSnapshot) -> Self {
        let status = gate.derive_state(&snapshot);
        Self {
            signoff_count: snapshot.signoff_count(),
            signoff_remaining: snapshot.signoff_remaining(),
            state_code: status.code(),
            message: status.message(),
            status,
            stream: snapshot.stream.name,
            release: snapshot.release,
        }
    }
}

#[derive(Serialize)]
pub struct SignLink {
    pub signature: String,
    pub url: String,
}

#[derive(Serialize)]
pub struct PushReleaseResponse {
    pub release: ReleaseStatus,
    pub dispatched: bool,
    pub sign_links: Vec<SignLink>,
}

#[derive(Serialize)]
pub struct SignResponse {
    pub signature: String,
    pub release_id: i64,
    pub newly_signed: bool,
    pub dispatched: bool,
    pub status: ReleaseState,
    pub message: String,
}

impl From<SignoffOutcome> for SignResponse {
    fn from(outcome: SignoffOutcome) -> Self {
        Self {
            signature: outcome.signoff.signature,
            release_id: outcome.signoff.release_id,
            newly_signed: outcome.newly_signed,
            dispatched: outcome.dispatched,
            message: outcome.state.message(),
            status: outcome.state,
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// Details are logged, never sent to the caller.
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<GateError>() {
            Some(gate) if gate.is_not_found() => ApiError::NotFound(gate.to_string()),
            Some(GateError::InvalidStream(msg)) => ApiError::BadRequest(msg.clone()),
            _ => {
                tracing::error!("request failed: {:#}", err);
                ApiError::Internal
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/sign/{token}", get(sign_page))
        .route("/api/rap/{token}", get(sign_api))
        .route("/api/streams", get(list_streams).post(create_stream))
        .route("/api/streams/{id}", axum::routing::put(update_stream).delete(delete_stream))
        .route(
            "/api/streams/{id}/releases",
            get(list_releases).post(push_release),
        )
        .route(
            "/api/releases/{id}",
            get(get_release).delete(delete_release),
        )
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn record_signoff(state: &SharedState, token: String) -> Result<SignoffOutcome, ApiError> {
    let gate = state.gate.clone();
    let executor = state.executor.clone();
    let outcome = state
        .db
        .call(move |db| Ok(gate.record_signoff(db, executor.as_ref(), &token)?))
        .await?;
    Ok(outcome)
}

/// Landing page for the capability link sent to each signer.
async fn sign_page(
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = record_signoff(&state, token).await?;
    let heading = if outcome.newly_signed {
        "Thank you, your sign-off has been recorded."
    } else {
        "This sign-off was already recorded."
    };
    Ok(Html(format!(
        "<!doctype html><html><head><title>Release sign-off</title></head><body>\
         <h1>{}</h1><p>Signed by {} for release #{}.</p><p>Status: {}</p></body></html>",
        heading,
        escape_html(&outcome.signoff.signature),
        outcome.signoff.release_id,
        escape_html(&outcome.state.message()),
    )))
}

async fn sign_api(
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = record_signoff(&state, token).await?;
    Ok(Json(SignResponse::from(outcome)))
}

async fn create_stream(
    State(state): State<SharedState>,
    Json(req): Json<NewStream>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = state.gate.clone();
    let stream = state
        .db
        .call(move |db| Ok(gate.create_stream(db, &req)?))
        .await?;
    Ok((StatusCode::CREATED, Json(stream)))
}

async fn list_streams(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let streams = state.db.call(|db| db.list_streams()).await?;
    Ok(Json(streams))
}

async fn update_stream(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<NewStream>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = state.gate.clone();
    let stream = state
        .db
        .call(move |db| Ok(gate.update_stream(db, id, &req)?))
        .await?;
    Ok(Json(stream))
}

async fn delete_stream(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = state.gate.clone();
    state
        .db
        .call(move |db| Ok(gate.delete_stream(db, id)?))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn push_release(
    State(state): State<SharedState>,
    Path(stream_id): Path<i64>,
    Json(req): Json<PushReleaseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = state.gate.clone();
    let executor = state.executor.clone();
    let new = NewRelease {
        stream_id,
        build_id: req.build_id,
        scheduled_at: req.scheduled_at,
    };
    let (pushed, snapshot) = state
        .db
        .call(move |db| {
            let pushed = gate.push_release(db, executor.as_ref(), &new)?;
            let snapshot = gate.load(db, pushed.release.id)?;
            Ok((pushed, snapshot))
        })
        .await?;

    for signoff in &pushed.signoffs {
        tracing::info!(
            release_id = signoff.release_id,
            signature = %signoff.signature,
            url = %signoff.sign_url(&state.public_url),
            "sign-off requested"
        );
    }

    Ok((
        StatusCode::CREATED,
        Json(PushReleaseResponse {
            sign_links: pushed
                .signoffs
                .iter()
                .map(|s| SignLink {
                    signature: s.signature.clone(),
                    url: s.sign_url(&state.public_url),
                })
                .collect(),
            dispatched: pushed.dispatched,
            release: ReleaseStatus::from_snapshot(&state.gate, snapshot),
        }),
    ))
}

async fn list_releases(
    State(state): State<SharedState>,
    Path(stream_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(5).clamp(1, 100);
    let gate = state.gate.clone();
    let statuses = state
        .db
        .call(move |db| {
            if db.get_stream(stream_id)?.is_none() {
                return Err(GateError::StreamNotFound { id: stream_id }.into());
            }
            let mut statuses = Vec::new();
            for release in db.list_stream_releases(stream_id, limit)? {
                let snapshot = gate.load(db, release.id)?;
                statuses.push(ReleaseStatus::from_snapshot(&gate, snapshot));
            }
            Ok(statuses)
        })
        .await?;
    Ok(Json(statuses))
}

async fn get_release(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = state.gate.clone();
    let status = state
        .db
        .call(move |db| {
            let snapshot = gate.load(db, id)?;
            Ok(ReleaseStatus::from_snapshot(&gate, snapshot))
        })
        .await?;
    Ok(Json(status))
}

async fn delete_release(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.db.call(move |db| db.delete_release(id)).await?;
    if deleted {
        tracing::info!(release_id = id, "release deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Release {} not found", id)))
    }
}

// ── Helpers ───────────────────────────────────────────────────────────

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
