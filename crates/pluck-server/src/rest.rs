//! HTTP REST API.
//!
//! Extraction and listing are open; writing a mapping or voting needs an
//! actor identity (`X-User-Id`) and, when a token is configured, a matching
//! bearer token.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pluck::url_gate::normalize_domain;
use pluck::{UpsertOutcome, VoteDirection};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::events;
use crate::rate_limit::RateLimiter;
use crate::service::{ExtractResponse, MappingSubmission, PluckService};

/// Longest accepted `X-User-Id`.
pub const MAX_ACTOR_LEN: usize = 128;

/// Shared state handed to every handler.
pub struct AppState {
    pub service: Arc<PluckService>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(service: Arc<PluckService>, limiter: Arc<RateLimiter>) -> Self {
        Self { service, limiter }
    }
}

/// Build the axum Router with all REST endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/extract", post(handle_extract))
        .route("/api/v1/sandbox", get(handle_sandbox))
        .route(
            "/api/v1/mappings",
            get(handle_list_mappings).post(handle_submit_mapping),
        )
        .route("/api/v1/mappings/:id/vote", post(handle_vote))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_layer,
        ))
        .route("/health", get(health))
        .route("/api/v1/events", get(events_sse))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `bind` until the process is stopped.
pub async fn start(bind: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("REST API listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

// ── Auth ────────────────────────────────────────────────────────

/// The identity a mutating request acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Actor {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        authorize(
            &parts.headers,
            state.service.config().api_token.as_deref(),
        )
    }
}

/// Check the bearer token (when one is configured) and read `X-User-Id`.
pub fn authorize(headers: &HeaderMap, token: Option<&str>) -> ServiceResult<Actor> {
    if let Some(expected) = token {
        let presented = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented != Some(expected) {
            return Err(ServiceError::Unauthorized(
                "missing or invalid bearer token".into(),
            ));
        }
    }

    let actor = user_id(headers)
        .ok_or_else(|| ServiceError::Unauthorized("missing X-User-Id header".into()))?;
    if actor.len() > MAX_ACTOR_LEN || actor.chars().any(char::is_control) {
        return Err(ServiceError::Unauthorized("malformed X-User-Id header".into()));
    }
    Ok(Actor(actor.to_string()))
}

fn user_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Rate-limit key. Client headers alone never pick the bucket: the actor
/// counts only once a configured bearer token vouches for it, otherwise the
/// peer address does.
fn rate_key(headers: &HeaderMap, token: Option<&str>, peer: Option<SocketAddr>) -> String {
    if token.is_some() {
        if let Ok(Actor(actor)) = authorize(headers, token) {
            return format!("user:{actor}");
        }
    }
    match peer {
        Some(addr) => format!("ip:{}", addr.ip()),
        None => "anonymous".to_string(),
    }
}

async fn rate_limit_layer(
    State(state): State<Arc<AppState>>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = rate_key(
        request.headers(),
        state.service.config().api_token.as_deref(),
        peer,
    );
    if let Err(retry_after_secs) = state.limiter.check(&key) {
        tracing::warn!(key = %key, retry_after_secs, "rate limited");
        return ServiceError::RateLimited { retry_after_secs }.into_response();
    }
    next.run(request).await
}

// ── Handlers ────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    url: String,
}

async fn handle_extract(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ExtractRequest>, JsonRejection>,
) -> ServiceResult<Json<ExtractResponse>> {
    let Json(req) = body.map_err(bad_json)?;
    Ok(Json(state.service.extract(&req.url).await?))
}

#[derive(Debug, Deserialize)]
struct UrlParams {
    url: Option<String>,
}

async fn handle_sandbox(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UrlParams>,
) -> ServiceResult<Html<String>> {
    let url = params
        .url
        .ok_or_else(|| ServiceError::Input("missing 'url' query parameter".into()))?;
    let page = state.service.sandbox(&url).await?;
    Ok(Html(page.html))
}

async fn handle_submit_mapping(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    body: Result<Json<MappingSubmission>, JsonRejection>,
) -> ServiceResult<Response> {
    let Json(submission) = body.map_err(bad_json)?;
    let written = state.service.submit_mapping(&actor, submission).await?;
    let status = match written.status {
        UpsertOutcome::Created => StatusCode::CREATED,
        UpsertOutcome::Updated => StatusCode::OK,
    };
    Ok((status, Json(written)).into_response())
}

#[derive(Debug, Deserialize)]
struct DomainParams {
    domain: Option<String>,
}

async fn handle_list_mappings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DomainParams>,
) -> ServiceResult<Json<Value>> {
    let domain = params
        .domain
        .ok_or_else(|| ServiceError::Input("missing 'domain' query parameter".into()))?;
    let mappings = state.service.list_mappings(&domain).await?;
    Ok(Json(serde_json::json!({
        "domain": normalize_domain(&domain),
        "mappings": mappings,
    })))
}

#[derive(Debug, Deserialize)]
struct VoteRequest {
    vote: String,
}

async fn handle_vote(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id): Path<String>,
    body: Result<Json<VoteRequest>, JsonRejection>,
) -> ServiceResult<Json<Value>> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| ServiceError::Input(format!("'{id}' is not a mapping id")))?;
    let Json(req) = body.map_err(bad_json)?;
    let direction: VoteDirection = req.vote.parse()?;
    tracing::debug!(%id, actor = %actor, "vote received");
    let mapping = state.service.vote(id, direction).await?;
    Ok(Json(serde_json::json!({ "mapping": mapping })))
}

fn bad_json(rejection: JsonRejection) -> ServiceError {
    ServiceError::Input(rejection.body_text())
}

#[derive(Debug, Deserialize, Default)]
struct EventsParams {
    domain: Option<String>,
}

/// Server-Sent Events stream of [`events::PluckEvent`]s, optionally
/// filtered with `?domain=`.
async fn events_sse(
    Query(params): Query<EventsParams>,
    State(state): State<Arc<AppState>>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.service.events().subscribe();
    let domain_filter = params.domain.map(|d| normalize_domain(&d));

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(ref domain) = domain_filter {
                        if !events::event_matches_domain(&event, domain) {
                            continue;
                        }
                    }
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().data(json));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "sse subscriber lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
