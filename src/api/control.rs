//! Control and diagnostic endpoints
//!
//! Provider health, performance, primary switching, engines and sessions.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiError, ApiResult};
use crate::Error;
use crate::context::AppContext;
use crate::monitor::PerformanceSnapshot;
use crate::providers::{HealthTransition, ProviderStatus, SwitchEvent, SwitchStatus};
use crate::session::SessionInfo;
use crate::speech::EngineDescriptor;

/// Aggregate provider health
#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub primary: Option<String>,
    pub fallback_enabled: bool,
    pub fallback_order: Vec<String>,
    pub usable: usize,
    pub providers: Vec<ProviderStatus>,
    pub transitions: Vec<HealthTransition>,
}

#[derive(Debug, Deserialize)]
pub struct ManualSwitchRequest {
    pub provider: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct FallbackResponse {
    pub fallback_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    /// The switch applied, if any
    pub applied: Option<SwitchEvent>,
    pub primary: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnginesResponse {
    pub health_score: f64,
    pub engines: Vec<EngineDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub count: usize,
    pub sessions: Vec<SessionInfo>,
}

async fn list_providers(State(ctx): State<Arc<AppContext>>) -> Json<ProvidersResponse> {
    let providers = ctx.health.snapshot();
    Json(ProvidersResponse {
        primary: ctx.selector.primary(),
        fallback_enabled: ctx.selector.fallback_enabled(),
        fallback_order: ctx.selector.fallback_order(),
        usable: providers.iter().filter(|p| p.state.is_usable()).count(),
        providers,
        transitions: ctx.health.transitions(),
    })
}

async fn probe_provider(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProviderStatus>> {
    ctx.health.probe(&id).await?;
    ctx.health
        .snapshot()
        .into_iter()
        .find(|p| p.id == id)
        .map(Json)
        .ok_or_else(|| ApiError(Error::UnknownProvider(id)))
}

async fn performance(State(ctx): State<Arc<AppContext>>) -> Json<PerformanceSnapshot> {
    Json(ctx.monitor.export())
}

async fn switching(State(ctx): State<Arc<AppContext>>) -> Json<SwitchStatus> {
    Json(ctx.switcher.status())
}

async fn manual_switch(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ManualSwitchRequest>,
) -> ApiResult<Json<SwitchEvent>> {
    let reason = request.reason.as_deref().unwrap_or("manual switch");
    let event = ctx
        .switcher
        .manual_switch(&request.provider, reason, request.force)?;
    Ok(Json(event))
}

async fn set_auto_switch(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ToggleRequest>,
) -> Json<SwitchStatus> {
    ctx.switcher.set_auto_switch(request.enabled);
    Json(ctx.switcher.status())
}

async fn set_fallback(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ToggleRequest>,
) -> Json<FallbackResponse> {
    ctx.selector.set_fallback_enabled(request.enabled);
    Json(FallbackResponse {
        fallback_enabled: ctx.selector.fallback_enabled(),
    })
}

async fn evaluate(State(ctx): State<Arc<AppContext>>) -> Json<EvaluateResponse> {
    let applied = ctx.switcher.evaluate_and_apply();
    Json(EvaluateResponse {
        applied,
        primary: ctx.selector.primary(),
    })
}

async fn list_engines(State(ctx): State<Arc<AppContext>>) -> Json<EnginesResponse> {
    Json(EnginesResponse {
        health_score: ctx.engines.health_score(),
        engines: ctx.engines.descriptors(),
    })
}

async fn reload_engine(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<EngineDescriptor>> {
    Ok(Json(ctx.engines.reload(&id).await?))
}

async fn list_sessions(State(ctx): State<Arc<AppContext>>) -> Json<SessionsResponse> {
    let sessions = ctx.sessions.list().await;
    Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    })
}

async fn end_session(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = Uuid::parse_str(&id).map_err(|_| Error::SessionNotFound(id.clone()))?;
    ctx.sessions.end(id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Build control router
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/providers", get(list_providers))
        .route("/providers/{id}/probe", post(probe_provider))
        .route("/performance", get(performance))
        .route("/switching", get(switching))
        .route("/switching/primary", post(manual_switch))
        .route("/switching/auto", put(set_auto_switch))
        .route("/switching/fallback", put(set_fallback))
        .route("/switching/evaluate", post(evaluate))
        .route("/engines", get(list_engines))
        .route("/engines/{id}/reload", post(reload_engine))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", delete(end_session))
        .with_state(ctx)
}
