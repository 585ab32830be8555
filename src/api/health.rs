//! Liveness and readiness endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use crate::context::AppContext;
use crate::speech::Modality;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
}

/// Detailed readiness response
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

/// Individual readiness checks
#[derive(Serialize)]
pub struct ReadinessChecks {
    pub providers: CheckResult,
    pub transcription: CheckResult,
    pub synthesis: CheckResult,
    /// Share of engines that are fully ready
    pub engine_health_score: f64,
}

/// Result of a single readiness check
#[derive(Serialize)]
pub struct CheckResult {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckResult {
    const fn ok() -> Self {
        Self {
            status: "ok",
            message: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: "fail",
            message: Some(message.into()),
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Liveness probe
async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: ctx.uptime_secs(),
    })
}

/// Readiness probe: a usable provider and an engine per modality
async fn ready(State(ctx): State<Arc<AppContext>>) -> (StatusCode, Json<ReadinessResponse>) {
    let providers = check_providers(&ctx);
    let transcription = check_engines(&ctx, Modality::Transcription);
    let synthesis = check_engines(&ctx, Modality::Synthesis);

    let all_ok = providers.is_ok() && transcription.is_ok() && synthesis.is_ok();
    let (status, http_status) = if all_ok {
        ("ok", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    (
        http_status,
        Json(ReadinessResponse {
            status,
            checks: ReadinessChecks {
                providers,
                transcription,
                synthesis,
                engine_health_score: ctx.engines.health_score(),
            },
        }),
    )
}

fn check_providers(ctx: &AppContext) -> CheckResult {
    let snapshot = ctx.health.snapshot();
    let usable = snapshot.iter().filter(|p| p.state.is_usable()).count();
    if usable > 0 {
        CheckResult::ok()
    } else {
        CheckResult::fail(format!("0 of {} providers usable", snapshot.len()))
    }
}

fn check_engines(ctx: &AppContext, modality: Modality) -> CheckResult {
    if ctx.engines.get_ready(modality).is_empty() {
        CheckResult::fail(format!("no {modality} engine ready"))
    } else {
        CheckResult::ok()
    }
}

/// Build health router
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(ctx)
}
