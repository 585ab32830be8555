//! HTTP and WebSocket surface

pub mod control;
pub mod health;
pub mod realtime;
pub mod speech;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::{Error, Result};

/// An [`Error`] rendered as a JSON response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

/// HTTP status for an error
#[must_use]
pub const fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::SessionNotFound(_) | Error::UnknownProvider(_) | Error::UnknownEngine(_) => {
            StatusCode::NOT_FOUND
        }
        Error::InvalidInput(_) | Error::InvalidAudioFormat(_) | Error::Config(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::CooldownActive { .. } => StatusCode::CONFLICT,
        Error::ProviderUnavailable { .. }
        | Error::AllProvidersExhausted { .. }
        | Error::EngineUnavailable(_)
        | Error::AllEnginesExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self.0, "request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody {
                    code: self.0.kind(),
                    message: self.0.to_string(),
                },
            }),
        )
            .into_response()
    }
}

/// Handler result type
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the full router
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(health::router(Arc::clone(&ctx)))
        .nest(
            "/api",
            control::router(Arc::clone(&ctx)).merge(speech::router(Arc::clone(&ctx))),
        )
        .nest("/ws", realtime::router(ctx))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// HTTP server for the gateway
pub struct ApiServer {
    ctx: Arc<AppContext>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub const fn new(ctx: Arc<AppContext>, port: u16) -> Self {
        Self { ctx, port }
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.ctx))
            .await
            .map_err(|e| Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
