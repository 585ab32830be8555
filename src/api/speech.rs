//! One-shot speech and chat endpoints
//!
//! The same failover paths the realtime sessions use, exposed for clients
//! that do not hold a WebSocket open.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};

use super::ApiResult;
use crate::Error;
use crate::chat::{ChatMessage, ChatReply};
use crate::context::AppContext;
use crate::providers::TaskType;
use crate::speech::AudioFormat;

/// Header naming the engine that served a synthesis request
pub const ENGINE_HEADER: &str = "x-vita-engine";

#[derive(Debug, Deserialize)]
pub struct TranscribeQuery {
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub engine: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub text: String,
    pub duration: f64,
    pub engine: String,
}

#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub speed: Option<f32>,
    #[serde(default)]
    pub engine: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub task: Option<TaskType>,
    /// Replaces the configured system prompt
    #[serde(default)]
    pub system: Option<String>,
}

const fn content_type(format: AudioFormat) -> &'static str {
    match format {
        AudioFormat::Mp3 => "audio/mpeg",
        AudioFormat::Wav => "audio/wav",
    }
}

/// Transcribe a raw PCM16 mono body
async fn transcribe(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<TranscribeQuery>,
    body: Bytes,
) -> ApiResult<Json<TranscribeResponse>> {
    let sample_rate = query.sample_rate.unwrap_or(ctx.config.session.sample_rate);
    if sample_rate == 0 {
        return Err(Error::InvalidInput("sample_rate must be positive".to_string()).into());
    }
    let (transcription, engine) = ctx
        .speech
        .transcribe(&body, sample_rate, query.engine.as_deref())
        .await?;

    Ok(Json(TranscribeResponse {
        text: transcription.text,
        duration: transcription.duration.as_secs_f64(),
        engine,
    }))
}

/// Synthesize text and return the encoded audio
async fn synthesize(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<SynthesizeRequest>,
) -> ApiResult<Response> {
    let session = &ctx.config.session;
    let voice = request.voice.as_deref().unwrap_or(&session.voice);
    let speed = request.speed.unwrap_or(session.speed);

    let (audio, engine) = ctx
        .speech
        .synthesize(&request.text, voice, speed, request.engine.as_deref())
        .await?;

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type(audio.format))],
        audio.bytes,
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&engine) {
        response.headers_mut().insert(ENGINE_HEADER, value);
    }
    Ok(response)
}

/// Single-turn chat through provider selection and failover
async fn chat(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatReply>> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(Error::InvalidInput("message is empty".to_string()).into());
    }
    let system = request
        .system
        .unwrap_or_else(|| ctx.config.server.system_prompt.clone());
    let messages = [ChatMessage::system(system), ChatMessage::user(message)];
    let task = request.task.unwrap_or(TaskType::Chat);

    Ok(Json(ctx.chat.complete(task, &messages).await?))
}

/// Build speech router
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/speech/transcribe", post(transcribe))
        .route("/speech/synthesize", post(synthesize))
        .route("/chat", post(chat))
        .with_state(ctx)
}
