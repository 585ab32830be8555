//! WebSocket transport for realtime voice sessions

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use super::ApiError;
use crate::context::AppContext;
use crate::session::{AudioFrame, ClientEvent, ServerEvent, SessionHandle, SessionInput};
use crate::{Error, Result};

/// Optional query parameters for a voice connection
#[derive(Debug, Deserialize)]
struct VoiceQuery {
    session_id: Option<String>,
}

/// Build WebSocket router
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/voice", get(ws_upgrade))
        .with_state(ctx)
}

async fn ws_upgrade(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<VoiceQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let requested = match query.session_id.as_deref().map(Uuid::parse_str).transpose() {
        Ok(id) => id,
        Err(e) => {
            return ApiError(Error::InvalidInput(format!("bad session_id: {e}"))).into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, ctx, requested))
}

/// Decode one WebSocket message; `Ok(None)` for control frames
fn decode(message: Message) -> Result<Option<SessionInput>> {
    match message {
        Message::Text(text) => {
            let event: ClientEvent = serde_json::from_str(text.as_str())?;
            event.into_input().map(Some)
        }
        Message::Binary(data) => Ok(Some(SessionInput::Audio(AudioFrame::raw(data.to_vec())))),
        Message::Close(_) => Ok(Some(SessionInput::End)),
        Message::Ping(_) | Message::Pong(_) => Ok(None),
    }
}

/// Encode one outbound event; audio chunks go out as binary frames
fn encode(event: ServerEvent) -> Option<Message> {
    match event {
        ServerEvent::AudioChunk { data, .. } => Some(Message::Binary(data.into())),
        other => match serde_json::to_string(&other) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode session event");
                None
            }
        },
    }
}

async fn handle_socket(socket: WebSocket, ctx: Arc<AppContext>, requested: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();

    let SessionHandle {
        id,
        inbound,
        mut outbound,
        events,
        task: mut session_task,
    } = match ctx.sessions.open(requested).await {
        Ok(handle) => handle,
        Err(e) => {
            if let Some(message) = encode(ServerEvent::error(&e)) {
                let _ = sender.send(message).await;
            }
            return;
        }
    };

    tracing::info!(session_id = %id, "voice WebSocket connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let Some(message) = encode(event) else {
                continue;
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match decode(message) {
                Ok(Some(input)) => {
                    let end = input == SessionInput::End;
                    if inbound.send(input).await.is_err() || end {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(session_id = %id, error = %e, "rejected client message");
                    let _ = events.send(ServerEvent::error(&e)).await;
                }
            }
        }
    });

    let mut session_done = false;
    tokio::select! {
        _ = &mut recv_task => {}
        _ = &mut session_task => {
            session_done = true;
            recv_task.abort();
        }
        _ = &mut send_task => recv_task.abort(),
    }

    if !session_done {
        let _ = session_task.await;
    }
    let _ = send_task.await;

    tracing::info!(session_id = %id, "voice WebSocket disconnected");
}
