//! Chat history and live stream.
//!
//! Both are public: reading the chat needs no session, only sending does.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::database::ChatMessageView;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/chat/messages", get(history))
        .route("/api/chat/stream", get(stream))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub room: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    success: bool,
    room: String,
    messages: Vec<ChatMessageView>,
}

fn room_or_default(room: Option<String>, default_room: &str) -> String {
    room.map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| default_room.to_string())
}

/// `GET /api/chat/messages?room=lobby&limit=100`: newest messages, oldest
/// first.
async fn history(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> Response {
    let room = room_or_default(query.room, &state.config.ingest.default_room);
    let max = state.config.ingest.history_limit.max(1);
    let limit = query.limit.unwrap_or(max).clamp(1, max);

    match state.inputs.recent_chat_messages(&room, limit).await {
        Ok(messages) => Json(HistoryResponse {
            success: true,
            room,
            messages,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(room = %room, error = %e, "Chat history query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"success": false, "error": "Failed to load messages"})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub room: Option<String>,
}

/// `GET /api/chat/stream?room=lobby`: one `message` event per new message.
async fn stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let room = room_or_default(query.room, &state.config.ingest.default_room);
    let mut subscription = state.hub.subscribe(room);
    tracing::debug!(room = %subscription.room(), "Chat stream opened");

    let events = async_stream::stream! {
        while let Some(message) = subscription.recv().await {
            match Event::default().event("message").json_data(&message) {
                Ok(event) => yield Ok::<_, Infallible>(event),
                Err(e) => tracing::warn!(error = %e, "Failed to encode chat event"),
            }
        }
    };

    Sse::new(events).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(state.config.realtime.keep_alive_secs)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_or_default() {
        assert_eq!(room_or_default(None, "lobby"), "lobby");
        assert_eq!(room_or_default(Some("  ".into()), "lobby"), "lobby");
        assert_eq!(room_or_default(Some(" garden ".into()), "lobby"), "garden");
    }
}
