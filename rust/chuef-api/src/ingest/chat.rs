//! Chat message handler.

use serde_json::json;

use super::ledger::{DomainRecord, LedgerError, PendingDomain};
use super::{ChatMessagePayload, IngestError, IngestKind, IngestPipeline, IngestReceipt, merge_meta};
use crate::database::{ChatMessageView, NewInput, StoreError, anonymous_handle};
use crate::gateway::AuthenticatedUser;

/// Validated chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidChatMessage {
    pub text: String,
    pub room: String,
}

/// Check text and pick the room.
pub fn validate(
    payload: &ChatMessagePayload,
    max_chars: usize,
    default_room: &str,
) -> Result<ValidChatMessage, IngestError> {
    let raw = payload.text.as_deref().unwrap_or_default();
    let text = raw.trim();
    if text.is_empty() {
        return Err(IngestError::Validation("Message text is required".to_string()));
    }
    if raw.chars().count() > max_chars {
        return Err(IngestError::Validation(format!(
            "Message exceeds {max_chars} character limit"
        )));
    }

    let room = payload
        .room
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(default_room);

    Ok(ValidChatMessage {
        text: text.to_string(),
        room: room.to_string(),
    })
}

pub(super) async fn handle(
    pipeline: &IngestPipeline,
    payload: ChatMessagePayload,
    user: &AuthenticatedUser,
) -> Result<IngestReceipt, IngestError> {
    let valid = validate(
        &payload,
        pipeline.limits.chat_max_chars,
        &pipeline.limits.default_room,
    )?;

    let embedding = pipeline.embed(&valid.text).await?;

    let input = NewInput {
        user_id: Some(user.user_id),
        kind: IngestKind::ChatMessage,
        text: valid.text.clone(),
        embedding,
        meta: merge_meta(payload.meta, [("room", json!(valid.room))]),
    };
    let domain = PendingDomain::ChatMessage {
        user_id: user.user_id,
        room: valid.room.clone(),
        text: valid.text.clone(),
    };

    let committed = pipeline.ledger.record(input, domain).await.map_err(|e| {
        let cooldown = IngestError::Cooldown {
            seconds: pipeline.limits.chat_cooldown_secs,
        };
        match e {
            LedgerError::Input(StoreError::PolicyViolation)
            | LedgerError::Domain {
                source: StoreError::PolicyViolation,
                ..
            } => cooldown,
            LedgerError::Input(_) => IngestError::Database("Failed to store input"),
            LedgerError::Domain { .. } => IngestError::Database("Failed to store chat message"),
        }
    })?;

    let DomainRecord::ChatMessage(record) = committed.domain else {
        return Err(IngestError::Unknown);
    };

    let display_name = match pipeline.profiles.display_name(user.user_id).await {
        Ok(Some(name)) => name,
        Ok(None) => anonymous_handle(user.user_id),
        Err(e) => {
            tracing::warn!(user_id = %user.user_id, error = %e, "Display name lookup failed");
            anonymous_handle(user.user_id)
        }
    };
    pipeline.hub.publish(ChatMessageView {
        id: record.id.to_string(),
        room: record.room,
        text: record.text,
        created_at: record.created_at,
        user_id: record.user_id,
        display_name,
        avatar_url: user.avatar_url.clone(),
    });

    Ok(IngestReceipt::new(
        IngestKind::ChatMessage,
        committed.input_id,
        record.id,
    ))
}
