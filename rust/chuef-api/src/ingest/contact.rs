//! Contact form handler. Submissions are anonymous.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use super::ledger::{LedgerError, PendingDomain};
use super::{
    ContactSubmissionPayload, IngestError, IngestKind, IngestPipeline, IngestReceipt, merge_meta,
};
use crate::database::NewInput;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

/// Validated contact submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidContactSubmission {
    pub email: String,
    pub message: String,
}

/// Whether `email` looks like an address.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Check email and message.
pub fn validate(
    payload: &ContactSubmissionPayload,
    max_chars: usize,
) -> Result<ValidContactSubmission, IngestError> {
    let email = payload
        .email
        .as_deref()
        .filter(|e| is_valid_email(e))
        .ok_or_else(|| IngestError::Validation("Valid email is required".to_string()))?;

    let raw = payload.text.as_deref().unwrap_or_default();
    let message = raw.trim();
    if message.is_empty() {
        return Err(IngestError::Validation("Message is required".to_string()));
    }
    if raw.chars().count() > max_chars {
        return Err(IngestError::Validation(format!(
            "Message exceeds {max_chars} character limit"
        )));
    }

    Ok(ValidContactSubmission {
        email: email.to_string(),
        message: message.to_string(),
    })
}

pub(super) async fn handle(
    pipeline: &IngestPipeline,
    payload: ContactSubmissionPayload,
) -> Result<IngestReceipt, IngestError> {
    let valid = validate(&payload, pipeline.limits.contact_max_chars)?;

    let embedding = pipeline.embed(&valid.message).await?;

    let surface = payload
        .surface
        .as_ref()
        .and_then(|s| serde_json::to_value(s).ok())
        .unwrap_or(Value::Null);
    let input = NewInput {
        user_id: None,
        kind: IngestKind::ContactSubmission,
        text: valid.message.clone(),
        embedding,
        meta: merge_meta(
            payload.meta,
            [("email", json!(valid.email)), ("surface", surface)],
        ),
    };
    let domain = PendingDomain::ContactSubmission {
        email: valid.email,
        message: valid.message,
    };

    let committed = pipeline
        .ledger
        .record(input, domain)
        .await
        .map_err(|e| match e {
            LedgerError::Input(_) => IngestError::Database("Failed to store input"),
            LedgerError::Domain { .. } => {
                IngestError::Database("Failed to store contact submission")
            }
        })?;

    Ok(IngestReceipt::new(
        IngestKind::ContactSubmission,
        committed.input_id,
        committed.domain.id(),
    ))
}
