//! Universal ingest.
//!
//! Every piece of user-submitted text enters through [`IngestPipeline`]:
//!
//! 1. the body is checked to be a JSON object with a known `kind`;
//! 2. the client is rate limited per kind;
//! 3. surface metadata is derived when the client sent none;
//! 4. the kind's gate runs (session for chat, captcha for contact);
//! 5. the kind's handler validates, embeds and writes through the
//!    [`ledger::Ledger`].

pub mod chat;
pub mod contact;
pub mod ledger;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::captcha::CaptchaVerifier;
use crate::config::{IngestConfig, RateLimitConfig, RateLimitsConfig};
use crate::database::{InputStore, ProfileStore};
use crate::embedding::Embedder;
use crate::gateway::{AuthenticatedUser, RateLimitBackend};
use crate::realtime::ChatHub;

use self::ledger::Ledger;

/// The closed set of input kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestKind {
    ChatMessage,
    ContactSubmission,
}

impl IngestKind {
    pub const ALL: [IngestKind; 2] = [IngestKind::ChatMessage, IngestKind::ContactSubmission];

    /// Wire and database name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChatMessage => "chat_message",
            Self::ContactSubmission => "contact_submission",
        }
    }

    /// Surface name recorded when the client sends no surface metadata.
    #[must_use]
    pub const fn default_surface(self) -> &'static str {
        match self {
            Self::ChatMessage => "chatroom",
            Self::ContactSubmission => "contact",
        }
    }

    /// This kind's limit.
    #[must_use]
    pub fn rate_limit(self, limits: &RateLimitsConfig) -> &RateLimitConfig {
        match self {
            Self::ChatMessage => &limits.chat_message,
            Self::ContactSubmission => &limits.contact_submission,
        }
    }
}

impl fmt::Display for IngestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestKind {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| IngestError::UnknownKind(s.to_string()))
    }
}

/// Where a submission came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceMetadata {
    pub surface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

/// The request body as sent by clients, before dispatch.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawIngestPayload {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub captcha_token: Option<String>,
    #[serde(default)]
    pub meta: Option<Map<String, Value>>,
    #[serde(default)]
    pub surface: Option<SurfaceMetadata>,
}

/// Chat message payload.
#[derive(Debug, Clone, Default)]
pub struct ChatMessagePayload {
    pub text: Option<String>,
    pub room: Option<String>,
    pub meta: Map<String, Value>,
    pub surface: Option<SurfaceMetadata>,
}

/// Contact form payload.
#[derive(Debug, Clone, Default)]
pub struct ContactSubmissionPayload {
    pub text: Option<String>,
    pub email: Option<String>,
    pub captcha_token: Option<String>,
    pub meta: Map<String, Value>,
    pub surface: Option<SurfaceMetadata>,
}

/// A payload whose kind is known. One variant per [`IngestKind`].
#[derive(Debug, Clone)]
pub enum IngestRequest {
    ChatMessage(ChatMessagePayload),
    ContactSubmission(ContactSubmissionPayload),
}

impl IngestRequest {
    /// Parse a request body: a JSON object with a known `kind`.
    pub fn from_json(body: Value) -> Result<Self, IngestError> {
        let Value::Object(mut object) = body else {
            return Err(IngestError::InvalidBody);
        };

        let kind = match object.remove("kind") {
            None | Some(Value::Null) => return Err(IngestError::MissingKind),
            Some(Value::String(s)) if s.is_empty() => return Err(IngestError::MissingKind),
            Some(Value::String(s)) => s.parse::<IngestKind>()?,
            Some(other) => return Err(IngestError::UnknownKind(other.to_string())),
        };

        let raw: RawIngestPayload = serde_json::from_value(Value::Object(object)).map_err(|e| {
            tracing::debug!(error = %e, kind = %kind, "Malformed ingest payload");
            IngestError::InvalidBody
        })?;

        Ok(Self::from_raw(kind, raw))
    }

    fn from_raw(kind: IngestKind, raw: RawIngestPayload) -> Self {
        let meta = raw.meta.unwrap_or_default();
        match kind {
            IngestKind::ChatMessage => Self::ChatMessage(ChatMessagePayload {
                text: raw.text,
                room: raw.room,
                meta,
                surface: raw.surface,
            }),
            IngestKind::ContactSubmission => Self::ContactSubmission(ContactSubmissionPayload {
                text: raw.text,
                email: raw.email,
                captcha_token: raw.captcha_token,
                meta,
                surface: raw.surface,
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> IngestKind {
        match self {
            Self::ChatMessage(_) => IngestKind::ChatMessage,
            Self::ContactSubmission(_) => IngestKind::ContactSubmission,
        }
    }

    fn surface_mut(&mut self) -> &mut Option<SurfaceMetadata> {
        match self {
            Self::ChatMessage(p) => &mut p.surface,
            Self::ContactSubmission(p) => &mut p.surface,
        }
    }
}

/// Per-request facts the pipeline needs besides the body.
#[derive(Debug, Clone, Default)]
pub struct IngestContext {
    /// Rate-limit identity, see [`crate::gateway::client_identifier`].
    pub client_id: String,
    pub session: Option<AuthenticatedUser>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

impl IngestContext {
    /// Collect the context from request headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, session: Option<AuthenticatedUser>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            client_id: crate::gateway::client_identifier(headers),
            session,
            user_agent: header("user-agent"),
            referrer: header("referer"),
        }
    }

    fn derived_surface(&self, kind: IngestKind) -> SurfaceMetadata {
        SurfaceMetadata {
            surface: kind.default_surface().to_string(),
            page: None,
            user_agent: self.user_agent.clone(),
            referrer: self.referrer.clone(),
        }
    }
}

/// Successful ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub success: bool,
    pub input_id: Uuid,
    pub domain_id: Uuid,
    pub kind: IngestKind,
    pub embedding_generated: bool,
}

impl IngestReceipt {
    fn new(kind: IngestKind, input_id: Uuid, domain_id: Uuid) -> Self {
        Self {
            success: true,
            input_id,
            domain_id,
            kind,
            embedding_generated: true,
        }
    }
}

impl IntoResponse for IngestReceipt {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, Json(self)).into_response()
    }
}

/// Error codes of the failure envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    Unauthorized,
    CaptchaRequired,
    CaptchaFailed,
    Cooldown,
    EmbeddingError,
    DatabaseError,
    UnknownError,
}

/// Ingest failures. Each maps to one [`ErrorCode`] and HTTP status.
#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("Invalid JSON body")]
    InvalidBody,
    #[error("Missing 'kind' field")]
    MissingKind,
    #[error("Unknown input kind: {0}")]
    UnknownKind(String),
    #[error("{0}")]
    Validation(String),
    #[error("Rate limited. Try again in {reset_in} seconds.")]
    RateLimited { reset_in: u64 },
    #[error("Authentication required to send messages")]
    Unauthorized,
    #[error("Captcha verification required")]
    CaptchaRequired,
    #[error("{0}")]
    CaptchaFailed(String),
    #[error("Cooldown: please wait {seconds} seconds between messages.")]
    Cooldown { seconds: u64 },
    #[error("Failed to generate embedding")]
    Embedding,
    #[error("{0}")]
    Database(&'static str),
    #[error("Internal server error")]
    Unknown,
}

impl IngestError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidBody
            | Self::MissingKind
            | Self::UnknownKind(_)
            | Self::Validation(_)
            | Self::RateLimited { .. } => ErrorCode::ValidationError,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::CaptchaRequired => ErrorCode::CaptchaRequired,
            Self::CaptchaFailed(_) => ErrorCode::CaptchaFailed,
            Self::Cooldown { .. } => ErrorCode::Cooldown,
            Self::Embedding => ErrorCode::EmbeddingError,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Unknown => ErrorCode::UnknownError,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody
            | Self::MissingKind
            | Self::UnknownKind(_)
            | Self::Validation(_)
            | Self::CaptchaRequired => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::CaptchaFailed(_) => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } | Self::Cooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Embedding => StatusCode::BAD_GATEWAY,
            Self::Database(_) | Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    code: ErrorCode,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            code: self.code(),
        };
        let mut response = (self.status(), Json(body)).into_response();

        if let Self::RateLimited { reset_in } = self {
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(0_u32));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_in));
        }

        response
    }
}

/// Routes ingest requests through rate limiting, gating and the handlers.
pub struct IngestPipeline {
    pub(crate) limiter: Arc<dyn RateLimitBackend>,
    pub(crate) captcha: Arc<dyn CaptchaVerifier>,
    pub(crate) embedder: Arc<dyn Embedder>,
    pub(crate) ledger: Ledger,
    pub(crate) profiles: Arc<dyn ProfileStore>,
    pub(crate) hub: ChatHub,
    pub(crate) rate_limits: RateLimitsConfig,
    pub(crate) limits: IngestConfig,
}

impl fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("limiter", &self.limiter.backend_name())
            .field("embedding_model", &self.embedder.model())
            .field("rate_limits", &self.rate_limits)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Collaborators of an [`IngestPipeline`].
pub struct PipelineParts {
    pub limiter: Arc<dyn RateLimitBackend>,
    pub captcha: Arc<dyn CaptchaVerifier>,
    pub embedder: Arc<dyn Embedder>,
    pub inputs: Arc<dyn InputStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub hub: ChatHub,
}

impl fmt::Debug for PipelineParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineParts")
            .field("limiter", &self.limiter.backend_name())
            .finish_non_exhaustive()
    }
}

impl IngestPipeline {
    #[must_use]
    pub fn new(parts: PipelineParts, rate_limits: RateLimitsConfig, limits: IngestConfig) -> Self {
        Self {
            limiter: parts.limiter,
            captcha: parts.captcha,
            embedder: parts.embedder,
            ledger: Ledger::new(parts.inputs),
            profiles: parts.profiles,
            hub: parts.hub,
            rate_limits,
            limits,
        }
    }

    /// Ingest one request body.
    pub async fn ingest(
        &self,
        body: Value,
        ctx: &IngestContext,
    ) -> Result<IngestReceipt, IngestError> {
        let mut request = IngestRequest::from_json(body)?;
        let kind = request.kind();

        let key = format!("{kind}:{}", ctx.client_id);
        let decision = self
            .limiter
            .check(&key, kind.rate_limit(&self.rate_limits))
            .await;
        if !decision.allowed {
            tracing::info!(
                kind = %kind,
                client = %ctx.client_id,
                reset_in = decision.reset_in,
                "Ingest rate limited"
            );
            return Err(IngestError::RateLimited {
                reset_in: decision.reset_in,
            });
        }

        let surface = request.surface_mut();
        if surface.is_none() {
            *surface = Some(ctx.derived_surface(kind));
        }

        let result = match request {
            IngestRequest::ChatMessage(payload) => {
                let Some(user) = ctx.session.as_ref() else {
                    return Err(IngestError::Unauthorized);
                };
                chat::handle(self, payload, user).await
            }
            IngestRequest::ContactSubmission(payload) => {
                let token = payload
                    .captcha_token
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or(IngestError::CaptchaRequired)?;

                let verdict = self.captcha.verify(token, Some(&ctx.client_id)).await;
                if !verdict.ok {
                    return Err(IngestError::CaptchaFailed(
                        verdict
                            .reason
                            .unwrap_or_else(|| "Captcha verification failed".to_string()),
                    ));
                }
                contact::handle(self, payload).await
            }
        };

        match &result {
            Ok(receipt) => tracing::info!(
                kind = %kind,
                input_id = %receipt.input_id,
                domain_id = %receipt.domain_id,
                "Ingested input"
            ),
            Err(e) => tracing::warn!(kind = %kind, code = ?e.code(), error = %e, "Ingest failed"),
        }
        result
    }

    /// Embed text, mapping failures to [`IngestError::Embedding`].
    pub(crate) async fn embed(&self, text: &str) -> Result<Vec<f32>, IngestError> {
        match self.embedder.embed(text).await {
            Ok(embedding) => Ok(embedding.vector),
            Err(e) => {
                tracing::error!(error = %e, model = %self.embedder.model(), "Embedding failed");
                Err(IngestError::Embedding)
            }
        }
    }
}

/// Merge `extra` into a client meta map, overwriting existing keys.
pub(crate) fn merge_meta(
    mut meta: Map<String, Value>,
    extra: impl IntoIterator<Item = (&'static str, Value)>,
) -> Value {
    for (key, value) in extra {
        meta.insert(key.to_string(), value);
    }
    Value::Object(meta)
}
