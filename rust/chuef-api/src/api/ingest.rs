//! The universal ingest endpoint.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};

use crate::AppState;
use crate::gateway::MaybeSession;
use crate::ingest::{IngestContext, IngestError, IngestReceipt};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/ingest", post(ingest))
}

/// `POST /api/ingest`. The body is read as JSON whatever the content type.
async fn ingest(
    State(state): State<AppState>,
    MaybeSession(session): MaybeSession,
    headers: HeaderMap,
    body: Bytes,
) -> Result<IngestReceipt, IngestError> {
    let body = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(error = %e, "Unparseable ingest body");
        IngestError::InvalidBody
    })?;

    let ctx = IngestContext::from_headers(&headers, session);
    state.pipeline.ingest(body, &ctx).await
}
