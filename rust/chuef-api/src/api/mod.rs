//! HTTP API endpoints.

pub mod chat;
pub mod health;
pub mod ingest;
pub mod profile;

use axum::Router;

use crate::AppState;

/// Create the API router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(ingest::router())
        .merge(profile::router())
        .merge(chat::router())
}
