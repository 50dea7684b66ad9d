//! Storage abstraction for the ingest ledger and user profiles.
//!
//! Two backends implement the same traits:
//! - **PostgreSQL** ([`postgres::PgStore`], `database` feature): the hosted
//!   database with row-level security, profile procedures, and the
//!   `chat_messages_with_user` view.
//! - **In-memory** ([`memory::MemoryStore`]): single-process store for local
//!   runs and tests.
//!
//! The schema itself belongs to the hosting platform; this module only
//! reads and writes it.

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ingest::IngestKind;

/// Errors raised by a store backend.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The database's row-level-security policy rejected the write.
    #[error("write rejected by row-level security policy")]
    PolicyViolation,
    /// Any other backend failure.
    #[error("database error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A row to append to the `inputs` ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInput {
    /// Author, `None` for anonymous surfaces.
    pub user_id: Option<Uuid>,
    pub kind: IngestKind,
    /// Trimmed submission text.
    pub text: String,
    pub embedding: Vec<f32>,
    pub meta: serde_json::Value,
}

/// A stored `inputs` row.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRecord {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub kind: IngestKind,
    pub text: String,
    pub embedding: Vec<f32>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A row for `chat_messages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub input_id: Uuid,
    pub user_id: Uuid,
    pub room: String,
    pub text: String,
}

/// A stored `chat_messages` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessageRecord {
    pub id: Uuid,
    pub input_id: Uuid,
    pub user_id: Uuid,
    pub room: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A row for `contact_submissions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContactSubmission {
    pub input_id: Uuid,
    pub email: String,
    pub message: String,
}

/// A stored `contact_submissions` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactSubmissionRecord {
    pub id: Uuid,
    pub input_id: Uuid,
    pub email: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A chat message joined with its author, as served to chat clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageView {
    pub id: String,
    pub room: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// A user's profile row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: Uuid,
    pub username: Option<String>,
    /// Whether the one-time username change has been used.
    pub username_changed: bool,
}

/// Result of a `set_username` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsernameOutcome {
    /// The username was assigned.
    Accepted { username: String },
    /// The procedure refused, with a user-facing reason.
    Rejected { reason: String },
}

/// Ledger of accepted submissions and their domain rows.
#[async_trait]
pub trait InputStore: Send + Sync {
    /// Append an input and return its id.
    async fn insert_input(&self, input: &NewInput) -> StoreResult<Uuid>;

    /// Remove an input. Used only to compensate a failed domain insert.
    async fn delete_input(&self, id: Uuid) -> StoreResult<()>;

    /// Insert a chat message row.
    async fn insert_chat_message(&self, message: &NewChatMessage)
    -> StoreResult<ChatMessageRecord>;

    /// Insert a contact submission row.
    async fn insert_contact_submission(
        &self,
        submission: &NewContactSubmission,
    ) -> StoreResult<ContactSubmissionRecord>;

    /// The newest `limit` messages of `room`, oldest first.
    async fn recent_chat_messages(
        &self,
        room: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessageView>>;

    /// Connectivity check used by readiness.
    async fn ping(&self) -> StoreResult<()>;
}

/// User profiles and the username procedures.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Assign a username once. Uniqueness is case-insensitive.
    async fn set_username(&self, user_id: Uuid, username: &str) -> StoreResult<UsernameOutcome>;

    /// Fetch a profile, `None` when the user has none yet.
    async fn profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>>;

    /// Public name of a user: their username or an anonymous handle.
    async fn display_name(&self, user_id: Uuid) -> StoreResult<Option<String>>;
}

/// Fallback shown when no display name can be resolved.
pub const UNKNOWN_DISPLAY_NAME: &str = "anon#????";

/// Anonymous handle derived from a user id: `anon#` and the first four hex
/// digits of the id.
#[must_use]
pub fn anonymous_handle(user_id: Uuid) -> String {
    let simple = user_id.simple().to_string();
    format!("anon#{}", &simple[..4])
}
