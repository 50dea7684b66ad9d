//! PostgreSQL store backed by the hosted platform database.
//!
//! Writes go to `inputs`, `chat_messages` and `contact_submissions`. History
//! reads the `chat_messages_with_user` view. Usernames go through the
//! `set_username` and `get_display_name` procedures.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use uuid::Uuid;

use super::{
    ChatMessageRecord, ChatMessageView, ContactSubmissionRecord, InputStore, NewChatMessage,
    NewContactSubmission, NewInput, Profile, ProfileStore, StoreError, StoreResult,
    UsernameOutcome,
};
use crate::config::DatabaseConfig;

/// SQLSTATE `insufficient_privilege`, raised by row-level security.
const INSUFFICIENT_PRIVILEGE: &str = "42501";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            let is_policy = db_err.code().as_deref() == Some(INSUFFICIENT_PRIVILEGE)
                || db_err.message().contains("row-level security");
            if is_policy {
                return Self::PolicyViolation;
            }
        }
        Self::Backend(err.to_string())
    }
}

/// [`InputStore`] and [`ProfileStore`] over a sqlx connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool using the database section of the configuration.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StoreError::Backend("database.url is not set".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InputStore for PgStore {
    async fn insert_input(&self, input: &NewInput) -> StoreResult<Uuid> {
        let row = sqlx::query(
            "INSERT INTO inputs (user_id, kind, text, embedding, meta) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(input.user_id)
        .bind(input.kind.as_str())
        .bind(&input.text)
        .bind(Vector::from(input.embedding.clone()))
        .bind(&input.meta)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn delete_input(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM inputs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_chat_message(
        &self,
        message: &NewChatMessage,
    ) -> StoreResult<ChatMessageRecord> {
        let row = sqlx::query(
            "INSERT INTO chat_messages (input_id, user_id, room, text) \
             VALUES ($1, $2, $3, $4) RETURNING id, created_at",
        )
        .bind(message.input_id)
        .bind(message.user_id)
        .bind(&message.room)
        .bind(&message.text)
        .fetch_one(&self.pool)
        .await?;

        Ok(ChatMessageRecord {
            id: row.try_get("id")?,
            input_id: message.input_id,
            user_id: message.user_id,
            room: message.room.clone(),
            text: message.text.clone(),
            created_at: row.try_get("created_at")?,
        })
    }

    async fn insert_contact_submission(
        &self,
        submission: &NewContactSubmission,
    ) -> StoreResult<ContactSubmissionRecord> {
        let row = sqlx::query(
            "INSERT INTO contact_submissions (input_id, email, message) \
             VALUES ($1, $2, $3) RETURNING id, created_at",
        )
        .bind(submission.input_id)
        .bind(&submission.email)
        .bind(&submission.message)
        .fetch_one(&self.pool)
        .await?;

        Ok(ContactSubmissionRecord {
            id: row.try_get("id")?,
            input_id: submission.input_id,
            email: submission.email.clone(),
            message: submission.message.clone(),
            created_at: row.try_get("created_at")?,
        })
    }

    async fn recent_chat_messages(
        &self,
        room: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessageView>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT id, room, text, created_at, user_id, display_name, avatar_url \
             FROM chat_messages_with_user \
             WHERE room = $1 \
             ORDER BY created_at DESC \
             LIMIT $2",
        )
        .bind(room)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(|row| -> Result<ChatMessageView, sqlx::Error> {
                let id: Uuid = row.try_get("id")?;
                let created_at: DateTime<Utc> = row.try_get("created_at")?;
                let display_name: Option<String> = row.try_get("display_name")?;
                Ok(ChatMessageView {
                    id: id.to_string(),
                    room: row.try_get("room")?,
                    text: row.try_get("text")?,
                    created_at,
                    user_id: row.try_get("user_id")?,
                    display_name: display_name
                        .unwrap_or_else(|| super::UNKNOWN_DISPLAY_NAME.to_string()),
                    avatar_url: row.try_get("avatar_url")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        messages.reverse();
        Ok(messages)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn set_username(&self, user_id: Uuid, username: &str) -> StoreResult<UsernameOutcome> {
        let result: serde_json::Value =
            sqlx::query_scalar("SELECT set_username(p_user_id => $1, p_username => $2)")
                .bind(user_id)
                .bind(username)
                .fetch_one(&self.pool)
                .await?;

        Ok(parse_username_result(&result, username))
    }

    async fn profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        let row = sqlx::query("SELECT username, username_changed FROM user_profiles WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<Profile, sqlx::Error> {
            let changed: Option<bool> = row.try_get("username_changed")?;
            Ok(Profile {
                user_id,
                username: row.try_get("username")?,
                username_changed: changed.unwrap_or(false),
            })
        })
        .transpose()
        .map_err(StoreError::from)
    }

    async fn display_name(&self, user_id: Uuid) -> StoreResult<Option<String>> {
        let name: Option<String> = sqlx::query_scalar("SELECT get_display_name(p_user_id => $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(name)
    }
}

/// Interpret the `{success, username?, error?}` document `set_username`
/// returns.
fn parse_username_result(result: &serde_json::Value, requested: &str) -> UsernameOutcome {
    let success = result
        .get("success")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    if success {
        let username = result
            .get("username")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(requested)
            .to_string();
        UsernameOutcome::Accepted { username }
    } else {
        let reason = result
            .get("error")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("Failed to set username")
            .to_string();
        UsernameOutcome::Rejected { reason }
    }
}
