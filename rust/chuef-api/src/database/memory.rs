//! In-memory store for local runs and tests.
//!
//! Mirrors the behaviour the hosted database enforces through policies and
//! procedures: the optional per-user chat cooldown surfaces as
//! [`StoreError::PolicyViolation`], and usernames are unique
//! case-insensitively and settable once.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    ChatMessageRecord, ChatMessageView, ContactSubmissionRecord, InputRecord, InputStore,
    NewChatMessage, NewContactSubmission, NewInput, Profile, ProfileStore, StoreError,
    StoreResult, UsernameOutcome, anonymous_handle,
};

#[derive(Debug, Default)]
struct Tables {
    inputs: Vec<InputRecord>,
    chat_messages: Vec<ChatMessageRecord>,
    contact_submissions: Vec<ContactSubmissionRecord>,
    profiles: HashMap<Uuid, Profile>,
}

/// Process-local implementation of [`InputStore`] and [`ProfileStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    chat_cooldown: Option<Duration>,
}

impl MemoryStore {
    /// Create an empty store without a chat cooldown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject a user's chat message when their previous one is younger than
    /// `cooldown`.
    #[must_use]
    pub fn with_chat_cooldown(mut self, cooldown: Duration) -> Self {
        self.chat_cooldown = (!cooldown.is_zero()).then_some(cooldown);
        self
    }

    /// Snapshot of the `inputs` table.
    pub fn inputs(&self) -> Vec<InputRecord> {
        self.tables.lock().inputs.clone()
    }

    /// Snapshot of the `chat_messages` table.
    pub fn chat_messages(&self) -> Vec<ChatMessageRecord> {
        self.tables.lock().chat_messages.clone()
    }

    /// Snapshot of the `contact_submissions` table.
    pub fn contact_submissions(&self) -> Vec<ContactSubmissionRecord> {
        self.tables.lock().contact_submissions.clone()
    }

    fn in_cooldown(&self, tables: &Tables, user_id: Uuid, now: DateTime<Utc>) -> bool {
        let Some(cooldown) = self.chat_cooldown else {
            return false;
        };
        let Ok(cooldown) = chrono::Duration::from_std(cooldown) else {
            return false;
        };
        tables
            .chat_messages
            .iter()
            .rev()
            .find(|m| m.user_id == user_id)
            .is_some_and(|last| now - last.created_at < cooldown)
    }
}

fn display_name_in(tables: &Tables, user_id: Uuid) -> String {
    tables
        .profiles
        .get(&user_id)
        .and_then(|p| p.username.clone())
        .unwrap_or_else(|| anonymous_handle(user_id))
}

#[async_trait]
impl InputStore for MemoryStore {
    async fn insert_input(&self, input: &NewInput) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        self.tables.lock().inputs.push(InputRecord {
            id,
            user_id: input.user_id,
            kind: input.kind,
            text: input.text.clone(),
            embedding: input.embedding.clone(),
            meta: input.meta.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn delete_input(&self, id: Uuid) -> StoreResult<()> {
        self.tables.lock().inputs.retain(|row| row.id != id);
        Ok(())
    }

    async fn insert_chat_message(
        &self,
        message: &NewChatMessage,
    ) -> StoreResult<ChatMessageRecord> {
        let now = Utc::now();
        let mut tables = self.tables.lock();

        if !tables.inputs.iter().any(|row| row.id == message.input_id) {
            return Err(StoreError::Backend(format!(
                "input {} does not exist",
                message.input_id
            )));
        }
        if self.in_cooldown(&tables, message.user_id, now) {
            return Err(StoreError::PolicyViolation);
        }

        let record = ChatMessageRecord {
            id: Uuid::new_v4(),
            input_id: message.input_id,
            user_id: message.user_id,
            room: message.room.clone(),
            text: message.text.clone(),
            created_at: now,
        };
        tables.chat_messages.push(record.clone());
        Ok(record)
    }

    async fn insert_contact_submission(
        &self,
        submission: &NewContactSubmission,
    ) -> StoreResult<ContactSubmissionRecord> {
        let mut tables = self.tables.lock();

        if !tables.inputs.iter().any(|row| row.id == submission.input_id) {
            return Err(StoreError::Backend(format!(
                "input {} does not exist",
                submission.input_id
            )));
        }

        let record = ContactSubmissionRecord {
            id: Uuid::new_v4(),
            input_id: submission.input_id,
            email: submission.email.clone(),
            message: submission.message.clone(),
            created_at: Utc::now(),
        };
        tables.contact_submissions.push(record.clone());
        Ok(record)
    }

    async fn recent_chat_messages(
        &self,
        room: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChatMessageView>> {
        let tables = self.tables.lock();
        let mut newest: Vec<ChatMessageView> = tables
            .chat_messages
            .iter()
            .rev()
            .filter(|m| m.room == room)
            .take(limit)
            .map(|m| ChatMessageView {
                id: m.id.to_string(),
                room: m.room.clone(),
                text: m.text.clone(),
                created_at: m.created_at,
                user_id: m.user_id,
                display_name: display_name_in(&tables, m.user_id),
                avatar_url: None,
            })
            .collect();
        newest.reverse();
        Ok(newest)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn set_username(&self, user_id: Uuid, username: &str) -> StoreResult<UsernameOutcome> {
        let mut tables = self.tables.lock();

        if tables
            .profiles
            .get(&user_id)
            .is_some_and(|p| p.username_changed)
        {
            return Ok(UsernameOutcome::Rejected {
                reason: "Username can only be changed once".to_string(),
            });
        }

        let wanted = username.to_lowercase();
        let taken = tables.profiles.values().any(|p| {
            p.user_id != user_id
                && p.username
                    .as_deref()
                    .is_some_and(|existing| existing.to_lowercase() == wanted)
        });
        if taken {
            return Ok(UsernameOutcome::Rejected {
                reason: "Username is already taken".to_string(),
            });
        }

        tables.profiles.insert(
            user_id,
            Profile {
                user_id,
                username: Some(username.to_string()),
                username_changed: true,
            },
        );
        Ok(UsernameOutcome::Accepted {
            username: username.to_string(),
        })
    }

    async fn profile(&self, user_id: Uuid) -> StoreResult<Option<Profile>> {
        Ok(self.tables.lock().profiles.get(&user_id).cloned())
    }

    async fn display_name(&self, user_id: Uuid) -> StoreResult<Option<String>> {
        Ok(Some(display_name_in(&self.tables.lock(), user_id)))
    }
}
