//! Client-side view of a chat room.
//!
//! A sender shows its message immediately under a temporary id, then either
//! confirms it with the server's id or retracts it. The same message may
//! also arrive over the realtime feed, before or after the confirmation;
//! the timeline keeps exactly one copy either way.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::ChatMessageView;

const TEMP_PREFIX: &str = "temp-";

/// Ordered messages of one room as a client sees them.
#[derive(Debug, Clone, Default)]
pub struct ChatTimeline {
    messages: Vec<ChatMessageView>,
}

/// Author fields of an optimistic message.
#[derive(Debug, Clone)]
pub struct LocalAuthor {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl ChatTimeline {
    /// Start from the history returned by the server.
    #[must_use]
    pub fn new(history: Vec<ChatMessageView>) -> Self {
        Self { messages: history }
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessageView] {
        &self.messages
    }

    fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Append a not-yet-acknowledged message and return its temporary id.
    pub fn push_optimistic(
        &mut self,
        author: &LocalAuthor,
        room: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> String {
        let base = format!("{TEMP_PREFIX}{}", now.timestamp_millis());
        let mut temp_id = base.clone();
        let mut n = 1;
        while self.contains(&temp_id) {
            temp_id = format!("{base}-{n}");
            n += 1;
        }

        self.messages.push(ChatMessageView {
            id: temp_id.clone(),
            room: room.to_string(),
            text: text.to_string(),
            created_at: now,
            user_id: author.user_id,
            display_name: author.display_name.clone(),
            avatar_url: author.avatar_url.clone(),
        });
        temp_id
    }

    /// The server accepted `temp_id` as `domain_id`. Drops the temporary
    /// entry if the feed already delivered `domain_id`, otherwise renames it.
    /// Returns false when `temp_id` is unknown.
    pub fn confirm(&mut self, temp_id: &str, domain_id: &str) -> bool {
        let Some(pos) = self.messages.iter().position(|m| m.id == temp_id) else {
            return false;
        };
        if self.contains(domain_id) {
            self.messages.remove(pos);
        } else {
            self.messages[pos].id = domain_id.to_string();
        }
        true
    }

    /// The send failed: remove the temporary entry.
    pub fn retract(&mut self, temp_id: &str) -> Option<ChatMessageView> {
        let pos = self.messages.iter().position(|m| m.id == temp_id)?;
        Some(self.messages.remove(pos))
    }

    /// A message arrived over the feed. Returns false if it was already shown.
    pub fn apply_remote(&mut self, message: ChatMessageView) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Number of messages still waiting for confirmation.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.id.starts_with(TEMP_PREFIX))
            .count()
    }
}

/// Blocks sending after the server reported a cooldown.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    period: Duration,
    until: Option<DateTime<Utc>>,
}

impl CooldownGate {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            until: None,
        }
    }

    /// Record a rejected send. Triggers on HTTP 429 or code `COOLDOWN`.
    /// Returns whether the cooldown started.
    pub fn observe(&mut self, status: u16, code: Option<&str>, now: DateTime<Utc>) -> bool {
        if status != 429 && code != Some("COOLDOWN") {
            return false;
        }
        let period = chrono::Duration::from_std(self.period).unwrap_or(chrono::Duration::MAX);
        self.until = now.checked_add_signed(period);
        true
    }

    /// Time left before sending is allowed again.
    pub fn remaining(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        let until = self.until?;
        match (until - now).to_std() {
            Ok(left) if !left.is_zero() => Some(left),
            _ => {
                self.until = None;
                None
            }
        }
    }

    pub fn is_blocked(&mut self, now: DateTime<Utc>) -> bool {
        self.remaining(now).is_some()
    }
}
