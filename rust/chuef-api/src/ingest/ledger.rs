//! Two-phase write of an input and its domain row.
//!
//! The input row is written first, then the domain row that references it.
//! If the domain insert fails the input is deleted once. There is no retry
//! and no transaction; a failed delete leaves an orphaned input, which is
//! logged.

use std::sync::Arc;

use uuid::Uuid;

use crate::database::{
    ChatMessageRecord, ContactSubmissionRecord, InputStore, NewChatMessage, NewContactSubmission,
    NewInput, StoreError,
};

/// Domain row to write once the input exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingDomain {
    ChatMessage {
        user_id: Uuid,
        room: String,
        text: String,
    },
    ContactSubmission {
        email: String,
        message: String,
    },
}

/// A written domain row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainRecord {
    ChatMessage(ChatMessageRecord),
    ContactSubmission(ContactSubmissionRecord),
}

impl DomainRecord {
    #[must_use]
    pub fn id(&self) -> Uuid {
        match self {
            Self::ChatMessage(r) => r.id,
            Self::ContactSubmission(r) => r.id,
        }
    }
}

/// Both rows of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    pub input_id: Uuid,
    pub domain: DomainRecord,
}

#[derive(Debug, Clone)]
pub enum LedgerError {
    /// The input insert failed. Nothing was written.
    Input(StoreError),
    /// The domain insert failed after the input was written.
    Domain {
        source: StoreError,
        /// Whether the compensating delete succeeded.
        compensated: bool,
    },
}

/// Writes inputs and their domain rows through an [`InputStore`].
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn InputStore>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl Ledger {
    #[must_use]
    pub fn new(store: Arc<dyn InputStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        input: NewInput,
        domain: PendingDomain,
    ) -> Result<Committed, LedgerError> {
        let input_id = self
            .store
            .insert_input(&input)
            .await
            .map_err(LedgerError::Input)?;

        let written = match domain {
            PendingDomain::ChatMessage {
                user_id,
                room,
                text,
            } => self
                .store
                .insert_chat_message(&NewChatMessage {
                    input_id,
                    user_id,
                    room,
                    text,
                })
                .await
                .map(DomainRecord::ChatMessage),
            PendingDomain::ContactSubmission { email, message } => self
                .store
                .insert_contact_submission(&NewContactSubmission {
                    input_id,
                    email,
                    message,
                })
                .await
                .map(DomainRecord::ContactSubmission),
        };

        match written {
            Ok(domain) => Ok(Committed { input_id, domain }),
            Err(source) => {
                let compensated = match self.store.delete_input(input_id).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::error!(
                            input_id = %input_id,
                            error = %e,
                            "Compensating delete failed, input row orphaned"
                        );
                        false
                    }
                };
                tracing::warn!(
                    input_id = %input_id,
                    kind = %input.kind,
                    error = %source,
                    compensated,
                    "Domain insert failed"
                );
                Err(LedgerError::Domain {
                    source,
                    compensated,
                })
            }
        }
    }
}
