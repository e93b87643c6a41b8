// src/storage/messages.rs
//! Protocol message log.
//!
//! Every inbound and outbound protocol message is stored keyed by
//! `(record id, sender role, message class)`: later protocol steps
//! re-read earlier messages, e.g. to compare a proposal against a
//! request or to rebuild a request from a proposal preview.
//!
//! The log is append-only per key. During renegotiation a new message of
//! the same class is appended under the same key; lookups that mean "the
//! current one" return the most recently saved instance, while
//! `message_history` enumerates all instances for audit.

use crate::error::ProofError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::RwLock;

/// Class of a stored protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageClass {
    Proposal,
    Request,
    Presentation,
    Ack,
    ProblemReport,
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageClass::Proposal => "proposal",
            MessageClass::Request => "request",
            MessageClass::Presentation => "presentation",
            MessageClass::Ack => "ack",
            MessageClass::ProblemReport => "problem-report",
        };
        write!(f, "{}", s)
    }
}

/// Whether this agent sent or received the stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageRole {
    Sender,
    Receiver,
}

/// One stored protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub record_id: String,
    pub role: MessageRole,
    pub class: MessageClass,
    /// The serialized message payload
    pub message: serde_json::Value,
}

/// The message-log contract.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Appends a message under `(record_id, role, class)`. An existing
    /// instance of the same class is kept in history; the new instance
    /// becomes "the current one".
    async fn save_message(
        &self,
        record_id: &str,
        role: MessageRole,
        class: MessageClass,
        message: serde_json::Value,
    ) -> Result<(), ProofError>;

    /// The most recently saved instance, if any. Used where absence is a
    /// legitimate branch.
    async fn find_message(
        &self,
        record_id: &str,
        class: MessageClass,
        role: Option<MessageRole>,
    ) -> Result<Option<serde_json::Value>, ProofError>;

    /// All saved instances, oldest first. Used for audit.
    async fn message_history(
        &self,
        record_id: &str,
        class: MessageClass,
        role: Option<MessageRole>,
    ) -> Result<Vec<serde_json::Value>, ProofError>;

    /// The most recently saved instance, erroring when absent. Used
    /// where a prior message is structurally required.
    async fn get_message(
        &self,
        record_id: &str,
        class: MessageClass,
        role: Option<MessageRole>,
    ) -> Result<serde_json::Value, ProofError> {
        self.find_message(record_id, class, role)
            .await?
            .ok_or_else(|| {
                ProofError::NotFound(format!(
                    "no {} message stored for record `{}`",
                    class, record_id
                ))
            })
    }
}

/// In-memory message log reference implementation.
#[derive(Default)]
pub struct InMemoryMessageRepository {
    /// Record id -> append-ordered stored messages
    messages: RwLock<BTreeMap<String, Vec<StoredMessage>>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn save_message(
        &self,
        record_id: &str,
        role: MessageRole,
        class: MessageClass,
        message: serde_json::Value,
    ) -> Result<(), ProofError> {
        self.messages
            .write()
            .await
            .entry(record_id.to_string())
            .or_default()
            .push(StoredMessage {
                record_id: record_id.to_string(),
                role,
                class,
                message,
            });
        Ok(())
    }

    async fn find_message(
        &self,
        record_id: &str,
        class: MessageClass,
        role: Option<MessageRole>,
    ) -> Result<Option<serde_json::Value>, ProofError> {
        let messages = self.messages.read().await;
        Ok(messages.get(record_id).and_then(|entries| {
            entries
                .iter()
                .rev()
                .find(|m| m.class == class && role.map_or(true, |r| m.role == r))
                .map(|m| m.message.clone())
        }))
    }

    async fn message_history(
        &self,
        record_id: &str,
        class: MessageClass,
        role: Option<MessageRole>,
    ) -> Result<Vec<serde_json::Value>, ProofError> {
        let messages = self.messages.read().await;
        Ok(messages
            .get(record_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|m| m.class == class && role.map_or(true, |r| m.role == r))
                    .map(|m| m.message.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_latest_instance_wins() {
        tokio_test::block_on(async {
            let log = InMemoryMessageRepository::new();
            log.save_message("rec-1", MessageRole::Sender, MessageClass::Request, json!({"n": 1}))
                .await
                .unwrap();
            log.save_message("rec-1", MessageRole::Sender, MessageClass::Request, json!({"n": 2}))
                .await
                .unwrap();

            let current = log
                .get_message("rec-1", MessageClass::Request, Some(MessageRole::Sender))
                .await
                .unwrap();
            assert_eq!(current, json!({"n": 2}));
        });
    }

    #[test]
    fn test_history_keeps_every_instance_in_order() {
        tokio_test::block_on(async {
            let log = InMemoryMessageRepository::new();
            for n in 1..=3 {
                log.save_message(
                    "rec-1",
                    MessageRole::Receiver,
                    MessageClass::Proposal,
                    json!({ "n": n }),
                )
                .await
                .unwrap();
            }

            let history = log
                .message_history("rec-1", MessageClass::Proposal, None)
                .await
                .unwrap();
            assert_eq!(history, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
        });
    }

    #[test]
    fn test_role_filter_distinguishes_directions() {
        tokio_test::block_on(async {
            let log = InMemoryMessageRepository::new();
            log.save_message("rec-1", MessageRole::Sender, MessageClass::Proposal, json!({"d": "out"}))
                .await
                .unwrap();
            log.save_message("rec-1", MessageRole::Receiver, MessageClass::Proposal, json!({"d": "in"}))
                .await
                .unwrap();

            let sent = log
                .find_message("rec-1", MessageClass::Proposal, Some(MessageRole::Sender))
                .await
                .unwrap();
            assert_eq!(sent, Some(json!({"d": "out"})));
        });
    }

    #[test]
    fn test_get_message_errors_when_absent() {
        tokio_test::block_on(async {
            let log = InMemoryMessageRepository::new();
            assert!(matches!(
                log.get_message("rec-9", MessageClass::Request, None).await,
                Err(ProofError::NotFound(_))
            ));
        });
    }
}
