// src/services/connection.rs
//! Connection/transport collaborator.
//!
//! DID/connection resolution and transport-level encryption live outside
//! the engine; what the engine needs is (a) an assertion that a
//! connection is usable before sending over it and (b) an assertion that
//! an inbound message is attributable to the expected counterparty —
//! either the record's connection, or for connection-less exchanges the
//! keys advertised in the `~service` block of the message previously
//! sent on the thread.

use crate::error::ProofError;
use crate::messages::ServiceDecorator;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::RwLock;

/// Everything known about the sender of an inbound message, together
/// with what the record expects.
#[derive(Debug, Clone, Default)]
pub struct SenderAssertion {
    /// Connection the transport authenticated the message on, if any
    pub connection_id: Option<String>,
    /// Sender verification key, when delivered connection-less
    pub sender_key: Option<String>,
    /// Key the message was addressed to, when delivered connection-less
    pub recipient_key: Option<String>,
    /// Connection the exchange record is bound to, if any
    pub expected_connection_id: Option<String>,
    /// `~service` block of the message we previously sent on the thread
    pub our_service: Option<ServiceDecorator>,
}

/// Connection readiness and sender-authorization checks.
#[async_trait]
pub trait ConnectionService: Send + Sync {
    /// Asserts that a connection is complete and usable.
    async fn assert_ready(&self, connection_id: &str) -> Result<(), ProofError>;

    /// Asserts that an inbound message is attributable to the expected
    /// counterparty.
    ///
    /// # Errors
    /// `ProofError::UnauthorizedSender` when attribution fails; this is
    /// never auto-recovered.
    async fn assert_authorized_sender(&self, assertion: &SenderAssertion)
        -> Result<(), ProofError>;
}

/// In-memory connection registry reference implementation.
#[derive(Default)]
pub struct InMemoryConnectionService {
    ready: RwLock<BTreeSet<String>>,
}

impl InMemoryConnectionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a connection as complete.
    pub async fn add_connection(&self, connection_id: impl Into<String>) {
        self.ready.write().await.insert(connection_id.into());
    }
}

#[async_trait]
impl ConnectionService for InMemoryConnectionService {
    async fn assert_ready(&self, connection_id: &str) -> Result<(), ProofError> {
        if self.ready.read().await.contains(connection_id) {
            Ok(())
        } else {
            Err(ProofError::UnauthorizedSender(format!(
                "connection `{}` is not ready",
                connection_id
            )))
        }
    }

    async fn assert_authorized_sender(
        &self,
        assertion: &SenderAssertion,
    ) -> Result<(), ProofError> {
        // Connection-bound exchange: the transport must have
        // authenticated the exact connection on the record.
        if let Some(expected) = &assertion.expected_connection_id {
            return match &assertion.connection_id {
                Some(actual) if actual == expected => Ok(()),
                Some(actual) => Err(ProofError::UnauthorizedSender(format!(
                    "message arrived on connection `{}`, record is bound to `{}`",
                    actual, expected
                ))),
                None => Err(ProofError::UnauthorizedSender(format!(
                    "record is bound to connection `{}` but message carried no connection",
                    expected
                ))),
            };
        }

        // Connection-less exchange: the message must be addressed to a
        // key we advertised in the `~service` block of our previous
        // message on the thread.
        if let Some(service) = &assertion.our_service {
            let Some(recipient_key) = &assertion.recipient_key else {
                return Err(ProofError::UnauthorizedSender(
                    "connection-less message carried no recipient key".to_string(),
                ));
            };
            if !service.recipient_keys.contains(recipient_key) {
                return Err(ProofError::UnauthorizedSender(format!(
                    "recipient key `{}` does not match the advertised service keys",
                    recipient_key
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_bound_sender_must_match() {
        let service = InMemoryConnectionService::new();

        let ok = SenderAssertion {
            connection_id: Some("conn-1".to_string()),
            expected_connection_id: Some("conn-1".to_string()),
            ..Default::default()
        };
        assert!(service.assert_authorized_sender(&ok).await.is_ok());

        let wrong = SenderAssertion {
            connection_id: Some("conn-2".to_string()),
            expected_connection_id: Some("conn-1".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            service.assert_authorized_sender(&wrong).await,
            Err(ProofError::UnauthorizedSender(_))
        ));
    }

    #[tokio::test]
    async fn test_connectionless_sender_checked_against_service_block() {
        let service = InMemoryConnectionService::new();
        let our_service = ServiceDecorator {
            recipient_keys: vec!["verkey-1".to_string()],
            routing_keys: vec![],
            service_endpoint: "https://agent.example.org".to_string(),
        };

        let ok = SenderAssertion {
            recipient_key: Some("verkey-1".to_string()),
            our_service: Some(our_service.clone()),
            ..Default::default()
        };
        assert!(service.assert_authorized_sender(&ok).await.is_ok());

        let wrong = SenderAssertion {
            recipient_key: Some("verkey-9".to_string()),
            our_service: Some(our_service),
            ..Default::default()
        };
        assert!(matches!(
            service.assert_authorized_sender(&wrong).await,
            Err(ProofError::UnauthorizedSender(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_connection_is_not_ready() {
        let service = InMemoryConnectionService::new();
        service.add_connection("conn-1").await;
        assert!(service.assert_ready("conn-1").await.is_ok());
        assert!(service.assert_ready("conn-2").await.is_err());
    }
}
