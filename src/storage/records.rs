// src/storage/records.rs
//! Exchange record repository.

use crate::error::ProofError;
use crate::protocol::record::ProofExchangeRecord;
use crate::protocol::state::ProofRole;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// CRUD over proof exchange records, keyed by id and by
/// `(thread_id, role, connection_id)`.
#[async_trait]
pub trait ProofRepository: Send + Sync {
    /// Persists a new record.
    ///
    /// # Errors
    /// `ProofError::Storage` if a record with the same id already
    /// exists.
    async fn save(&self, record: &ProofExchangeRecord) -> Result<(), ProofError>;

    /// Persists changes to an existing record.
    async fn update(&self, record: &ProofExchangeRecord) -> Result<(), ProofError>;

    /// Fetches a record by id.
    async fn get_by_id(&self, record_id: &str) -> Result<ProofExchangeRecord, ProofError>;

    /// Finds the record of an exchange by thread and role.
    ///
    /// When `connection_id` is given, only a record bound to that
    /// connection matches: for connection-oriented exchanges exactly one
    /// record exists per `(thread_id, role)` pair, while connection-less
    /// exchanges need the additional constraint.
    ///
    /// # Errors
    /// `ProofError::Storage` if more than one record matches.
    async fn find_by_thread_and_role(
        &self,
        thread_id: &str,
        role: ProofRole,
        connection_id: Option<&str>,
    ) -> Result<Option<ProofExchangeRecord>, ProofError>;
}

/// In-memory record repository reference implementation.
#[derive(Default)]
pub struct InMemoryProofRepository {
    records: RwLock<BTreeMap<String, ProofExchangeRecord>>,
}

impl InMemoryProofRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProofRepository for InMemoryProofRepository {
    async fn save(&self, record: &ProofExchangeRecord) -> Result<(), ProofError> {
        let mut records = self.records.write().await;
        if records.contains_key(record.id()) {
            return Err(ProofError::Storage(format!(
                "record `{}` already exists",
                record.id()
            )));
        }
        records.insert(record.id().to_string(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &ProofExchangeRecord) -> Result<(), ProofError> {
        let mut records = self.records.write().await;
        match records.get_mut(record.id()) {
            Some(stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(ProofError::NotFound(format!(
                "record `{}` does not exist",
                record.id()
            ))),
        }
    }

    async fn get_by_id(&self, record_id: &str) -> Result<ProofExchangeRecord, ProofError> {
        self.records
            .read()
            .await
            .get(record_id)
            .cloned()
            .ok_or_else(|| ProofError::NotFound(format!("record `{}` does not exist", record_id)))
    }

    async fn find_by_thread_and_role(
        &self,
        thread_id: &str,
        role: ProofRole,
        connection_id: Option<&str>,
    ) -> Result<Option<ProofExchangeRecord>, ProofError> {
        let records = self.records.read().await;
        let mut matches = records.values().filter(|r| {
            r.thread_id == thread_id
                && r.role() == role
                && match connection_id {
                    Some(id) => r.connection_id.as_deref() == Some(id),
                    None => true,
                }
        });

        let first = matches.next().cloned();
        if matches.next().is_some() {
            return Err(ProofError::Storage(format!(
                "multiple proof records found for thread id {}",
                thread_id
            )));
        }
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ProtocolVersion;
    use crate::protocol::state::ProofState;

    fn record(thread_id: &str, role: ProofRole) -> ProofExchangeRecord {
        let state = match role {
            ProofRole::Prover => ProofState::ProposalSent,
            ProofRole::Verifier => ProofState::ProposalReceived,
        };
        ProofExchangeRecord::new(role, ProtocolVersion::V1, state, thread_id).unwrap()
    }

    #[test]
    fn test_save_then_find_by_thread_and_role() {
        tokio_test::block_on(async {
            let repository = InMemoryProofRepository::new();
            let stored = record("thread-1", ProofRole::Prover);
            repository.save(&stored).await.unwrap();

            let found = repository
                .find_by_thread_and_role("thread-1", ProofRole::Prover, None)
                .await
                .unwrap();
            assert_eq!(found.as_ref().map(|r| r.id()), Some(stored.id()));

            // The verifier-side record of the same thread is distinct
            let missing = repository
                .find_by_thread_and_role("thread-1", ProofRole::Verifier, None)
                .await
                .unwrap();
            assert!(missing.is_none());
        });
    }

    #[test]
    fn test_connection_filter_applies() {
        tokio_test::block_on(async {
            let repository = InMemoryProofRepository::new();
            let mut stored = record("thread-2", ProofRole::Verifier);
            stored.connection_id = Some("conn-1".to_string());
            repository.save(&stored).await.unwrap();

            let hit = repository
                .find_by_thread_and_role("thread-2", ProofRole::Verifier, Some("conn-1"))
                .await
                .unwrap();
            assert!(hit.is_some());

            let miss = repository
                .find_by_thread_and_role("thread-2", ProofRole::Verifier, Some("conn-9"))
                .await
                .unwrap();
            assert!(miss.is_none());
        });
    }

    #[test]
    fn test_double_save_is_rejected() {
        tokio_test::block_on(async {
            let repository = InMemoryProofRepository::new();
            let stored = record("thread-3", ProofRole::Prover);
            repository.save(&stored).await.unwrap();
            assert!(repository.save(&stored).await.is_err());
        });
    }

    #[test]
    fn test_update_requires_existing_record() {
        tokio_test::block_on(async {
            let repository = InMemoryProofRepository::new();
            let stored = record("thread-4", ProofRole::Prover);
            assert!(matches!(
                repository.update(&stored).await,
                Err(ProofError::NotFound(_))
            ));
        });
    }
}
