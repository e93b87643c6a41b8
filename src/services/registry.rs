// src/services/registry.rs
//! Ledger/registry lookup collaborator.
//!
//! Schemas, credential definitions and revocation data live on a
//! verifiable data registry. The engine only fetches them; retrieval,
//! caching and transport are the collaborator's concern.

use crate::error::ProofError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// A credential schema as anchored on the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "attrNames")]
    pub attr_names: Vec<String>,
}

/// A credential definition as anchored on the registry. The key material
/// is opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDefinition {
    pub id: String,
    pub schema_id: String,
    pub tag: String,
    pub value: serde_json::Value,
}

/// A revocation registry definition; referenced by revocable
/// credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRegistryDefinition {
    pub id: String,
    pub cred_def_id: String,
    /// Maximum number of credentials the registry can hold
    pub max_cred_num: u32,
}

/// Revocation status of every credential in a registry at one point in
/// time. Index `i` is 1 when the credential at revocation index `i` is
/// revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationStatusList {
    pub revocation_registry_id: String,
    /// Unix timestamp this list was valid at
    pub timestamp: i64,
    pub revocation_list: Vec<u8>,
}

impl RevocationStatusList {
    /// Whether the credential at `index` is revoked in this list.
    pub fn is_revoked(&self, index: u32) -> bool {
        self.revocation_list.get(index as usize).copied() == Some(1)
    }
}

/// Revocation registry material gathered for one proof: definition plus
/// the status lists fetched per timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRegistryState {
    pub definition: RevocationRegistryDefinition,
    /// Timestamp -> status list valid at that time
    pub status_lists: BTreeMap<i64, RevocationStatusList>,
}

/// Revocation registry id -> gathered registry material.
pub type RevocationRegistries = BTreeMap<String, RevocationRegistryState>;

/// Read access to the verifiable data registry.
#[async_trait]
pub trait LedgerRegistry: Send + Sync {
    /// Fetches a schema by id.
    async fn get_schema(&self, schema_id: &str) -> Result<Schema, ProofError>;

    /// Fetches a credential definition by id.
    async fn get_credential_definition(
        &self,
        cred_def_id: &str,
    ) -> Result<CredentialDefinition, ProofError>;

    /// Fetches a revocation registry definition by id.
    async fn get_revocation_registry_definition(
        &self,
        revocation_registry_id: &str,
    ) -> Result<RevocationRegistryDefinition, ProofError>;

    /// Fetches the revocation status list valid at `timestamp`.
    ///
    /// The returned list may carry an earlier timestamp (the last one
    /// anchored before the requested time).
    async fn get_revocation_status_list(
        &self,
        revocation_registry_id: &str,
        timestamp: i64,
    ) -> Result<RevocationStatusList, ProofError>;
}

/// In-memory registry reference implementation.
#[derive(Default)]
pub struct InMemoryLedger {
    schemas: RwLock<BTreeMap<String, Schema>>,
    credential_definitions: RwLock<BTreeMap<String, CredentialDefinition>>,
    revocation_definitions: RwLock<BTreeMap<String, RevocationRegistryDefinition>>,
    /// Registry id -> anchored status lists, ordered by timestamp
    status_lists: RwLock<BTreeMap<String, Vec<RevocationStatusList>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_schema(&self, schema: Schema) {
        self.schemas.write().await.insert(schema.id.clone(), schema);
    }

    pub async fn register_credential_definition(&self, cred_def: CredentialDefinition) {
        self.credential_definitions
            .write()
            .await
            .insert(cred_def.id.clone(), cred_def);
    }

    pub async fn register_revocation_registry(&self, definition: RevocationRegistryDefinition) {
        self.revocation_definitions
            .write()
            .await
            .insert(definition.id.clone(), definition);
    }

    /// Anchors a status list; lists are consulted newest-not-after the
    /// requested timestamp.
    pub async fn anchor_status_list(&self, list: RevocationStatusList) {
        let mut lists = self.status_lists.write().await;
        let entry = lists.entry(list.revocation_registry_id.clone()).or_default();
        entry.push(list);
        entry.sort_by_key(|l| l.timestamp);
    }
}

#[async_trait]
impl LedgerRegistry for InMemoryLedger {
    async fn get_schema(&self, schema_id: &str) -> Result<Schema, ProofError> {
        self.schemas
            .read()
            .await
            .get(schema_id)
            .cloned()
            .ok_or_else(|| ProofError::Ledger(format!("schema not found for id {}", schema_id)))
    }

    async fn get_credential_definition(
        &self,
        cred_def_id: &str,
    ) -> Result<CredentialDefinition, ProofError> {
        self.credential_definitions
            .read()
            .await
            .get(cred_def_id)
            .cloned()
            .ok_or_else(|| {
                ProofError::Ledger(format!(
                    "credential definition not found for id {}",
                    cred_def_id
                ))
            })
    }

    async fn get_revocation_registry_definition(
        &self,
        revocation_registry_id: &str,
    ) -> Result<RevocationRegistryDefinition, ProofError> {
        self.revocation_definitions
            .read()
            .await
            .get(revocation_registry_id)
            .cloned()
            .ok_or_else(|| {
                ProofError::Ledger(format!(
                    "revocation registry not found for id {}",
                    revocation_registry_id
                ))
            })
    }

    async fn get_revocation_status_list(
        &self,
        revocation_registry_id: &str,
        timestamp: i64,
    ) -> Result<RevocationStatusList, ProofError> {
        let lists = self.status_lists.read().await;
        let entry = lists.get(revocation_registry_id).ok_or_else(|| {
            ProofError::Ledger(format!(
                "no revocation status list for registry {}",
                revocation_registry_id
            ))
        })?;

        // Latest list anchored at or before the requested time; fall
        // back to the earliest when the request predates all anchors.
        entry
            .iter()
            .rev()
            .find(|l| l.timestamp <= timestamp)
            .or_else(|| entry.first())
            .cloned()
            .ok_or_else(|| {
                ProofError::Ledger(format!(
                    "no revocation status list for registry {}",
                    revocation_registry_id
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_list(timestamp: i64, bits: Vec<u8>) -> RevocationStatusList {
        RevocationStatusList {
            revocation_registry_id: "revreg:1".to_string(),
            timestamp,
            revocation_list: bits,
        }
    }

    #[test]
    fn test_status_list_lookup_honors_timestamp() {
        tokio_test::block_on(async {
            let ledger = InMemoryLedger::new();
            ledger.anchor_status_list(status_list(100, vec![0, 0])).await;
            ledger.anchor_status_list(status_list(200, vec![0, 1])).await;

            let at_150 = ledger.get_revocation_status_list("revreg:1", 150).await.unwrap();
            assert_eq!(at_150.timestamp, 100);
            assert!(!at_150.is_revoked(1));

            let at_250 = ledger.get_revocation_status_list("revreg:1", 250).await.unwrap();
            assert_eq!(at_250.timestamp, 200);
            assert!(at_250.is_revoked(1));
        });
    }

    #[test]
    fn test_missing_schema_is_a_ledger_error() {
        tokio_test::block_on(async {
            let ledger = InMemoryLedger::new();
            assert!(matches!(
                ledger.get_schema("missing").await,
                Err(ProofError::Ledger(_))
            ));
        });
    }
}
