// src/models/credential.rs
//! Stored-credential views used during credential selection.
//!
//! `CredentialInfo` is the public snapshot of a credential held in the
//! wallet: its attribute values and ledger identifiers, but never any
//! secret material. Selection works entirely on these snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Public snapshot of one stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialInfo {
    /// Wallet-local credential id
    pub credential_id: String,
    /// Attribute name -> raw value
    pub attributes: BTreeMap<String, String>,
    pub schema_id: String,
    pub cred_def_id: String,
    /// Set when the credential is revocable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_registry_id: Option<String>,
    /// Index of this credential in its revocation registry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_revocation_index: Option<u32>,
}

impl CredentialInfo {
    /// Whether a revocation status can exist for this credential at all.
    pub fn is_revocable(&self) -> bool {
        self.revocation_registry_id.is_some() && self.credential_revocation_index.is_some()
    }
}

/// A credential returned by the holder service for one referent, before
/// revocation resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialCandidate {
    pub credential_info: CredentialInfo,
    /// Interval the holder service matched the candidate against, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<crate::models::NonRevokedInterval>,
}

/// One attribute referent's resolved candidate: credential plus
/// revocation status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedAttributeMatch {
    pub credential_id: String,
    /// Whether the value is revealed in the presentation
    pub revealed: bool,
    pub credential_info: CredentialInfo,
    /// `None` when non-revocation was not requested or the credential is
    /// not revocable; `Some(true)` marks a revoked candidate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked: Option<bool>,
    /// Timestamp of the revocation status list consulted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// One predicate referent's resolved candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedPredicateMatch {
    pub credential_id: String,
    pub credential_info: CredentialInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Ranked candidates per referent, the result of
/// `get_credentials_for_request`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsForRequest {
    /// Attribute referent -> candidates, non-revoked first
    pub attributes: BTreeMap<String, Vec<RequestedAttributeMatch>>,
    /// Predicate referent -> candidates, non-revoked first
    pub predicates: BTreeMap<String, Vec<RequestedPredicateMatch>>,
}

/// The concrete credentials chosen to answer a request, the input to
/// proof construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedCredentials {
    /// Attribute referent -> chosen credential
    pub attributes: BTreeMap<String, RequestedAttributeMatch>,
    /// Predicate referent -> chosen credential
    pub predicates: BTreeMap<String, RequestedPredicateMatch>,
    /// Attribute referent -> self-attested value, only legal for
    /// referents without restrictions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub self_attested: BTreeMap<String, String>,
}

impl SelectedCredentials {
    /// Distinct credential ids used across all referents.
    pub fn credential_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .attributes
            .values()
            .map(|m| m.credential_id.as_str())
            .chain(self.predicates.values().map(|m| m.credential_id.as_str()))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Credential snapshots used across all referents, deduplicated by
    /// credential id.
    pub fn credential_infos(&self) -> Vec<&CredentialInfo> {
        let mut seen = Vec::new();
        let mut infos = Vec::new();
        for info in self
            .attributes
            .values()
            .map(|m| &m.credential_info)
            .chain(self.predicates.values().map(|m| &m.credential_info))
        {
            if !seen.contains(&info.credential_id.as_str()) {
                seen.push(info.credential_id.as_str());
                infos.push(info);
            }
        }
        infos
    }
}
