// src/models/proof.rs
//! Presentation payload model.
//!
//! A `Proof` is the format-specific payload a prover returns for a proof
//! request. The cryptographic material itself is opaque to the engine
//! (it is produced and checked by the holder/verifier collaborators);
//! the engine only inspects the revealed values and the identifiers that
//! reference ledger objects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One revealed attribute value inside a presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedAttribute {
    /// Index into `Proof::identifiers` of the credential that revealed
    /// this value
    pub sub_proof_index: usize,
    /// The attribute value as issued
    pub raw: String,
    /// Canonical numeric encoding of `raw`; re-checked on verification
    pub encoded: String,
}

/// A revealed attribute group (several values from one credential).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedAttributeGroup {
    pub sub_proof_index: usize,
    /// Attribute name -> revealed value
    pub values: BTreeMap<String, RevealedAttributeValue>,
}

/// Raw/encoded pair inside a revealed attribute group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedAttributeValue {
    pub raw: String,
    pub encoded: String,
}

/// A predicate that was proven without revealing the underlying value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenPredicate {
    pub sub_proof_index: usize,
}

/// The non-cryptographic part of a presentation: which referents were
/// answered and how.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedProof {
    /// Attribute referent -> revealed value
    #[serde(default)]
    pub revealed_attrs: BTreeMap<String, RevealedAttribute>,
    /// Attribute referent -> revealed group
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub revealed_attr_groups: BTreeMap<String, RevealedAttributeGroup>,
    /// Attribute referent -> self-attested value (no credential backing)
    #[serde(default)]
    pub self_attested_attrs: BTreeMap<String, String>,
    /// Attribute referent -> unrevealed reference
    #[serde(default)]
    pub unrevealed_attrs: BTreeMap<String, ProvenPredicate>,
    /// Predicate referent -> proven predicate
    #[serde(default)]
    pub predicates: BTreeMap<String, ProvenPredicate>,
}

/// Ledger identifiers of one credential used in a presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofIdentifier {
    pub schema_id: String,
    pub cred_def_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rev_reg_id: Option<String>,
    /// Timestamp of the revocation status list the non-revocation proof
    /// was built against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// A complete presentation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Opaque cryptographic proof material, checked by the verifier
    /// collaborator
    pub proof: serde_json::Value,
    pub requested_proof: RequestedProof,
    /// One entry per credential used, referenced by `sub_proof_index`
    pub identifiers: Vec<ProofIdentifier>,
}

impl Proof {
    /// The identifier a revealed item points at, if the index is valid.
    pub fn identifier_at(&self, sub_proof_index: usize) -> Option<&ProofIdentifier> {
        self.identifiers.get(sub_proof_index)
    }

    /// Distinct schema ids referenced by this presentation.
    pub fn schema_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.identifiers.iter().map(|i| i.schema_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Distinct credential definition ids referenced by this
    /// presentation.
    pub fn cred_def_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .identifiers
            .iter()
            .map(|i| i.cred_def_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
