// src/services/verifier.rs
//! Verifier crypto-service collaborator.
//!
//! Cryptographic verification of a presentation is external to the
//! engine. The engine resolves the ledger material the proof references
//! and hands everything to this service; the boolean it returns is the
//! only signal the state machine acts on.

use crate::error::ProofError;
use crate::models::{Proof, ProofRequest};
use crate::services::LedgerObjects;
use async_trait::async_trait;

/// Verifier-side cryptographic operations consumed by the engine.
#[async_trait]
pub trait VerifierService: Send + Sync {
    /// Verifies `proof` against `request` using the resolved ledger
    /// material.
    ///
    /// # Returns
    /// - `Ok(true)` if the proof is cryptographically valid
    /// - `Ok(false)` if it is well-formed but invalid
    /// - `Err` for infrastructure failures only, never for an invalid
    ///   proof
    async fn verify_proof(
        &self,
        request: &ProofRequest,
        proof: &Proof,
        ledger_objects: &LedgerObjects,
    ) -> Result<bool, ProofError>;
}

/// Reference verifier matching `InMemoryHolder`'s proof material: valid
/// when the proof is bound to the request nonce and every answered
/// referent exists in the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryVerifier;

impl InMemoryVerifier {
    pub fn new() -> Self {
        InMemoryVerifier
    }
}

#[async_trait]
impl VerifierService for InMemoryVerifier {
    async fn verify_proof(
        &self,
        request: &ProofRequest,
        proof: &Proof,
        _ledger_objects: &LedgerObjects,
    ) -> Result<bool, ProofError> {
        // Nonce binding: a proof built for another request (replayed or
        // stale) carries a different nonce.
        if proof.proof.get("nonce").and_then(|n| n.as_str()) != Some(request.nonce.as_str()) {
            return Ok(false);
        }

        let answered_attributes = proof
            .requested_proof
            .revealed_attrs
            .keys()
            .chain(proof.requested_proof.revealed_attr_groups.keys())
            .chain(proof.requested_proof.self_attested_attrs.keys())
            .chain(proof.requested_proof.unrevealed_attrs.keys());
        for referent in answered_attributes {
            if !request.requested_attributes.contains_key(referent) {
                return Ok(false);
            }
        }

        for referent in proof.requested_proof.predicates.keys() {
            if !request.requested_predicates.contains_key(referent) {
                return Ok(false);
            }
        }

        Ok(true)
    }
}
