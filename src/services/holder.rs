// src/services/holder.rs
//! Holder crypto-service collaborator.
//!
//! The holder service owns the credential wallet and the proof
//! construction cryptography. The engine treats both as external: it
//! queries candidates, asks for nonces and hands over a proof request
//! plus selection to receive an opaque proof payload.
//!
//! `InMemoryHolder` is the reference implementation used by tests. Its
//! "proofs" carry no cryptographic material beyond the request nonce, but
//! they are structurally faithful: revealed values, canonical encodings,
//! sub-proof indices and ledger identifiers all line up the way a real
//! holder's output does.

use crate::error::ProofError;
use crate::models::{
    CredentialCandidate, CredentialInfo, Proof, ProofIdentifier, ProofRequest, RequestedProof,
    Restriction, RevealedAttribute, SelectedCredentials,
};
use crate::models::proof::{ProvenPredicate, RevealedAttributeGroup, RevealedAttributeValue};
use crate::models::proof_request::PredicateType;
use crate::services::LedgerObjects;
use crate::utils::encoding::encode_credential_value;
use async_trait::async_trait;
use rand::Rng;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Holder-side cryptographic operations consumed by the engine.
#[async_trait]
pub trait HolderService: Send + Sync {
    /// Generates a fresh proof-request nonce.
    ///
    /// Nonces are single-use; the engine calls this on every request
    /// construction and never caches the result.
    async fn generate_nonce(&self) -> Result<String, ProofError>;

    /// Returns all stored credentials satisfying the restrictions of one
    /// referent of `request`, in wallet order.
    async fn get_credentials_for_proof_request(
        &self,
        request: &ProofRequest,
        referent: &str,
    ) -> Result<Vec<CredentialCandidate>, ProofError>;

    /// Fetches one stored credential by wallet id.
    async fn get_credential(&self, credential_id: &str) -> Result<CredentialInfo, ProofError>;

    /// Builds the cryptographic proof for `request` from the selected
    /// credentials.
    async fn create_proof(
        &self,
        request: &ProofRequest,
        selection: &SelectedCredentials,
        ledger_objects: &LedgerObjects,
    ) -> Result<Proof, ProofError>;
}

/// In-memory wallet and proof builder, the reference implementation.
#[derive(Default)]
pub struct InMemoryHolder {
    /// Wallet-local credential id -> stored credential
    credentials: RwLock<BTreeMap<String, CredentialInfo>>,
}

impl InMemoryHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a credential in the wallet, overwriting any credential
    /// with the same id.
    pub async fn store_credential(&self, credential: CredentialInfo) {
        self.credentials
            .write()
            .await
            .insert(credential.credential_id.clone(), credential);
    }

    /// Removes a credential; returns whether it was present.
    pub async fn remove_credential(&self, credential_id: &str) -> bool {
        self.credentials.write().await.remove(credential_id).is_some()
    }

    /// Number of stored credentials.
    pub async fn count_credentials(&self) -> usize {
        self.credentials.read().await.len()
    }

    fn matches_restrictions(restrictions: Option<&[Restriction]>, info: &CredentialInfo) -> bool {
        let Some(restrictions) = restrictions else {
            return true;
        };
        if restrictions.is_empty() {
            return true;
        }
        // A restriction list is a disjunction; each restriction is a
        // conjunction of its constraints.
        restrictions
            .iter()
            .any(|restriction| Self::matches_restriction(restriction, info))
    }

    fn matches_restriction(restriction: &Restriction, info: &CredentialInfo) -> bool {
        // Indy-style identifiers: schema id `<did>:2:<name>:<version>`,
        // credential definition id `<did>:3:CL:<seq>:<tag>`.
        let schema_parts: Vec<&str> = info.schema_id.split(':').collect();
        let schema_issuer = schema_parts.first().copied();
        let schema_name = schema_parts.get(2).copied();
        let schema_version = schema_parts.get(3).copied();
        let issuer = info.cred_def_id.split(':').next();

        let field_ok = |expected: &Option<String>, actual: Option<&str>| match expected {
            Some(value) => actual == Some(value.as_str()),
            None => true,
        };

        field_ok(&restriction.schema_id, Some(info.schema_id.as_str()))
            && field_ok(&restriction.cred_def_id, Some(info.cred_def_id.as_str()))
            && field_ok(&restriction.schema_issuer_did, schema_issuer)
            && field_ok(&restriction.schema_name, schema_name)
            && field_ok(&restriction.schema_version, schema_version)
            && field_ok(&restriction.issuer_did, issuer)
            && restriction.attribute_values.iter().all(|(name, value)| {
                info.attributes.get(name).map(String::as_str) == Some(value.as_str())
            })
            && restriction.attribute_markers.iter().all(|(name, marker)| {
                info.attributes.contains_key(name) == *marker
            })
    }
}

#[async_trait]
impl HolderService for InMemoryHolder {
    async fn generate_nonce(&self) -> Result<String, ProofError> {
        // Decimal nonce, leading digit non-zero
        let mut rng = rand::thread_rng();
        let mut nonce = String::with_capacity(24);
        nonce.push(char::from(b'1' + rng.gen_range(0..9)));
        for _ in 1..24 {
            nonce.push(char::from(b'0' + rng.gen_range(0..10)));
        }
        Ok(nonce)
    }

    async fn get_credentials_for_proof_request(
        &self,
        request: &ProofRequest,
        referent: &str,
    ) -> Result<Vec<CredentialCandidate>, ProofError> {
        let credentials = self.credentials.read().await;

        let (names, restrictions, interval) =
            if let Some(attribute) = request.requested_attributes.get(referent) {
                (
                    attribute
                        .attribute_names()
                        .iter()
                        .map(|n| n.to_string())
                        .collect::<Vec<_>>(),
                    attribute.restrictions.clone(),
                    request.effective_interval(attribute.non_revoked.as_ref()),
                )
            } else if let Some(predicate) = request.requested_predicates.get(referent) {
                (
                    vec![predicate.name.clone()],
                    predicate.restrictions.clone(),
                    request.effective_interval(predicate.non_revoked.as_ref()),
                )
            } else {
                return Err(ProofError::Holder(format!(
                    "proof request has no referent `{}`",
                    referent
                )));
            };

        let is_predicate = request.requested_predicates.contains_key(referent);

        let candidates = credentials
            .values()
            .filter(|info| names.iter().all(|name| info.attributes.contains_key(name)))
            .filter(|info| {
                // Predicate referents additionally need a numeric value
                !is_predicate
                    || names
                        .iter()
                        .all(|name| info.attributes[name].parse::<i64>().is_ok())
            })
            .filter(|info| Self::matches_restrictions(restrictions.as_deref(), *info))
            .map(|info| CredentialCandidate {
                credential_info: info.clone(),
                interval,
            })
            .collect();

        Ok(candidates)
    }

    async fn get_credential(&self, credential_id: &str) -> Result<CredentialInfo, ProofError> {
        self.credentials
            .read()
            .await
            .get(credential_id)
            .cloned()
            .ok_or_else(|| ProofError::Holder(format!("credential `{}` not found", credential_id)))
    }

    async fn create_proof(
        &self,
        request: &ProofRequest,
        selection: &SelectedCredentials,
        _ledger_objects: &LedgerObjects,
    ) -> Result<Proof, ProofError> {
        let mut identifiers: Vec<ProofIdentifier> = Vec::new();
        let mut index_by_credential: BTreeMap<String, usize> = BTreeMap::new();
        let mut requested_proof = RequestedProof::default();

        let mut sub_proof_index = |info: &CredentialInfo, timestamp: Option<i64>| -> usize {
            if let Some(index) = index_by_credential.get(&info.credential_id) {
                return *index;
            }
            let index = identifiers.len();
            identifiers.push(ProofIdentifier {
                schema_id: info.schema_id.clone(),
                cred_def_id: info.cred_def_id.clone(),
                rev_reg_id: info.revocation_registry_id.clone(),
                timestamp,
            });
            index_by_credential.insert(info.credential_id.clone(), index);
            index
        };

        for (referent, chosen) in &selection.attributes {
            let requested = request.requested_attributes.get(referent).ok_or_else(|| {
                ProofError::Holder(format!("selection references unknown referent `{}`", referent))
            })?;
            let info = &chosen.credential_info;
            let index = sub_proof_index(info, chosen.timestamp);

            let value_of = |name: &str| -> Result<String, ProofError> {
                info.attributes.get(name).cloned().ok_or_else(|| {
                    ProofError::Holder(format!(
                        "credential `{}` has no attribute `{}`",
                        info.credential_id, name
                    ))
                })
            };

            if !chosen.revealed {
                requested_proof
                    .unrevealed_attrs
                    .insert(referent.clone(), ProvenPredicate { sub_proof_index: index });
                continue;
            }

            match (&requested.name, &requested.names) {
                (Some(name), _) => {
                    let raw = value_of(name)?;
                    requested_proof.revealed_attrs.insert(
                        referent.clone(),
                        RevealedAttribute {
                            sub_proof_index: index,
                            encoded: encode_credential_value(&raw),
                            raw,
                        },
                    );
                }
                (None, Some(names)) => {
                    let mut values = BTreeMap::new();
                    for name in names {
                        let raw = value_of(name)?;
                        values.insert(
                            name.clone(),
                            RevealedAttributeValue {
                                encoded: encode_credential_value(&raw),
                                raw,
                            },
                        );
                    }
                    requested_proof.revealed_attr_groups.insert(
                        referent.clone(),
                        RevealedAttributeGroup {
                            sub_proof_index: index,
                            values,
                        },
                    );
                }
                (None, None) => {
                    return Err(ProofError::Holder(format!(
                        "requested attribute `{}` names nothing to reveal",
                        referent
                    )))
                }
            }
        }

        for (referent, chosen) in &selection.predicates {
            let requested = request.requested_predicates.get(referent).ok_or_else(|| {
                ProofError::Holder(format!("selection references unknown referent `{}`", referent))
            })?;
            let info = &chosen.credential_info;

            let raw = info.attributes.get(&requested.name).ok_or_else(|| {
                ProofError::Holder(format!(
                    "credential `{}` has no attribute `{}`",
                    info.credential_id, requested.name
                ))
            })?;
            let value: i64 = raw.parse().map_err(|_| {
                ProofError::Holder(format!(
                    "attribute `{}` is not numeric, cannot prove predicate",
                    requested.name
                ))
            })?;
            let satisfied = match requested.p_type {
                PredicateType::GreaterThanOrEqual => value >= requested.p_value,
                PredicateType::GreaterThan => value > requested.p_value,
                PredicateType::LessThanOrEqual => value <= requested.p_value,
                PredicateType::LessThan => value < requested.p_value,
            };
            if !satisfied {
                return Err(ProofError::Holder(format!(
                    "credential `{}` does not satisfy predicate `{} {} {}`",
                    info.credential_id, requested.name, requested.p_type, requested.p_value
                )));
            }

            let index = sub_proof_index(info, chosen.timestamp);
            requested_proof
                .predicates
                .insert(referent.clone(), ProvenPredicate { sub_proof_index: index });
        }

        for (referent, value) in &selection.self_attested {
            requested_proof
                .self_attested_attrs
                .insert(referent.clone(), value.clone());
        }

        Ok(Proof {
            // Test-double proof material: binds the proof to the request
            // nonce so the reference verifier can check freshness
            proof: serde_json::json!({ "nonce": request.nonce }),
            requested_proof,
            identifiers,
        })
    }
}
