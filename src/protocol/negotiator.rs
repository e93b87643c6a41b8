// src/protocol/negotiator.rs
//! Auto-accept negotiation policy.
//!
//! The negotiator is a pure decision layer: given the configured policy
//! and the content of two payloads it decides whether the engine may
//! respond without external confirmation. All inputs are
//! attacker-controlled message content, so `ContentApproved` only
//! accepts when the new content is provably equivalent to content this
//! party already sent.

use crate::models::proof_request::{RequestedAttribute, RequestedPredicate};
use crate::models::{Proof, ProofIdentifier, ProofRequest, Restriction};
use serde::{Deserialize, Serialize};

/// Auto-accept policy for proof exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoAcceptProof {
    /// Always require explicit acceptance
    #[serde(rename = "never")]
    Never,
    /// Auto-respond only when the content matches what we already sent
    #[serde(rename = "contentApproved")]
    ContentApproved,
    /// Always auto-respond
    #[serde(rename = "always")]
    Always,
}

/// The effective policy: the record override when present, else the
/// global configuration.
pub fn effective_auto_accept(
    record_policy: Option<AutoAcceptProof>,
    global_policy: AutoAcceptProof,
) -> AutoAcceptProof {
    record_policy.unwrap_or(global_policy)
}

/// Compares two proof requests for semantic equality, ignoring the
/// nonce (nonces are expected to differ between a proposal and the
/// request answering it).
///
/// Referent keys are ignored as well: a rebuilt preview generates fresh
/// referents, so attribute groups and predicates are compared as
/// multisets of their content.
pub fn are_proof_requests_equal(a: &ProofRequest, b: &ProofRequest) -> bool {
    if a.non_revoked != b.non_revoked {
        return false;
    }

    let attributes_a: Vec<&RequestedAttribute> = a.requested_attributes.values().collect();
    let attributes_b: Vec<&RequestedAttribute> = b.requested_attributes.values().collect();
    if !multiset_equal(&attributes_a, &attributes_b, attributes_equal) {
        return false;
    }

    let predicates_a: Vec<&RequestedPredicate> = a.requested_predicates.values().collect();
    let predicates_b: Vec<&RequestedPredicate> = b.requested_predicates.values().collect();
    multiset_equal(&predicates_a, &predicates_b, predicates_equal)
}

fn multiset_equal<T: ?Sized>(a: &[&T], b: &[&T], eq: impl Fn(&T, &T) -> bool) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    for item in a {
        let Some(position) = b
            .iter()
            .enumerate()
            .position(|(i, candidate)| !used[i] && eq(*item, *candidate))
        else {
            return false;
        };
        used[position] = true;
    }
    true
}

fn attributes_equal(a: &RequestedAttribute, b: &RequestedAttribute) -> bool {
    let mut names_a: Vec<&str> = a.attribute_names();
    let mut names_b: Vec<&str> = b.attribute_names();
    names_a.sort_unstable();
    names_b.sort_unstable();

    names_a == names_b && a.non_revoked == b.non_revoked
        && restrictions_equal(a.restrictions.as_deref(), b.restrictions.as_deref())
}

fn predicates_equal(a: &RequestedPredicate, b: &RequestedPredicate) -> bool {
    a.name == b.name
        && a.p_type == b.p_type
        && a.p_value == b.p_value
        && a.non_revoked == b.non_revoked
        && restrictions_equal(a.restrictions.as_deref(), b.restrictions.as_deref())
}

fn restrictions_equal(a: Option<&[Restriction]>, b: Option<&[Restriction]>) -> bool {
    // An absent restriction list and an empty one both mean
    // "unrestricted"
    let a = a.unwrap_or(&[]);
    let b = b.unwrap_or(&[]);
    let a: Vec<&Restriction> = a.iter().collect();
    let b: Vec<&Restriction> = b.iter().collect();
    multiset_equal(&a, &b, |x, y| x == y)
}

/// Checks that a presentation answers every requested attribute and
/// predicate of `request`, with each answer backed by an identifier that
/// satisfies the referent's restrictions.
pub fn presentation_satisfies_request(request: &ProofRequest, proof: &Proof) -> bool {
    for (referent, requested) in &request.requested_attributes {
        if !attribute_answered(request, referent, requested, proof) {
            return false;
        }
    }

    for (referent, requested) in &request.requested_predicates {
        let Some(proven) = proof.requested_proof.predicates.get(referent) else {
            return false;
        };
        let Some(identifier) = proof.identifier_at(proven.sub_proof_index) else {
            return false;
        };
        if !restrictions_satisfied(requested.restrictions.as_deref(), identifier, &[]) {
            return false;
        }
    }

    true
}

fn attribute_answered(
    _request: &ProofRequest,
    referent: &str,
    requested: &RequestedAttribute,
    proof: &Proof,
) -> bool {
    let requested_names = requested.attribute_names();

    if let Some(revealed) = proof.requested_proof.revealed_attrs.get(referent) {
        let &[name] = requested_names.as_slice() else {
            // A group referent cannot be answered by a single value
            return false;
        };
        let Some(identifier) = proof.identifier_at(revealed.sub_proof_index) else {
            return false;
        };
        return restrictions_satisfied(
            requested.restrictions.as_deref(),
            identifier,
            &[(name, revealed.raw.as_str())],
        );
    }

    if let Some(group) = proof.requested_proof.revealed_attr_groups.get(referent) {
        if !requested_names.iter().all(|n| group.values.contains_key(*n)) {
            return false;
        }
        let Some(identifier) = proof.identifier_at(group.sub_proof_index) else {
            return false;
        };
        let values: Vec<(&str, &str)> = group
            .values
            .iter()
            .map(|(name, value)| (name.as_str(), value.raw.as_str()))
            .collect();
        return restrictions_satisfied(requested.restrictions.as_deref(), identifier, &values);
    }

    if proof.requested_proof.self_attested_attrs.contains_key(referent) {
        // Self-attestation is only acceptable for unrestricted referents
        return requested.restrictions.as_deref().map_or(true, <[_]>::is_empty);
    }

    if let Some(unrevealed) = proof.requested_proof.unrevealed_attrs.get(referent) {
        let Some(identifier) = proof.identifier_at(unrevealed.sub_proof_index) else {
            return false;
        };
        // Value-level restrictions cannot be checked without the value
        let has_value_constraints = requested
            .restrictions
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .any(|r| !r.attribute_values.is_empty());
        return !has_value_constraints
            && restrictions_satisfied(requested.restrictions.as_deref(), identifier, &[]);
    }

    false
}

/// Whether an identifier (plus revealed values, when available)
/// satisfies a restriction list. The list is a disjunction.
fn restrictions_satisfied(
    restrictions: Option<&[Restriction]>,
    identifier: &ProofIdentifier,
    values: &[(&str, &str)],
) -> bool {
    let Some(restrictions) = restrictions else {
        return true;
    };
    if restrictions.is_empty() {
        return true;
    }

    restrictions.iter().any(|restriction| {
        // Indy-style identifiers: schema id `<did>:2:<name>:<version>`,
        // credential definition id `<did>:3:CL:<seq>:<tag>`.
        let schema_parts: Vec<&str> = identifier.schema_id.split(':').collect();
        let field_ok = |expected: &Option<String>, actual: Option<&str>| match expected {
            Some(value) => actual == Some(value.as_str()),
            None => true,
        };

        field_ok(&restriction.schema_id, Some(identifier.schema_id.as_str()))
            && field_ok(&restriction.cred_def_id, Some(identifier.cred_def_id.as_str()))
            && field_ok(&restriction.schema_issuer_did, schema_parts.first().copied())
            && field_ok(&restriction.schema_name, schema_parts.get(2).copied())
            && field_ok(&restriction.schema_version, schema_parts.get(3).copied())
            && field_ok(&restriction.issuer_did, identifier.cred_def_id.split(':').next())
            && restriction.attribute_values.iter().all(|(name, expected)| {
                values
                    .iter()
                    .any(|(n, v)| *n == name.as_str() && *v == expected.as_str())
            })
            && restriction
                .attribute_markers
                .iter()
                .all(|(name, marker)| values.iter().any(|(n, _)| *n == name.as_str()) == *marker)
    })
}
