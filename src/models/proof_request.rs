// src/models/proof_request.rs
//! Proof request model: what a verifier asks a prover to reveal.
//!
//! A proof request names a set of attribute groups and predicates, each
//! keyed by a request-local referent. The same shape is also used as the
//! proposal preview payload: a prover proposes by sending a
//! request-shaped preview whose nonce the verifier must never reuse.

use crate::error::ProofError;
use crate::models::restriction::Restriction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A time window within which the credential used must be provably
/// unrevoked. Timestamps are unix epoch seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonRevokedInterval {
    /// Lower bound; absent means no lower bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<i64>,
    /// Upper bound; absent defaults to "now" at resolution time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<i64>,
}

/// Comparison operator of a requested predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredicateType {
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = "<")]
    LessThan,
}

impl fmt::Display for PredicateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PredicateType::GreaterThanOrEqual => ">=",
            PredicateType::GreaterThan => ">",
            PredicateType::LessThanOrEqual => "<=",
            PredicateType::LessThan => "<",
        };
        write!(f, "{}", s)
    }
}

/// One requested attribute group: either a single attribute name or a
/// non-empty set of names that must come from the same credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedAttribute {
    /// Single attribute name; mutually exclusive with `names`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Attribute group; mutually exclusive with `name`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
    /// Credential restrictions; absent means the value may be
    /// self-attested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<Vec<Restriction>>,
    /// Referent-level non-revocation interval, overrides the
    /// request-level one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_revoked: Option<NonRevokedInterval>,
}

impl RequestedAttribute {
    /// All attribute names covered by this referent, regardless of the
    /// single-name / group representation.
    pub fn attribute_names(&self) -> Vec<&str> {
        match (&self.name, &self.names) {
            (Some(name), _) => vec![name.as_str()],
            (None, Some(names)) => names.iter().map(String::as_str).collect(),
            (None, None) => Vec::new(),
        }
    }
}

/// One requested predicate over an integer attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedPredicate {
    /// Attribute the predicate ranges over
    pub name: String,
    /// Comparison operator
    pub p_type: PredicateType,
    /// Threshold the attribute is compared against
    pub p_value: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restrictions: Option<Vec<Restriction>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_revoked: Option<NonRevokedInterval>,
}

/// A proof request as carried in a request (or proposal preview)
/// attachment.
///
/// The `nonce` is single-use: whenever a request is freshly minted from a
/// proposal the nonce must be regenerated, never copied (replay-attack
/// prevention).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRequest {
    pub name: String,
    pub version: String,
    pub nonce: String,
    /// Attribute referent -> requested attribute group
    pub requested_attributes: BTreeMap<String, RequestedAttribute>,
    /// Predicate referent -> requested predicate
    pub requested_predicates: BTreeMap<String, RequestedPredicate>,
    /// Request-level non-revocation interval; referent-level intervals
    /// take precedence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_revoked: Option<NonRevokedInterval>,
}

impl ProofRequest {
    /// Asserts that attribute referent names and predicate referent
    /// names do not collide within this request.
    ///
    /// # Errors
    /// Returns `ProofError::DuplicateReferent` naming the clashing
    /// referents.
    pub fn assert_no_duplicate_referents(&self) -> Result<(), ProofError> {
        let duplicates: Vec<&str> = self
            .requested_attributes
            .keys()
            .filter(|referent| self.requested_predicates.contains_key(*referent))
            .map(String::as_str)
            .collect();

        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(ProofError::DuplicateReferent(duplicates.join(", ")))
        }
    }

    /// The effective non-revocation interval for a referent: the
    /// referent-level interval when set, else the request-level one.
    pub fn effective_interval(
        &self,
        referent_interval: Option<&NonRevokedInterval>,
    ) -> Option<NonRevokedInterval> {
        referent_interval.copied().or(self.non_revoked)
    }

    /// Structural validation applied when a request (or proposal
    /// preview) is received: referent uniqueness plus per-referent shape
    /// checks.
    pub fn validate(&self) -> Result<(), ProofError> {
        self.assert_no_duplicate_referents()?;

        for (referent, attribute) in &self.requested_attributes {
            match (&attribute.name, &attribute.names) {
                (Some(_), Some(_)) => {
                    return Err(ProofError::Format(format!(
                        "requested attribute `{}` must not set both `name` and `names`",
                        referent
                    )))
                }
                (None, None) => {
                    return Err(ProofError::Format(format!(
                        "requested attribute `{}` must set `name` or `names`",
                        referent
                    )))
                }
                (None, Some(names)) if names.is_empty() => {
                    return Err(ProofError::Format(format!(
                        "requested attribute `{}` has an empty `names` set",
                        referent
                    )))
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(
        attributes: Vec<(&str, RequestedAttribute)>,
        predicates: Vec<(&str, RequestedPredicate)>,
    ) -> ProofRequest {
        ProofRequest {
            name: "Proof Request".to_string(),
            version: "1.0".to_string(),
            nonce: "947121108704767252195123".to_string(),
            requested_attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            requested_predicates: predicates
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            non_revoked: None,
        }
    }

    #[test]
    fn test_duplicate_referent_across_attributes_and_predicates() {
        let request = request_with(
            vec![(
                "age",
                RequestedAttribute {
                    name: Some("age".to_string()),
                    ..Default::default()
                },
            )],
            vec![(
                "age",
                RequestedPredicate {
                    name: "age".to_string(),
                    p_type: PredicateType::GreaterThanOrEqual,
                    p_value: 21,
                    restrictions: None,
                    non_revoked: None,
                },
            )],
        );

        let err = request.assert_no_duplicate_referents().unwrap_err();
        assert!(matches!(err, crate::error::ProofError::DuplicateReferent(d) if d == "age"));
    }

    #[test]
    fn test_validate_rejects_empty_names_group() {
        let request = request_with(
            vec![(
                "identity",
                RequestedAttribute {
                    names: Some(vec![]),
                    ..Default::default()
                },
            )],
            vec![],
        );
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_predicate_type_wire_form() {
        let json = serde_json::to_string(&PredicateType::GreaterThanOrEqual).unwrap();
        assert_eq!(json, "\">=\"");
        let back: PredicateType = serde_json::from_str("\"<\"").unwrap();
        assert_eq!(back, PredicateType::LessThan);
    }

    #[test]
    fn test_referent_interval_takes_precedence() {
        let mut request = request_with(vec![], vec![]);
        request.non_revoked = Some(NonRevokedInterval {
            from: None,
            to: Some(100),
        });

        let referent_interval = NonRevokedInterval {
            from: Some(50),
            to: Some(50),
        };
        assert_eq!(
            request.effective_interval(Some(&referent_interval)),
            Some(referent_interval)
        );
        assert_eq!(
            request.effective_interval(None),
            Some(NonRevokedInterval {
                from: None,
                to: Some(100)
            })
        );
    }
}
