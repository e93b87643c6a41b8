// src/utils/proof_request.rs
//! Construction of proof requests from proposal previews.
//!
//! A proposal carries a preview (attributes/predicates the prover
//! offers). To compare it against a request, or to answer it with one,
//! the preview is first converted into the canonical proof-request
//! shape. Attributes sharing a preview referent become one attribute
//! group (the values must then come from the same credential).

use crate::models::{
    PresentationPreview, ProofRequest, RequestedAttribute, RequestedPredicate, Restriction,
};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Builds a canonical proof request from a proposal preview.
///
/// # Arguments
/// * `preview` - Attributes and predicates the prover proposes
/// * `name` / `version` - Request metadata
/// * `nonce` - Freshly generated nonce; the caller is responsible for
///   never passing a nonce that was already used on the wire
pub fn create_request_from_preview(
    preview: &PresentationPreview,
    name: &str,
    version: &str,
    nonce: String,
) -> ProofRequest {
    let mut requested_attributes = BTreeMap::new();
    let mut requested_predicates = BTreeMap::new();

    // Group proposed attributes by referent; ungrouped attributes each
    // get a generated referent of their own.
    let mut by_referent: Vec<(String, Vec<&crate::models::PreviewAttribute>)> = Vec::new();
    for attribute in &preview.attributes {
        let referent = attribute
            .referent
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        match by_referent.iter_mut().find(|(r, _)| *r == referent) {
            Some((_, group)) => group.push(attribute),
            None => by_referent.push((referent, vec![attribute])),
        }
    }

    for (referent, group) in by_referent {
        let restrictions = group[0]
            .cred_def_id
            .as_ref()
            .map(|id| vec![Restriction::for_cred_def_id(id.clone())]);

        let requested = if group.len() == 1 {
            RequestedAttribute {
                name: Some(group[0].name.clone()),
                names: None,
                restrictions,
                non_revoked: None,
            }
        } else {
            RequestedAttribute {
                name: None,
                names: Some(group.iter().map(|a| a.name.clone()).collect()),
                restrictions,
                non_revoked: None,
            }
        };

        requested_attributes.insert(referent, requested);
    }

    for predicate in &preview.predicates {
        let restrictions = predicate
            .cred_def_id
            .as_ref()
            .map(|id| vec![Restriction::for_cred_def_id(id.clone())]);

        requested_predicates.insert(
            Uuid::new_v4().to_string(),
            RequestedPredicate {
                name: predicate.name.clone(),
                p_type: predicate.predicate,
                p_value: predicate.threshold,
                restrictions,
                non_revoked: None,
            },
        );
    }

    ProofRequest {
        name: name.to_string(),
        version: version.to_string(),
        nonce,
        requested_attributes,
        requested_predicates,
        non_revoked: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PreviewAttribute, PreviewPredicate};
    use crate::models::proof_request::PredicateType;

    #[test]
    fn test_single_attribute_becomes_name() {
        let preview = PresentationPreview {
            attributes: vec![PreviewAttribute {
                name: "name".to_string(),
                cred_def_id: Some("creddef:1".to_string()),
                ..Default::default()
            }],
            predicates: vec![],
        };

        let request = create_request_from_preview(&preview, "Proof Request", "1.0", "n1".into());
        assert_eq!(request.requested_attributes.len(), 1);
        let attribute = request.requested_attributes.values().next().unwrap();
        assert_eq!(attribute.name.as_deref(), Some("name"));
        assert!(attribute.names.is_none());
        assert_eq!(
            attribute.restrictions.as_ref().unwrap()[0].cred_def_id.as_deref(),
            Some("creddef:1")
        );
    }

    #[test]
    fn test_shared_referent_becomes_group() {
        let preview = PresentationPreview {
            attributes: vec![
                PreviewAttribute {
                    name: "first".to_string(),
                    referent: Some("identity".to_string()),
                    ..Default::default()
                },
                PreviewAttribute {
                    name: "last".to_string(),
                    referent: Some("identity".to_string()),
                    ..Default::default()
                },
            ],
            predicates: vec![],
        };

        let request = create_request_from_preview(&preview, "Proof Request", "1.0", "n2".into());
        let attribute = request.requested_attributes.get("identity").unwrap();
        assert!(attribute.name.is_none());
        assert_eq!(
            attribute.names.as_deref(),
            Some(["first".to_string(), "last".to_string()].as_slice())
        );
    }

    #[test]
    fn test_predicates_carry_operator_and_threshold() {
        let preview = PresentationPreview {
            attributes: vec![],
            predicates: vec![PreviewPredicate {
                name: "age".to_string(),
                predicate: PredicateType::GreaterThanOrEqual,
                threshold: 21,
                cred_def_id: None,
            }],
        };

        let request = create_request_from_preview(&preview, "Proof Request", "1.0", "n3".into());
        let predicate = request.requested_predicates.values().next().unwrap();
        assert_eq!(predicate.name, "age");
        assert_eq!(predicate.p_type, PredicateType::GreaterThanOrEqual);
        assert_eq!(predicate.p_value, 21);
        assert!(predicate.restrictions.is_none());
    }
}
