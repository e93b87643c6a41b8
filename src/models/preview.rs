// src/models/preview.rs
//! Presentation preview: the prover-side input for a proposal.
//!
//! A preview names the attributes and predicates the prover is willing
//! to present. The format service converts it into a canonical
//! proof-request shape (`utils::proof_request::create_request_from_preview`)
//! so proposals and requests can be compared field-by-field.

use crate::models::proof_request::PredicateType;
use serde::{Deserialize, Serialize};

/// One attribute the prover proposes to reveal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewAttribute {
    pub name: String,
    /// Credential definition the value would come from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cred_def_id: Option<String>,
    /// Concrete value, included when the prover wants to disclose it up
    /// front
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Groups attributes that must come from the same credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referent: Option<String>,
}

/// One predicate the prover proposes to prove.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewPredicate {
    pub name: String,
    pub predicate: PredicateType,
    pub threshold: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cred_def_id: Option<String>,
}

/// The proposal content: attributes and predicates the prover offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationPreview {
    #[serde(default)]
    pub attributes: Vec<PreviewAttribute>,
    #[serde(default)]
    pub predicates: Vec<PreviewPredicate>,
}
