// src/formats/indy.rs
//! Legacy indy proof format service.

use crate::error::ProofError;
use crate::formats::core::FormatCore;
use crate::formats::{
    ProofFormatService, ProofProposalInput, ProofRequestInput, SelectionOptions,
};
use crate::messages::Attachment;
use crate::models::{CredentialsForRequest, SelectedCredentials};
use crate::services::{HolderService, LedgerRegistry, VerifierService};
use async_trait::async_trait;
use std::sync::Arc;

const INDY_PROOF_REQUEST_PROPOSAL: &str = "hlindy/proof-req@v2.0";
const INDY_PROOF_REQUEST: &str = "hlindy/proof-req@v2.0";
const INDY_PROOF: &str = "hlindy/proof@v2.0";

/// Proof format service for the legacy indy format.
pub struct LegacyIndyProofFormatService {
    core: FormatCore,
}

impl LegacyIndyProofFormatService {
    pub fn new(
        holder: Arc<dyn HolderService>,
        verifier: Arc<dyn VerifierService>,
        ledger: Arc<dyn LedgerRegistry>,
    ) -> Self {
        LegacyIndyProofFormatService {
            core: FormatCore::new(holder, verifier, ledger),
        }
    }
}

#[async_trait]
impl ProofFormatService for LegacyIndyProofFormatService {
    fn format_key(&self) -> &'static str {
        "indy"
    }

    fn proposal_format(&self) -> &'static str {
        INDY_PROOF_REQUEST_PROPOSAL
    }

    fn request_format(&self) -> &'static str {
        INDY_PROOF_REQUEST
    }

    fn presentation_format(&self) -> &'static str {
        INDY_PROOF
    }

    async fn create_proposal(
        &self,
        input: &ProofProposalInput,
        attachment_id: &str,
    ) -> Result<Attachment, ProofError> {
        self.core.create_proposal(input, attachment_id).await
    }

    async fn process_proposal(&self, attachment: &Attachment) -> Result<(), ProofError> {
        self.core.process_proposal(attachment)
    }

    async fn accept_proposal(
        &self,
        proposal_attachment: &Attachment,
        attachment_id: &str,
    ) -> Result<Attachment, ProofError> {
        self.core.accept_proposal(proposal_attachment, attachment_id).await
    }

    async fn create_request(
        &self,
        input: &ProofRequestInput,
        attachment_id: &str,
    ) -> Result<Attachment, ProofError> {
        self.core.create_request(input, attachment_id).await
    }

    async fn process_request(&self, attachment: &Attachment) -> Result<(), ProofError> {
        self.core.process_request(attachment)
    }

    async fn accept_request(
        &self,
        request_attachment: &Attachment,
        _proposal_attachment: Option<&Attachment>,
        explicit_selection: Option<&SelectedCredentials>,
        attachment_id: &str,
    ) -> Result<Attachment, ProofError> {
        self.core
            .accept_request(request_attachment, explicit_selection, attachment_id)
            .await
    }

    async fn process_presentation(
        &self,
        request_attachment: &Attachment,
        presentation_attachment: &Attachment,
    ) -> Result<bool, ProofError> {
        self.core
            .process_presentation(request_attachment, presentation_attachment)
            .await
    }

    async fn get_credentials_for_request(
        &self,
        request_attachment: &Attachment,
        options: &SelectionOptions,
    ) -> Result<CredentialsForRequest, ProofError> {
        self.core
            .get_credentials_for_request(request_attachment, options)
            .await
    }

    async fn select_credentials_for_request(
        &self,
        request_attachment: &Attachment,
        options: &SelectionOptions,
    ) -> Result<SelectedCredentials, ProofError> {
        self.core
            .select_credentials_for_request(request_attachment, options)
            .await
    }

    async fn should_auto_respond_to_proposal(
        &self,
        proposal_attachment: &Attachment,
        request_attachment: &Attachment,
    ) -> Result<bool, ProofError> {
        self.core.requests_match(proposal_attachment, request_attachment)
    }

    async fn should_auto_respond_to_request(
        &self,
        proposal_attachment: &Attachment,
        request_attachment: &Attachment,
    ) -> Result<bool, ProofError> {
        self.core.requests_match(proposal_attachment, request_attachment)
    }

    async fn should_auto_respond_to_presentation(
        &self,
        request_attachment: &Attachment,
        presentation_attachment: &Attachment,
    ) -> Result<bool, ProofError> {
        self.core
            .presentation_matches(request_attachment, presentation_attachment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PresentationPreview, PreviewAttribute, ProofRequest};
    use crate::services::{InMemoryHolder, InMemoryLedger, InMemoryVerifier};

    fn service() -> LegacyIndyProofFormatService {
        LegacyIndyProofFormatService::new(
            Arc::new(InMemoryHolder::new()),
            Arc::new(InMemoryVerifier::new()),
            Arc::new(InMemoryLedger::new()),
        )
    }

    fn name_preview() -> ProofProposalInput {
        ProofProposalInput::new(PresentationPreview {
            attributes: vec![PreviewAttribute {
                name: "name".to_string(),
                ..Default::default()
            }],
            predicates: vec![],
        })
    }

    #[tokio::test]
    async fn test_accept_proposal_always_mints_a_fresh_nonce() {
        let service = service();
        let proposal = service.create_proposal(&name_preview(), "attach-0").await.unwrap();
        let proposed: ProofRequest = proposal.as_data().unwrap();

        let request_attachment = service.accept_proposal(&proposal, "attach-1").await.unwrap();
        let request: ProofRequest = request_attachment.as_data().unwrap();
        assert_ne!(request.nonce, proposed.nonce);

        // Two accepts of the same proposal never share a nonce either
        let second_attachment = service.accept_proposal(&proposal, "attach-2").await.unwrap();
        let second: ProofRequest = second_attachment.as_data().unwrap();
        assert_ne!(second.nonce, request.nonce);
    }

    #[tokio::test]
    async fn test_create_request_rejects_duplicate_referents() {
        use crate::models::proof_request::PredicateType;
        use crate::models::{RequestedAttribute, RequestedPredicate};
        use std::collections::BTreeMap;

        let service = service();
        let input = ProofRequestInput {
            name: "Proof Request".to_string(),
            version: "1.0".to_string(),
            requested_attributes: BTreeMap::from([(
                "age".to_string(),
                RequestedAttribute {
                    name: Some("age".to_string()),
                    ..Default::default()
                },
            )]),
            requested_predicates: BTreeMap::from([(
                "age".to_string(),
                RequestedPredicate {
                    name: "age".to_string(),
                    p_type: PredicateType::GreaterThanOrEqual,
                    p_value: 21,
                    restrictions: None,
                    non_revoked: None,
                },
            )]),
            non_revoked: None,
        };

        assert!(matches!(
            service.create_request(&input, "attach-0").await,
            Err(ProofError::DuplicateReferent(_))
        ));
    }

    #[tokio::test]
    async fn test_proposal_and_derived_request_auto_match() {
        let service = service();
        let proposal = service.create_proposal(&name_preview(), "attach-0").await.unwrap();
        let request = service.accept_proposal(&proposal, "attach-1").await.unwrap();

        assert!(service
            .should_auto_respond_to_request(&proposal, &request)
            .await
            .unwrap());
    }

    #[test]
    fn test_supported_format_identifiers() {
        let service = service();
        assert!(service.supports_format("hlindy/proof-req@v2.0"));
        assert!(service.supports_format("hlindy/proof@v2.0"));
        assert!(!service.supports_format("anoncreds/proof-request@v1.0"));
    }
}
