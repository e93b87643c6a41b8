// src/formats/anoncreds.rs
//! AnonCreds proof format service.
//!
//! Payload semantics are shared with the legacy indy format; the
//! difference on the wire is the format identifier family.

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

const ANONCREDS_PROOF_REQUEST_PROPOSAL: &str = "anoncreds/proof-request@v1.0";
const ANONCREDS_PROOF_REQUEST: &str = "anoncreds/proof-request@v1.0";
const ANONCREDS_PROOF: &str = "anoncreds/proof@v1.0";

/// Proof format service for the anoncreds format family.
pub struct AnonCredsProofFormatService {
    core: FormatCore,
}

impl AnonCredsProofFormatService {
    pub fn new(
        holder: Arc<dyn HolderService>,
        verifier: Arc<dyn VerifierService>,
        ledger: Arc<dyn LedgerRegistry>,
    ) -> Self {
        AnonCredsProofFormatService {
            core: FormatCore::new(holder, verifier, ledger),
        }
    }
}

#[async_trait]
impl ProofFormatService for AnonCredsProofFormatService {
    fn format_key(&self) -> &'static str {
        "anoncreds"
    }

    fn proposal_format(&self) -> &'static str {
        ANONCREDS_PROOF_REQUEST_PROPOSAL
    }

    fn request_format(&self) -> &'static str {
        ANONCREDS_PROOF_REQUEST
    }

    fn presentation_format(&self) -> &'static str {
        ANONCREDS_PROOF
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
    use crate::services::{InMemoryHolder, InMemoryLedger, InMemoryVerifier};

    #[test]
    fn test_format_identifiers_are_disjoint_from_indy() {
        let service = AnonCredsProofFormatService::new(
            Arc::new(InMemoryHolder::new()),
            Arc::new(InMemoryVerifier::new()),
            Arc::new(InMemoryLedger::new()),
        );
        assert!(service.supports_format("anoncreds/proof-request@v1.0"));
        assert!(service.supports_format("anoncreds/proof@v1.0"));
        assert!(!service.supports_format("hlindy/proof-req@v2.0"));
    }
}
