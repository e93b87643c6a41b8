// src/formats/mod.rs
//! Pluggable proof format services.
//!
//! A format service builds and parses the format-specific attachments of
//! protocol messages while the engine stays format-agnostic. Supported
//! formats form a closed set with one implementation module per variant;
//! the engine dispatches through a registry keyed by format identifier
//! string rather than by subclassing.

pub mod anoncreds;
mod core;
pub mod indy;
pub mod selection;

pub use anoncreds::AnonCredsProofFormatService;
pub use indy::LegacyIndyProofFormatService;
pub use selection::SelectionOptions;

use crate::error::ProofError;
use crate::messages::Attachment;
use crate::models::proof_request::{NonRevokedInterval, RequestedAttribute, RequestedPredicate};
use crate::models::{CredentialsForRequest, PresentationPreview, SelectedCredentials};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Input for building a proposal attachment.
#[derive(Debug, Clone, Default)]
pub struct ProofProposalInput {
    /// Attributes and predicates the prover offers
    pub preview: PresentationPreview,
    pub name: String,
    pub version: String,
}

impl ProofProposalInput {
    pub fn new(preview: PresentationPreview) -> Self {
        ProofProposalInput {
            preview,
            name: "Proof Request".to_string(),
            version: "1.0".to_string(),
        }
    }
}

/// Input for building a request attachment directly (no proposal
/// precursor). The nonce is always minted by the format service.
#[derive(Debug, Clone, Default)]
pub struct ProofRequestInput {
    pub name: String,
    pub version: String,
    pub requested_attributes: BTreeMap<String, RequestedAttribute>,
    pub requested_predicates: BTreeMap<String, RequestedPredicate>,
    pub non_revoked: Option<NonRevokedInterval>,
}

/// One supported proof format.
///
/// All operations may fail with `ProofError::Format` carrying a
/// human-readable cause. Attachment ids are caller-supplied so the
/// engine can cross-reference the format descriptors of the outer
/// message.
#[async_trait]
pub trait ProofFormatService: Send + Sync {
    /// Stable key of this format implementation (e.g. `"indy"`).
    fn format_key(&self) -> &'static str;
    /// Format identifier carried by proposal messages.
    fn proposal_format(&self) -> &'static str;
    /// Format identifier carried by request messages.
    fn request_format(&self) -> &'static str;
    /// Format identifier carried by presentation messages.
    fn presentation_format(&self) -> &'static str;

    /// Whether this service understands the given format identifier.
    fn supports_format(&self, format_id: &str) -> bool {
        format_id == self.proposal_format()
            || format_id == self.request_format()
            || format_id == self.presentation_format()
    }

    /// Builds a fresh proof-request-shaped proposal preview.
    async fn create_proposal(
        &self,
        input: &ProofProposalInput,
        attachment_id: &str,
    ) -> Result<Attachment, ProofError>;

    /// Structurally validates a received proposal. Does not mutate
    /// state.
    async fn process_proposal(&self, attachment: &Attachment) -> Result<(), ProofError>;

    /// Converts a proposal preview into a request, always minting a
    /// fresh nonce.
    async fn accept_proposal(
        &self,
        proposal_attachment: &Attachment,
        attachment_id: &str,
    ) -> Result<Attachment, ProofError>;

    /// Builds a request directly from explicit input.
    async fn create_request(
        &self,
        input: &ProofRequestInput,
        attachment_id: &str,
    ) -> Result<Attachment, ProofError>;

    /// Structurally validates a received request. Does not mutate state.
    async fn process_request(&self, attachment: &Attachment) -> Result<(), ProofError>;

    /// Answers a request with a presentation. An explicit selection
    /// wins; otherwise credentials are resolved automatically with
    /// revoked candidates filtered out.
    async fn accept_request(
        &self,
        request_attachment: &Attachment,
        proposal_attachment: Option<&Attachment>,
        explicit_selection: Option<&SelectedCredentials>,
        attachment_id: &str,
    ) -> Result<Attachment, ProofError>;

    /// Verifies a received presentation against the request. Returns the
    /// verification outcome.
    async fn process_presentation(
        &self,
        request_attachment: &Attachment,
        presentation_attachment: &Attachment,
    ) -> Result<bool, ProofError>;

    /// Read-only candidate retrieval for UI/automation callers.
    async fn get_credentials_for_request(
        &self,
        request_attachment: &Attachment,
        options: &SelectionOptions,
    ) -> Result<CredentialsForRequest, ProofError>;

    /// Read-only automatic selection for UI/automation callers.
    async fn select_credentials_for_request(
        &self,
        request_attachment: &Attachment,
        options: &SelectionOptions,
    ) -> Result<SelectedCredentials, ProofError>;

    /// Format-level auto-respond decision for a received proposal.
    async fn should_auto_respond_to_proposal(
        &self,
        proposal_attachment: &Attachment,
        request_attachment: &Attachment,
    ) -> Result<bool, ProofError>;

    /// Format-level auto-respond decision for a received request.
    async fn should_auto_respond_to_request(
        &self,
        proposal_attachment: &Attachment,
        request_attachment: &Attachment,
    ) -> Result<bool, ProofError>;

    /// Format-level auto-respond decision for a received presentation.
    async fn should_auto_respond_to_presentation(
        &self,
        request_attachment: &Attachment,
        presentation_attachment: &Attachment,
    ) -> Result<bool, ProofError>;
}

/// Dispatch table mapping format identifier strings to service
/// implementations.
#[derive(Clone)]
pub struct FormatRegistry {
    services: Vec<Arc<dyn ProofFormatService>>,
}

impl FormatRegistry {
    /// Builds a registry; the first service is the default used by the
    /// legacy single-format protocol variant.
    pub fn new(services: Vec<Arc<dyn ProofFormatService>>) -> Self {
        FormatRegistry { services }
    }

    /// The default service (legacy single-format addressing).
    pub fn default_service(&self) -> Result<Arc<dyn ProofFormatService>, ProofError> {
        self.services
            .first()
            .cloned()
            .ok_or_else(|| ProofError::Format("no proof format services registered".to_string()))
    }

    /// Resolves the service understanding a format identifier.
    pub fn service_for_format(
        &self,
        format_id: &str,
    ) -> Result<Arc<dyn ProofFormatService>, ProofError> {
        self.services
            .iter()
            .find(|s| s.supports_format(format_id))
            .cloned()
            .ok_or_else(|| {
                ProofError::Format(format!("unsupported proof format `{}`", format_id))
            })
    }

    /// Whether any registered service understands the identifier.
    pub fn supports(&self, format_id: &str) -> bool {
        self.services.iter().any(|s| s.supports_format(format_id))
    }
}
