// src/formats/core.rs
//! Shared implementation behind the concrete proof format services.
//!
//! The legacy-indy and anoncreds format variants carry identical
//! payload semantics and differ only in their format identifier strings,
//! so the actual attachment building, validation, selection and
//! verification logic lives here once. The concrete services in
//! `formats::indy` and `formats::anoncreds` wrap this core with their
//! identifiers.

use crate::error::ProofError;
use crate::formats::selection::{
    assert_best_practice_interval, get_credentials_for_request, select_credentials_for_request,
    SelectionOptions,
};
use crate::formats::{ProofProposalInput, ProofRequestInput};
use crate::messages::Attachment;
use crate::models::{CredentialsForRequest, Proof, ProofRequest, SelectedCredentials};
use crate::protocol::negotiator::{are_proof_requests_equal, presentation_satisfies_request};
use crate::services::registry::RevocationRegistryState;
use crate::services::{HolderService, LedgerObjects, LedgerRegistry, VerifierService};
use crate::utils::encoding::{encode_credential_value, is_valid_credential_encoding};
use crate::utils::proof_request::create_request_from_preview;
use chrono::Utc;
use log::debug;
use std::sync::Arc;

/// Identifier-agnostic format service implementation.
pub(crate) struct FormatCore {
    holder: Arc<dyn HolderService>,
    verifier: Arc<dyn VerifierService>,
    ledger: Arc<dyn LedgerRegistry>,
}

impl FormatCore {
    pub(crate) fn new(
        holder: Arc<dyn HolderService>,
        verifier: Arc<dyn VerifierService>,
        ledger: Arc<dyn LedgerRegistry>,
    ) -> Self {
        FormatCore {
            holder,
            verifier,
            ledger,
        }
    }

    /// Builds a fresh proof-request-shaped preview from proposal input.
    pub(crate) async fn create_proposal(
        &self,
        input: &ProofProposalInput,
        attachment_id: &str,
    ) -> Result<Attachment, ProofError> {
        let nonce = self.holder.generate_nonce().await?;
        let request =
            create_request_from_preview(&input.preview, &input.name, &input.version, nonce);
        request.validate()?;
        Attachment::from_data(attachment_id, &request)
    }

    /// Structurally validates a proposal payload.
    pub(crate) fn process_proposal(&self, attachment: &Attachment) -> Result<(), ProofError> {
        let proposal: ProofRequest = attachment.as_data()?;
        proposal.validate()
    }

    /// Converts a proposal preview into a request.
    ///
    /// The proposal's nonce is never reused: a fresh nonce is minted on
    /// every call (replay-attack prevention).
    pub(crate) async fn accept_proposal(
        &self,
        proposal_attachment: &Attachment,
        attachment_id: &str,
    ) -> Result<Attachment, ProofError> {
        let mut request: ProofRequest = proposal_attachment.as_data()?;
        request.validate()?;
        request.nonce = self.holder.generate_nonce().await?;
        Attachment::from_data(attachment_id, &request)
    }

    /// Builds a request directly, with a fresh nonce.
    pub(crate) async fn create_request(
        &self,
        input: &ProofRequestInput,
        attachment_id: &str,
    ) -> Result<Attachment, ProofError> {
        let request = ProofRequest {
            name: input.name.clone(),
            version: input.version.clone(),
            nonce: self.holder.generate_nonce().await?,
            requested_attributes: input.requested_attributes.clone(),
            requested_predicates: input.requested_predicates.clone(),
            non_revoked: input.non_revoked,
        };
        request.validate()?;
        Attachment::from_data(attachment_id, &request)
    }

    /// Structurally validates a request payload.
    pub(crate) fn process_request(&self, attachment: &Attachment) -> Result<(), ProofError> {
        let request: ProofRequest = attachment.as_data()?;
        request.validate()
    }

    /// Answers a request: resolves credentials (explicit selection wins)
    /// and asks the holder to build the proof.
    pub(crate) async fn accept_request(
        &self,
        request_attachment: &Attachment,
        explicit_selection: Option<&SelectedCredentials>,
        attachment_id: &str,
    ) -> Result<Attachment, ProofError> {
        let request: ProofRequest = request_attachment.as_data()?;

        let selection = match explicit_selection {
            Some(selection) => selection.clone(),
            None => {
                select_credentials_for_request(
                    self.holder.as_ref(),
                    self.ledger.as_ref(),
                    &request,
                    &SelectionOptions {
                        filter_by_non_revocation_requirements: true,
                    },
                )
                .await?
            }
        };

        let ledger_objects = self.ledger_objects_for_selection(&request, &selection).await?;
        let proof = self
            .holder
            .create_proof(&request, &selection, &ledger_objects)
            .await?;
        Attachment::from_data(attachment_id, &proof)
    }

    /// Verifies a presentation against its request.
    ///
    /// Re-validates every revealed attribute's encoded form before
    /// handing off to the verifier collaborator: accepting the prover's
    /// encoding unchecked enables an encoding-substitution attack.
    pub(crate) async fn process_presentation(
        &self,
        request_attachment: &Attachment,
        presentation_attachment: &Attachment,
    ) -> Result<bool, ProofError> {
        let request: ProofRequest = request_attachment.as_data()?;
        let proof: Proof = presentation_attachment.as_data()?;

        for (referent, attribute) in &proof.requested_proof.revealed_attrs {
            if !is_valid_credential_encoding(&attribute.raw, &attribute.encoded) {
                return Err(ProofError::Format(format!(
                    "the encoded value for '{}' is invalid. Expected '{}'. Actual '{}'",
                    referent,
                    encode_credential_value(&attribute.raw),
                    attribute.encoded
                )));
            }
        }
        for group in proof.requested_proof.revealed_attr_groups.values() {
            for (attribute_name, value) in &group.values {
                if !is_valid_credential_encoding(&value.raw, &value.encoded) {
                    return Err(ProofError::Format(format!(
                        "the encoded value for '{}' is invalid. Expected '{}'. Actual '{}'",
                        attribute_name,
                        encode_credential_value(&value.raw),
                        value.encoded
                    )));
                }
            }
        }

        let ledger_objects = self.ledger_objects_for_proof(&proof).await?;
        self.verifier
            .verify_proof(&request, &proof, &ledger_objects)
            .await
    }

    pub(crate) async fn get_credentials_for_request(
        &self,
        request_attachment: &Attachment,
        options: &SelectionOptions,
    ) -> Result<CredentialsForRequest, ProofError> {
        let request: ProofRequest = request_attachment.as_data()?;
        get_credentials_for_request(self.holder.as_ref(), self.ledger.as_ref(), &request, options)
            .await
    }

    pub(crate) async fn select_credentials_for_request(
        &self,
        request_attachment: &Attachment,
        options: &SelectionOptions,
    ) -> Result<SelectedCredentials, ProofError> {
        let request: ProofRequest = request_attachment.as_data()?;
        select_credentials_for_request(self.holder.as_ref(), self.ledger.as_ref(), &request, options)
            .await
    }

    /// Content equivalence of a proposal and a request, nonce-agnostic.
    pub(crate) fn requests_match(
        &self,
        proposal_attachment: &Attachment,
        request_attachment: &Attachment,
    ) -> Result<bool, ProofError> {
        let proposal: ProofRequest = proposal_attachment.as_data()?;
        let request: ProofRequest = request_attachment.as_data()?;
        let equal = are_proof_requests_equal(&proposal, &request);
        debug!("proof proposal and request are equal: {}", equal);
        Ok(equal)
    }

    /// Whether a presentation answers every referent of the request.
    pub(crate) fn presentation_matches(
        &self,
        request_attachment: &Attachment,
        presentation_attachment: &Attachment,
    ) -> Result<bool, ProofError> {
        let request: ProofRequest = request_attachment.as_data()?;
        let proof: Proof = presentation_attachment.as_data()?;
        Ok(presentation_satisfies_request(&request, &proof))
    }

    /// Resolves the ledger material proof construction needs for a
    /// selection.
    async fn ledger_objects_for_selection(
        &self,
        request: &ProofRequest,
        selection: &SelectedCredentials,
    ) -> Result<LedgerObjects, ProofError> {
        let mut objects = LedgerObjects::default();

        for info in selection.credential_infos() {
            if !objects.schemas.contains_key(&info.schema_id) {
                let schema = self.ledger.get_schema(&info.schema_id).await?;
                objects.schemas.insert(info.schema_id.clone(), schema);
            }
            if !objects.credential_definitions.contains_key(&info.cred_def_id) {
                let cred_def = self
                    .ledger
                    .get_credential_definition(&info.cred_def_id)
                    .await?;
                objects
                    .credential_definitions
                    .insert(info.cred_def_id.clone(), cred_def);
            }
        }

        // Gather revocation material per selected credential that is
        // revocable and has non-revocation requested for its referent.
        let attribute_entries = selection.attributes.iter().map(|(referent, chosen)| {
            let interval = request
                .requested_attributes
                .get(referent)
                .and_then(|a| request.effective_interval(a.non_revoked.as_ref()));
            (interval, &chosen.credential_info)
        });
        let predicate_entries = selection.predicates.iter().map(|(referent, chosen)| {
            let interval = request
                .requested_predicates
                .get(referent)
                .and_then(|p| request.effective_interval(p.non_revoked.as_ref()));
            (interval, &chosen.credential_info)
        });

        for (interval, info) in attribute_entries.chain(predicate_entries) {
            let (Some(interval), Some(registry_id)) =
                (interval, info.revocation_registry_id.as_deref())
            else {
                continue;
            };
            assert_best_practice_interval(&interval)?;

            if !objects.revocation_registries.contains_key(registry_id) {
                let definition = self
                    .ledger
                    .get_revocation_registry_definition(registry_id)
                    .await?;
                objects.revocation_registries.insert(
                    registry_id.to_string(),
                    RevocationRegistryState {
                        definition,
                        status_lists: Default::default(),
                    },
                );
            }

            let to = interval.to.unwrap_or_else(|| Utc::now().timestamp());
            let status_list = self.ledger.get_revocation_status_list(registry_id, to).await?;
            if let Some(state) = objects.revocation_registries.get_mut(registry_id) {
                state.status_lists.insert(status_list.timestamp, status_list);
            }
        }

        Ok(objects)
    }

    /// Resolves the ledger material verification needs for a proof.
    async fn ledger_objects_for_proof(&self, proof: &Proof) -> Result<LedgerObjects, ProofError> {
        let mut objects = LedgerObjects::default();

        for schema_id in proof.schema_ids() {
            let schema = self.ledger.get_schema(schema_id).await?;
            objects.schemas.insert(schema_id.to_string(), schema);
        }
        for cred_def_id in proof.cred_def_ids() {
            let cred_def = self.ledger.get_credential_definition(cred_def_id).await?;
            objects
                .credential_definitions
                .insert(cred_def_id.to_string(), cred_def);
        }

        for identifier in &proof.identifiers {
            let (Some(registry_id), Some(timestamp)) =
                (identifier.rev_reg_id.as_deref(), identifier.timestamp)
            else {
                continue;
            };

            if !objects.revocation_registries.contains_key(registry_id) {
                let definition = self
                    .ledger
                    .get_revocation_registry_definition(registry_id)
                    .await?;
                objects.revocation_registries.insert(
                    registry_id.to_string(),
                    RevocationRegistryState {
                        definition,
                        status_lists: Default::default(),
                    },
                );
            }

            let already_fetched = objects
                .revocation_registries
                .get(registry_id)
                .map_or(false, |state| state.status_lists.contains_key(&timestamp));
            if !already_fetched {
                let status_list = self
                    .ledger
                    .get_revocation_status_list(registry_id, timestamp)
                    .await?;
                if let Some(state) = objects.revocation_registries.get_mut(registry_id) {
                    state.status_lists.insert(timestamp, status_list);
                }
            }
        }

        Ok(objects)
    }
}
