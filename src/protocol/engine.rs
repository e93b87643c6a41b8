// src/protocol/engine.rs
//! The proof exchange protocol engine.
//!
//! One engine instance drives one protocol major version. Every inbound
//! message follows the same shape: look up or create the exchange
//! record, assert the legal predecessor state and protocol version,
//! assert sender authorization, delegate the format-specific work to the
//! format service, persist the inbound message, transition state and
//! emit a state-changed event. Outbound operations are symmetric but
//! start from the caller's record and persist the outbound message
//! before transitioning, so a crash between message construction and
//! transition never loses the artifact.
//!
//! State transitions are serialized per record id: the
//! assert-legal-state-then-transition sequence runs under a per-record
//! mutex with an optimistic re-read, guaranteeing at most one successful
//! transition per (thread, expected predecessor state). Unrelated
//! exchanges stay independent.

use crate::error::ProofError;
use crate::formats::{
    FormatRegistry, ProofFormatService, ProofProposalInput, ProofRequestInput, SelectionOptions,
};
use crate::messages::{
    respond_in_thread, Attachment, DidCommMessage, FormatSpec, PresentationAckMessage,
    PresentationMessage, PresentationProblemReportMessage, ProposePresentationMessage,
    ProtocolVersion, RequestPresentationMessage, ServiceDecorator, AckStatus,
    LEGACY_PRESENTATION_ATTACHMENT_ID, LEGACY_PROPOSAL_ATTACHMENT_ID,
    LEGACY_REQUEST_ATTACHMENT_ID,
};
use crate::models::{CredentialsForRequest, Proof, ProofRequest, SelectedCredentials};
use crate::protocol::events::{EventBus, ProofEvent};
use crate::protocol::negotiator::{effective_auto_accept, AutoAcceptProof};
use crate::protocol::record::ProofExchangeRecord;
use crate::protocol::state::{assert_transition, ProofRole, ProofState};
use crate::services::ConnectionService;
use crate::services::connection::SenderAssertion;
use crate::storage::{MessageClass, MessageRepository, MessageRole, ProofRepository};
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Global configuration of the proof exchange module.
#[derive(Debug, Clone, Copy)]
pub struct ProofExchangeConfig {
    /// Global auto-accept policy; overridden per record when set there
    pub auto_accept: AutoAcceptProof,
}

impl Default for ProofExchangeConfig {
    fn default() -> Self {
        ProofExchangeConfig {
            auto_accept: AutoAcceptProof::Never,
        }
    }
}

/// Context of one inbound protocol message, as delivered by the message
/// envelope layer.
#[derive(Debug, Clone)]
pub struct InboundMessageContext<M> {
    pub message: M,
    /// Connection the transport authenticated, if any
    pub connection_id: Option<String>,
    /// Sender verification key for connection-less delivery
    pub sender_key: Option<String>,
    /// Key the message was addressed to, for connection-less delivery
    pub recipient_key: Option<String>,
}

impl<M> InboundMessageContext<M> {
    pub fn new(message: M) -> Self {
        InboundMessageContext {
            message,
            connection_id: None,
            sender_key: None,
            recipient_key: None,
        }
    }

    pub fn with_connection(message: M, connection_id: impl Into<String>) -> Self {
        InboundMessageContext {
            message,
            connection_id: Some(connection_id.into()),
            sender_key: None,
            recipient_key: None,
        }
    }
}

/// Decoded view of the payloads exchanged so far.
#[derive(Debug, Clone, Default)]
pub struct FormatData {
    pub proposal: Option<ProofRequest>,
    pub request: Option<ProofRequest>,
    pub presentation: Option<Proof>,
}

/// Options for creating a proposal (prover, fresh exchange).
#[derive(Default)]
pub struct CreateProposalOptions {
    pub connection_id: Option<String>,
    pub proposal: ProofProposalInput,
    pub comment: Option<String>,
    pub parent_thread_id: Option<String>,
    pub auto_accept: Option<AutoAcceptProof>,
}

/// Options for accepting a received proposal (verifier).
#[derive(Default)]
pub struct AcceptProposalOptions {
    pub record_id: String,
    pub comment: Option<String>,
    pub auto_accept: Option<AutoAcceptProof>,
}

/// Options for negotiating a received proposal with a differing request
/// (verifier).
#[derive(Default)]
pub struct NegotiateProposalOptions {
    pub record_id: String,
    pub request: ProofRequestInput,
    pub comment: Option<String>,
    pub auto_accept: Option<AutoAcceptProof>,
}

/// Options for creating a request with no prior proposal (verifier).
#[derive(Default)]
pub struct CreateRequestOptions {
    pub connection_id: Option<String>,
    pub request: ProofRequestInput,
    pub comment: Option<String>,
    pub parent_thread_id: Option<String>,
    pub auto_accept: Option<AutoAcceptProof>,
    /// `~service` decorator for connection-less exchanges
    pub service: Option<ServiceDecorator>,
}

/// Options for negotiating a received request with a counter-proposal
/// (prover).
#[derive(Default)]
pub struct NegotiateRequestOptions {
    pub record_id: String,
    pub proposal: ProofProposalInput,
    pub comment: Option<String>,
    pub auto_accept: Option<AutoAcceptProof>,
}

/// Options for accepting a received request with a presentation
/// (prover).
#[derive(Default)]
pub struct AcceptRequestOptions {
    pub record_id: String,
    /// Explicit credential selection; wins over automatic resolution
    pub selection: Option<SelectedCredentials>,
    pub comment: Option<String>,
    pub auto_accept: Option<AutoAcceptProof>,
}

/// The proof exchange protocol engine for one protocol major version.
pub struct ProofProtocol {
    version: ProtocolVersion,
    formats: FormatRegistry,
    config: ProofExchangeConfig,
    records: Arc<dyn ProofRepository>,
    messages: Arc<dyn MessageRepository>,
    connections: Arc<dyn ConnectionService>,
    events: EventBus,
    /// Per-record transition guards; unrelated exchanges never contend
    transition_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProofProtocol {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: ProtocolVersion,
        formats: FormatRegistry,
        config: ProofExchangeConfig,
        records: Arc<dyn ProofRepository>,
        messages: Arc<dyn MessageRepository>,
        connections: Arc<dyn ConnectionService>,
        events: EventBus,
    ) -> Self {
        ProofProtocol {
            version,
            formats,
            config,
            records,
            messages,
            connections,
            events,
            transition_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The protocol major version this engine drives.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// The event bus this engine emits on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn records_ref(&self) -> &dyn ProofRepository {
        self.records.as_ref()
    }

    pub(crate) fn messages_ref(&self) -> &dyn MessageRepository {
        self.messages.as_ref()
    }

    // ------------------------------------------------------------------
    // Proposal
    // ------------------------------------------------------------------

    /// Creates a presentation proposal, starting a fresh exchange as
    /// prover.
    pub async fn create_proposal(
        &self,
        options: CreateProposalOptions,
    ) -> Result<(ProofExchangeRecord, ProposePresentationMessage), ProofError> {
        if let Some(connection_id) = &options.connection_id {
            self.connections.assert_ready(connection_id).await?;
        }

        let service = self.formats.default_service()?;
        let attachment_id = self.new_attachment_id(LEGACY_PROPOSAL_ATTACHMENT_ID);
        let attachment = service.create_proposal(&options.proposal, &attachment_id).await?;

        let mut message = ProposePresentationMessage::new(self.version);
        message.comment = options.comment;
        message.formats = self.format_entries(&attachment_id, service.proposal_format());
        message.proposal_attachments = vec![attachment];
        if options.parent_thread_id.is_some() {
            let thread_id = message.id.clone();
            message.thread = Some(respond_in_thread(
                &thread_id,
                options.parent_thread_id.as_deref(),
            ));
        }

        let mut record = ProofExchangeRecord::new(
            ProofRole::Prover,
            self.version,
            ProofState::ProposalSent,
            message.thread_id(),
        )?;
        record.connection_id = options.connection_id;
        record.parent_thread_id = options.parent_thread_id;
        record.auto_accept = options.auto_accept;

        self.save_typed(record.id(), MessageRole::Sender, MessageClass::Proposal, &message)
            .await?;
        self.save_new_record(&record).await?;

        Ok((record, message))
    }

    /// Processes a received presentation proposal as verifier. Creates
    /// the record, or updates an existing one when the proposal is a
    /// counter-proposal in an ongoing negotiation.
    pub async fn process_proposal(
        &self,
        context: InboundMessageContext<ProposePresentationMessage>,
    ) -> Result<ProofExchangeRecord, ProofError> {
        let message = &context.message;
        debug!("processing presentation proposal with message id {}", message.id);
        self.assert_message_version(&message.message_type)?;

        let existing = self
            .records
            .find_by_thread_and_role(
                message.thread_id(),
                ProofRole::Verifier,
                context.connection_id.as_deref(),
            )
            .await?;

        match existing {
            Some(mut record) => {
                record.assert_protocol_version(self.version)?;
                record.assert_state(&[ProofState::RequestSent])?;

                let last_sent: RequestPresentationMessage = self
                    .get_typed(record.id(), MessageClass::Request, Some(MessageRole::Sender))
                    .await?;
                self.assert_sender(&context, &record, last_sent.service().cloned())
                    .await?;

                let attachment = self.proposal_attachment_of(message, &mut record).await?;
                let service = self.service_for_formats(message.formats.as_deref())?;
                if let Err(cause) = service.process_proposal(attachment).await {
                    return Err(self.fail_record(&mut record, cause).await);
                }

                self.save_typed(record.id(), MessageRole::Receiver, MessageClass::Proposal, message)
                    .await?;
                self.update_state(&mut record, ProofState::ProposalReceived).await?;
                Ok(record)
            }
            None => {
                // No record yet: structural errors here are surfaced to
                // the caller without persisting anything.
                if let Some(connection_id) = &context.connection_id {
                    self.connections.assert_ready(connection_id).await?;
                }
                let attachment = message
                    .proposal_attachment(|f| self.formats.supports(f))
                    .ok_or_else(|| {
                        ProofError::MissingAttachment(format!(
                            "no supported proposal attachment in message {}",
                            message.id
                        ))
                    })?;
                let service = self.service_for_formats(message.formats.as_deref())?;
                service.process_proposal(attachment).await?;

                let mut record = ProofExchangeRecord::new(
                    ProofRole::Verifier,
                    self.version,
                    ProofState::ProposalReceived,
                    message.thread_id(),
                )?;
                record.connection_id = context.connection_id.clone();
                record.parent_thread_id = message.parent_thread_id().map(str::to_string);

                self.save_typed(record.id(), MessageRole::Receiver, MessageClass::Proposal, message)
                    .await?;
                self.save_new_record(&record).await?;
                Ok(record)
            }
        }
    }

    /// Accepts a received proposal by answering with a request derived
    /// from it (fresh nonce).
    pub async fn accept_proposal(
        &self,
        options: AcceptProposalOptions,
    ) -> Result<(ProofExchangeRecord, RequestPresentationMessage), ProofError> {
        let mut record = self.records.get_by_id(&options.record_id).await?;
        record.assert_protocol_version(self.version)?;
        record.assert_state(&[ProofState::ProposalReceived])?;

        let proposal: ProposePresentationMessage = self
            .get_typed(record.id(), MessageClass::Proposal, Some(MessageRole::Receiver))
            .await?;
        let proposal_attachment = self.proposal_attachment_of(&proposal, &mut record).await?;
        let service = self.service_for_formats(proposal.formats.as_deref())?;

        let attachment_id = self.new_attachment_id(LEGACY_REQUEST_ATTACHMENT_ID);
        let attachment = service.accept_proposal(proposal_attachment, &attachment_id).await?;

        let mut message = RequestPresentationMessage::new(self.version);
        message.comment = options.comment;
        message.formats = self.format_entries(&attachment_id, service.request_format());
        message.request_attachments = vec![attachment];
        message.thread = Some(respond_in_thread(
            &record.thread_id,
            record.parent_thread_id.as_deref(),
        ));

        self.save_typed(record.id(), MessageRole::Sender, MessageClass::Request, &message)
            .await?;
        record.auto_accept = options.auto_accept.or(record.auto_accept);
        self.update_state(&mut record, ProofState::RequestSent).await?;

        Ok((record, message))
    }

    /// Negotiates a received proposal by answering with a request that
    /// differs from it.
    pub async fn negotiate_proposal(
        &self,
        options: NegotiateProposalOptions,
    ) -> Result<(ProofExchangeRecord, RequestPresentationMessage), ProofError> {
        let mut record = self.records.get_by_id(&options.record_id).await?;
        record.assert_protocol_version(self.version)?;
        record.assert_state(&[ProofState::ProposalReceived])?;

        let service = self.formats.default_service()?;
        let attachment_id = self.new_attachment_id(LEGACY_REQUEST_ATTACHMENT_ID);
        let attachment = service.create_request(&options.request, &attachment_id).await?;

        let mut message = RequestPresentationMessage::new(self.version);
        message.comment = options.comment;
        message.formats = self.format_entries(&attachment_id, service.request_format());
        message.request_attachments = vec![attachment];
        message.thread = Some(respond_in_thread(
            &record.thread_id,
            record.parent_thread_id.as_deref(),
        ));

        self.save_typed(record.id(), MessageRole::Sender, MessageClass::Request, &message)
            .await?;
        record.auto_accept = options.auto_accept.or(record.auto_accept);
        self.update_state(&mut record, ProofState::RequestSent).await?;

        Ok((record, message))
    }

    // ------------------------------------------------------------------
    // Request
    // ------------------------------------------------------------------

    /// Creates a presentation request with no prior proposal, starting a
    /// fresh exchange as verifier.
    pub async fn create_request(
        &self,
        options: CreateRequestOptions,
    ) -> Result<(ProofExchangeRecord, RequestPresentationMessage), ProofError> {
        if let Some(connection_id) = &options.connection_id {
            self.connections.assert_ready(connection_id).await?;
        }

        let service = self.formats.default_service()?;
        let attachment_id = self.new_attachment_id(LEGACY_REQUEST_ATTACHMENT_ID);
        let attachment = service.create_request(&options.request, &attachment_id).await?;

        let mut message = RequestPresentationMessage::new(self.version);
        message.comment = options.comment;
        message.formats = self.format_entries(&attachment_id, service.request_format());
        message.request_attachments = vec![attachment];
        message.service = options.service;
        if options.parent_thread_id.is_some() {
            let thread_id = message.id.clone();
            message.thread = Some(respond_in_thread(
                &thread_id,
                options.parent_thread_id.as_deref(),
            ));
        }

        let mut record = ProofExchangeRecord::new(
            ProofRole::Verifier,
            self.version,
            ProofState::RequestSent,
            message.thread_id(),
        )?;
        record.connection_id = options.connection_id;
        record.parent_thread_id = options.parent_thread_id;
        record.auto_accept = options.auto_accept;

        self.save_typed(record.id(), MessageRole::Sender, MessageClass::Request, &message)
            .await?;
        self.save_new_record(&record).await?;

        Ok((record, message))
    }

    /// Processes a received presentation request as prover. Creates the
    /// record, or updates the existing one when the request answers a
    /// proposal we sent.
    pub async fn process_request(
        &self,
        context: InboundMessageContext<RequestPresentationMessage>,
    ) -> Result<ProofExchangeRecord, ProofError> {
        let message = &context.message;
        debug!("processing presentation request with message id {}", message.id);
        self.assert_message_version(&message.message_type)?;

        let existing = self
            .records
            .find_by_thread_and_role(
                message.thread_id(),
                ProofRole::Prover,
                context.connection_id.as_deref(),
            )
            .await?;

        match existing {
            Some(mut record) => {
                record.assert_protocol_version(self.version)?;
                record.assert_state(&[ProofState::ProposalSent])?;

                let last_sent: ProposePresentationMessage = self
                    .get_typed(record.id(), MessageClass::Proposal, Some(MessageRole::Sender))
                    .await?;
                self.assert_sender(&context, &record, last_sent.service().cloned())
                    .await?;

                let attachment = match message.request_attachment(|f| self.formats.supports(f)) {
                    Some(attachment) => attachment,
                    None => {
                        let cause = ProofError::MissingAttachment(format!(
                            "no supported request attachment in message {}",
                            message.id
                        ));
                        return Err(self.fail_record(&mut record, cause).await);
                    }
                };
                let service = self.service_for_formats(message.formats.as_deref())?;
                if let Err(cause) = service.process_request(attachment).await {
                    return Err(self.fail_record(&mut record, cause).await);
                }

                self.save_typed(record.id(), MessageRole::Receiver, MessageClass::Request, message)
                    .await?;
                self.update_state(&mut record, ProofState::RequestReceived).await?;
                Ok(record)
            }
            None => {
                if let Some(connection_id) = &context.connection_id {
                    self.connections.assert_ready(connection_id).await?;
                }
                let attachment = message
                    .request_attachment(|f| self.formats.supports(f))
                    .ok_or_else(|| {
                        ProofError::MissingAttachment(format!(
                            "no supported request attachment in message {}",
                            message.id
                        ))
                    })?;
                let service = self.service_for_formats(message.formats.as_deref())?;
                service.process_request(attachment).await?;

                let mut record = ProofExchangeRecord::new(
                    ProofRole::Prover,
                    self.version,
                    ProofState::RequestReceived,
                    message.thread_id(),
                )?;
                record.connection_id = context.connection_id.clone();
                record.parent_thread_id = message.parent_thread_id().map(str::to_string);

                self.save_typed(record.id(), MessageRole::Receiver, MessageClass::Request, message)
                    .await?;
                self.save_new_record(&record).await?;
                Ok(record)
            }
        }
    }

    /// Negotiates a received request by answering with a
    /// counter-proposal instead of a presentation.
    pub async fn negotiate_request(
        &self,
        options: NegotiateRequestOptions,
    ) -> Result<(ProofExchangeRecord, ProposePresentationMessage), ProofError> {
        let mut record = self.records.get_by_id(&options.record_id).await?;
        record.assert_protocol_version(self.version)?;
        record.assert_state(&[ProofState::RequestReceived])?;

        if record.connection_id.is_none() {
            return Err(ProofError::Unsupported(format!(
                "no connection for proof record `{}`; connection-less exchanges do not support negotiation",
                record.id()
            )));
        }

        let service = self.formats.default_service()?;
        let attachment_id = self.new_attachment_id(LEGACY_PROPOSAL_ATTACHMENT_ID);
        let attachment = service.create_proposal(&options.proposal, &attachment_id).await?;

        let mut message = ProposePresentationMessage::new(self.version);
        message.comment = options.comment;
        message.formats = self.format_entries(&attachment_id, service.proposal_format());
        message.proposal_attachments = vec![attachment];
        message.thread = Some(respond_in_thread(
            &record.thread_id,
            record.parent_thread_id.as_deref(),
        ));

        self.save_typed(record.id(), MessageRole::Sender, MessageClass::Proposal, &message)
            .await?;
        record.auto_accept = options.auto_accept.or(record.auto_accept);
        self.update_state(&mut record, ProofState::ProposalSent).await?;

        Ok((record, message))
    }

    /// Accepts a received request by answering with a presentation.
    pub async fn accept_request(
        &self,
        options: AcceptRequestOptions,
    ) -> Result<(ProofExchangeRecord, PresentationMessage), ProofError> {
        let mut record = self.records.get_by_id(&options.record_id).await?;
        record.assert_protocol_version(self.version)?;
        record.assert_state(&[ProofState::RequestReceived])?;

        let request: RequestPresentationMessage = self
            .get_typed(record.id(), MessageClass::Request, Some(MessageRole::Receiver))
            .await?;
        let proposal: Option<ProposePresentationMessage> = self
            .find_typed(record.id(), MessageClass::Proposal, Some(MessageRole::Sender))
            .await?;

        let request_attachment = match request.request_attachment(|f| self.formats.supports(f)) {
            Some(attachment) => attachment.clone(),
            None => {
                let cause = ProofError::MissingAttachment(format!(
                    "no supported request attachment for presentation with thread id {}",
                    record.thread_id
                ));
                return Err(self.fail_record(&mut record, cause).await);
            }
        };
        let proposal_attachment = proposal
            .as_ref()
            .and_then(|p| p.proposal_attachment(|f| self.formats.supports(f)).cloned());
        let service = self.service_for_formats(request.formats.as_deref())?;

        let attachment_id = self.new_attachment_id(LEGACY_PRESENTATION_ATTACHMENT_ID);
        let attachment = match service
            .accept_request(
                &request_attachment,
                proposal_attachment.as_ref(),
                options.selection.as_ref(),
                &attachment_id,
            )
            .await
        {
            Ok(attachment) => attachment,
            // Resolver exhaustion and malformed payloads abandon the
            // exchange; the caller still sees the typed error.
            Err(cause) if cause.is_abandoning() => {
                return Err(self.fail_record(&mut record, cause).await)
            }
            Err(cause) => return Err(cause),
        };

        let mut message = PresentationMessage::new(self.version);
        message.comment = options.comment;
        message.formats = self.format_entries(&attachment_id, service.presentation_format());
        message.presentation_attachments = vec![attachment];
        message.thread = Some(respond_in_thread(
            &record.thread_id,
            record.parent_thread_id.as_deref(),
        ));

        self.save_typed(record.id(), MessageRole::Sender, MessageClass::Presentation, &message)
            .await?;
        record.auto_accept = options.auto_accept.or(record.auto_accept);
        self.update_state(&mut record, ProofState::PresentationSent).await?;

        Ok((record, message))
    }

    // ------------------------------------------------------------------
    // Presentation / ack
    // ------------------------------------------------------------------

    /// Processes a received presentation as verifier: validates, runs
    /// verification, and either advances to `PresentationReceived` or
    /// abandons the exchange.
    pub async fn process_presentation(
        &self,
        context: InboundMessageContext<PresentationMessage>,
    ) -> Result<ProofExchangeRecord, ProofError> {
        let message = &context.message;
        debug!("processing presentation with message id {}", message.id);
        self.assert_message_version(&message.message_type)?;

        let mut record = self
            .records
            .find_by_thread_and_role(message.thread_id(), ProofRole::Verifier, None)
            .await?
            .ok_or_else(|| {
                ProofError::NotFound(format!(
                    "no proof record for thread id {}",
                    message.thread_id()
                ))
            })?;

        record.assert_protocol_version(self.version)?;
        record.assert_state(&[ProofState::RequestSent])?;

        let request: RequestPresentationMessage = self
            .get_typed(record.id(), MessageClass::Request, Some(MessageRole::Sender))
            .await?;
        self.assert_sender(&context, &record, request.service().cloned()).await?;

        // A connection-less exchange binds to the sender's channel on
        // first authenticated contact
        if record.connection_id.is_none() {
            record.connection_id = context.connection_id.clone();
        }

        let presentation_attachment =
            match message.presentation_attachment(|f| self.formats.supports(f)) {
                Some(attachment) => attachment.clone(),
                None => {
                    let cause = ProofError::MissingAttachment(
                        "missing presentation attachment".to_string(),
                    );
                    return Err(self.fail_record(&mut record, cause).await);
                }
            };
        let request_attachment = match request.request_attachment(|f| self.formats.supports(f)) {
            Some(attachment) => attachment.clone(),
            None => {
                let cause =
                    ProofError::MissingAttachment("missing request attachment".to_string());
                return Err(self.fail_record(&mut record, cause).await);
            }
        };

        self.save_typed(record.id(), MessageRole::Receiver, MessageClass::Presentation, message)
            .await?;

        let service = self.service_for_formats(message.formats.as_deref())?;
        match service
            .process_presentation(&request_attachment, &presentation_attachment)
            .await
        {
            Ok(true) => {
                record.is_verified = Some(true);
                self.update_state(&mut record, ProofState::PresentationReceived).await?;
                Ok(record)
            }
            Ok(false) => {
                record.is_verified = Some(false);
                let cause = ProofError::VerificationFailed("invalid proof".to_string());
                Err(self.fail_record(&mut record, cause).await)
            }
            Err(cause) => {
                record.is_verified = Some(false);
                Err(self.fail_record(&mut record, cause).await)
            }
        }
    }

    /// Acknowledges a verified presentation, finishing the exchange as
    /// verifier.
    pub async fn accept_presentation(
        &self,
        record_id: &str,
    ) -> Result<(ProofExchangeRecord, PresentationAckMessage), ProofError> {
        let mut record = self.records.get_by_id(record_id).await?;
        record.assert_protocol_version(self.version)?;
        record.assert_state(&[ProofState::PresentationReceived])?;

        let mut message = PresentationAckMessage::new(self.version, AckStatus::Ok);
        message.thread = Some(respond_in_thread(
            &record.thread_id,
            record.parent_thread_id.as_deref(),
        ));

        self.save_typed(record.id(), MessageRole::Sender, MessageClass::Ack, &message)
            .await?;
        self.update_state(&mut record, ProofState::Done).await?;

        Ok((record, message))
    }

    /// Processes a received presentation acknowledgement as prover,
    /// finishing the exchange.
    pub async fn process_ack(
        &self,
        context: InboundMessageContext<PresentationAckMessage>,
    ) -> Result<ProofExchangeRecord, ProofError> {
        let message = &context.message;
        debug!("processing presentation ack with message id {}", message.id);
        self.assert_message_version(&message.message_type)?;

        let mut record = self
            .records
            .find_by_thread_and_role(
                message.thread_id(),
                ProofRole::Prover,
                context.connection_id.as_deref(),
            )
            .await?
            .ok_or_else(|| {
                ProofError::NotFound(format!(
                    "no proof record for thread id {}",
                    message.thread_id()
                ))
            })?;

        record.assert_protocol_version(self.version)?;
        record.assert_state(&[ProofState::PresentationSent])?;

        let last_sent: PresentationMessage = self
            .get_typed(record.id(), MessageClass::Presentation, Some(MessageRole::Sender))
            .await?;
        self.assert_sender(&context, &record, last_sent.service().cloned()).await?;

        self.save_typed(record.id(), MessageRole::Receiver, MessageClass::Ack, message)
            .await?;
        self.update_state(&mut record, ProofState::Done).await?;

        Ok(record)
    }

    // ------------------------------------------------------------------
    // Problem report
    // ------------------------------------------------------------------

    /// Builds a problem report threaded to an exchange. Does not
    /// transition state; abandonment is driven by the failing operation.
    pub async fn create_problem_report(
        &self,
        record_id: &str,
        description: &str,
    ) -> Result<(ProofExchangeRecord, PresentationProblemReportMessage), ProofError> {
        let record = self.records.get_by_id(record_id).await?;
        let mut message = PresentationProblemReportMessage::new(self.version, description);
        message.thread = Some(respond_in_thread(
            &record.thread_id,
            record.parent_thread_id.as_deref(),
        ));
        Ok((record, message))
    }

    /// Processes a received problem report: records the reason and
    /// abandons the exchange.
    pub async fn process_problem_report(
        &self,
        context: InboundMessageContext<PresentationProblemReportMessage>,
    ) -> Result<ProofExchangeRecord, ProofError> {
        let message = &context.message;
        debug!("processing problem report with message id {}", message.id);
        self.assert_message_version(&message.message_type)?;

        // A problem report may arrive at either side of the exchange
        let mut record = match self
            .records
            .find_by_thread_and_role(message.thread_id(), ProofRole::Prover, None)
            .await?
        {
            Some(record) => record,
            None => self
                .records
                .find_by_thread_and_role(message.thread_id(), ProofRole::Verifier, None)
                .await?
                .ok_or_else(|| {
                    ProofError::NotFound(format!(
                        "no proof record for thread id {}",
                        message.thread_id()
                    ))
                })?,
        };

        self.assert_sender(&context, &record, None).await?;

        self.save_typed(record.id(), MessageRole::Receiver, MessageClass::ProblemReport, message)
            .await?;
        record.error_message = Some(format!(
            "abandoned: {}",
            message.description.en.as_deref().unwrap_or("no description")
        ));
        self.update_state(&mut record, ProofState::Abandoned).await?;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Credential resolution pass-throughs
    // ------------------------------------------------------------------

    /// Read-only candidate retrieval for the stored request of an
    /// exchange.
    pub async fn get_credentials_for_request(
        &self,
        record_id: &str,
        options: &SelectionOptions,
    ) -> Result<CredentialsForRequest, ProofError> {
        let (service, attachment) = self.stored_request_attachment(record_id).await?;
        service.get_credentials_for_request(&attachment, options).await
    }

    /// Read-only automatic selection for the stored request of an
    /// exchange.
    pub async fn select_credentials_for_request(
        &self,
        record_id: &str,
        options: &SelectionOptions,
    ) -> Result<SelectedCredentials, ProofError> {
        let (service, attachment) = self.stored_request_attachment(record_id).await?;
        service.select_credentials_for_request(&attachment, options).await
    }

    // ------------------------------------------------------------------
    // Auto-accept decisions
    // ------------------------------------------------------------------

    /// Whether a received proposal should be answered automatically.
    pub async fn should_auto_respond_to_proposal(
        &self,
        record: &ProofExchangeRecord,
        proposal: &ProposePresentationMessage,
    ) -> Result<bool, ProofError> {
        match effective_auto_accept(record.auto_accept, self.config.auto_accept) {
            AutoAcceptProof::Always => return Ok(true),
            AutoAcceptProof::Never => return Ok(false),
            AutoAcceptProof::ContentApproved => {}
        }

        // Content approval: the proposal must match the request we sent
        let Some(request) = self
            .find_typed::<RequestPresentationMessage>(
                record.id(),
                MessageClass::Request,
                Some(MessageRole::Sender),
            )
            .await?
        else {
            return Ok(false);
        };
        let Some(request_attachment) = request.request_attachment(|f| self.formats.supports(f))
        else {
            return Ok(false);
        };
        let Some(proposal_attachment) = proposal.proposal_attachment(|f| self.formats.supports(f))
        else {
            return Ok(false);
        };

        let service = self.service_for_formats(proposal.formats.as_deref())?;
        service
            .should_auto_respond_to_proposal(proposal_attachment, request_attachment)
            .await
    }

    /// Whether a received request should be answered automatically.
    pub async fn should_auto_respond_to_request(
        &self,
        record: &ProofExchangeRecord,
        request: &RequestPresentationMessage,
    ) -> Result<bool, ProofError> {
        match effective_auto_accept(record.auto_accept, self.config.auto_accept) {
            AutoAcceptProof::Always => return Ok(true),
            AutoAcceptProof::Never => return Ok(false),
            AutoAcceptProof::ContentApproved => {}
        }

        // Content approval: the request must match the proposal we sent
        let Some(proposal) = self
            .find_typed::<ProposePresentationMessage>(
                record.id(),
                MessageClass::Proposal,
                Some(MessageRole::Sender),
            )
            .await?
        else {
            return Ok(false);
        };
        let Some(proposal_attachment) = proposal.proposal_attachment(|f| self.formats.supports(f))
        else {
            return Ok(false);
        };
        let Some(request_attachment) = request.request_attachment(|f| self.formats.supports(f))
        else {
            return Ok(false);
        };

        let service = self.service_for_formats(request.formats.as_deref())?;
        service
            .should_auto_respond_to_request(proposal_attachment, request_attachment)
            .await
    }

    /// Whether a received presentation should be acknowledged
    /// automatically.
    pub async fn should_auto_respond_to_presentation(
        &self,
        record: &ProofExchangeRecord,
        presentation: &PresentationMessage,
    ) -> Result<bool, ProofError> {
        match effective_auto_accept(record.auto_accept, self.config.auto_accept) {
            AutoAcceptProof::Always => return Ok(true),
            AutoAcceptProof::Never => return Ok(false),
            AutoAcceptProof::ContentApproved => {}
        }

        let Some(request) = self
            .find_typed::<RequestPresentationMessage>(
                record.id(),
                MessageClass::Request,
                Some(MessageRole::Sender),
            )
            .await?
        else {
            return Ok(false);
        };
        let Some(request_attachment) = request.request_attachment(|f| self.formats.supports(f))
        else {
            return Ok(false);
        };
        let Some(presentation_attachment) =
            presentation.presentation_attachment(|f| self.formats.supports(f))
        else {
            return Ok(false);
        };

        let service = self.service_for_formats(presentation.formats.as_deref())?;
        service
            .should_auto_respond_to_presentation(request_attachment, presentation_attachment)
            .await
    }

    // ------------------------------------------------------------------
    // Message lookups
    // ------------------------------------------------------------------

    /// The current (most recently saved) proposal message of an
    /// exchange.
    pub async fn find_proposal_message(
        &self,
        record_id: &str,
    ) -> Result<Option<ProposePresentationMessage>, ProofError> {
        self.find_typed(record_id, MessageClass::Proposal, None).await
    }

    /// The current (most recently saved) request message of an exchange.
    pub async fn find_request_message(
        &self,
        record_id: &str,
    ) -> Result<Option<RequestPresentationMessage>, ProofError> {
        self.find_typed(record_id, MessageClass::Request, None).await
    }

    /// The current (most recently saved) presentation message of an
    /// exchange.
    pub async fn find_presentation_message(
        &self,
        record_id: &str,
    ) -> Result<Option<PresentationMessage>, ProofError> {
        self.find_typed(record_id, MessageClass::Presentation, None).await
    }

    /// Decoded payloads of everything exchanged so far.
    pub async fn get_format_data(&self, record_id: &str) -> Result<FormatData, ProofError> {
        let mut data = FormatData::default();

        if let Some(message) = self.find_proposal_message(record_id).await? {
            if let Some(attachment) = message.proposal_attachment(|f| self.formats.supports(f)) {
                data.proposal = Some(attachment.as_data()?);
            }
        }
        if let Some(message) = self.find_request_message(record_id).await? {
            if let Some(attachment) = message.request_attachment(|f| self.formats.supports(f)) {
                data.request = Some(attachment.as_data()?);
            }
        }
        if let Some(message) = self.find_presentation_message(record_id).await? {
            if let Some(attachment) = message.presentation_attachment(|f| self.formats.supports(f))
            {
                data.presentation = Some(attachment.as_data()?);
            }
        }

        Ok(data)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Transitions a record to a new state: validates legality, mutates,
    /// persists and emits the state-changed event. Serialized per record
    /// id with an optimistic re-read so two concurrent handlers cannot
    /// both transition from the same predecessor state.
    pub(crate) async fn update_state(
        &self,
        record: &mut ProofExchangeRecord,
        new_state: ProofState,
    ) -> Result<(), ProofError> {
        let lock = self.record_lock(record.id()).await;
        let _guard = lock.lock().await;

        let stored = self.records.get_by_id(record.id()).await?;
        if stored.state() != record.state() {
            // Another handler transitioned the record first
            return Err(ProofError::InvalidState {
                current: stored.state(),
                allowed: vec![record.state()],
            });
        }

        assert_transition(record.role(), record.state(), new_state)?;

        let previous = record.state();
        record.set_state(new_state);
        self.records.update(record).await?;

        debug!(
            "proof record {} transitioned {} -> {}",
            record.id(),
            previous,
            new_state
        );
        self.events.emit(ProofEvent::StateChanged {
            record: record.clone(),
            previous_state: Some(previous),
        });
        Ok(())
    }

    /// Abandons the record because of an unrecoverable failure, stores a
    /// problem report for the wire, and returns the original error for
    /// the caller. Both the wire message and the local error are
    /// required.
    async fn fail_record(&self, record: &mut ProofExchangeRecord, cause: ProofError) -> ProofError {
        error!("abandoning proof exchange {}: {}", record.id(), cause);
        record.error_message = Some(cause.to_string());

        let mut report = PresentationProblemReportMessage::new(self.version, cause.to_string());
        report.thread = Some(respond_in_thread(
            &record.thread_id,
            record.parent_thread_id.as_deref(),
        ));

        if let Err(storage_error) = self
            .save_typed(record.id(), MessageRole::Sender, MessageClass::ProblemReport, &report)
            .await
        {
            return storage_error;
        }
        if let Err(transition_error) = self.update_state(record, ProofState::Abandoned).await {
            return transition_error;
        }
        cause
    }

    async fn save_new_record(&self, record: &ProofExchangeRecord) -> Result<(), ProofError> {
        self.records.save(record).await?;
        self.events.emit(ProofEvent::StateChanged {
            record: record.clone(),
            previous_state: None,
        });
        Ok(())
    }

    async fn record_lock(&self, record_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.transition_locks.lock().await;
        locks
            .entry(record_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn assert_message_version(&self, message_type: &str) -> Result<(), ProofError> {
        match ProtocolVersion::from_message_type(message_type) {
            Some(version) if version == self.version => Ok(()),
            Some(version) => Err(ProofError::ProtocolVersionMismatch {
                expected: self.version.to_string(),
                actual: version.to_string(),
            }),
            None => Err(ProofError::Format(format!(
                "unrecognized message type `{}`",
                message_type
            ))),
        }
    }

    async fn assert_sender<M>(
        &self,
        context: &InboundMessageContext<M>,
        record: &ProofExchangeRecord,
        our_service: Option<ServiceDecorator>,
    ) -> Result<(), ProofError> {
        let assertion = SenderAssertion {
            connection_id: context.connection_id.clone(),
            sender_key: context.sender_key.clone(),
            recipient_key: context.recipient_key.clone(),
            expected_connection_id: record.connection_id.clone(),
            our_service,
        };
        self.connections.assert_authorized_sender(&assertion).await
    }

    fn new_attachment_id(&self, legacy_id: &str) -> String {
        match self.version {
            ProtocolVersion::V1 => legacy_id.to_string(),
            ProtocolVersion::V2 => Uuid::new_v4().to_string(),
        }
    }

    fn format_entries(&self, attachment_id: &str, format_id: &str) -> Option<Vec<FormatSpec>> {
        match self.version {
            ProtocolVersion::V1 => None,
            ProtocolVersion::V2 => Some(vec![FormatSpec {
                attachment_id: attachment_id.to_string(),
                format: format_id.to_string(),
            }]),
        }
    }

    fn service_for_formats(
        &self,
        formats: Option<&[FormatSpec]>,
    ) -> Result<Arc<dyn ProofFormatService>, ProofError> {
        match formats {
            Some(specs) => specs
                .iter()
                .find_map(|spec| self.formats.service_for_format(&spec.format).ok())
                .ok_or_else(|| {
                    ProofError::Format("no registered service supports the message formats".to_string())
                }),
            None => self.formats.default_service(),
        }
    }

    /// The proposal attachment of a message, abandoning the record when
    /// it is structurally required but absent.
    async fn proposal_attachment_of<'a>(
        &self,
        message: &'a ProposePresentationMessage,
        record: &mut ProofExchangeRecord,
    ) -> Result<&'a Attachment, ProofError> {
        match message.proposal_attachment(|f| self.formats.supports(f)) {
            Some(attachment) => Ok(attachment),
            None => {
                let cause = ProofError::MissingAttachment(format!(
                    "no supported proposal attachment in message {}",
                    message.id
                ));
                Err(self.fail_record(record, cause).await)
            }
        }
    }

    async fn stored_request_attachment(
        &self,
        record_id: &str,
    ) -> Result<(Arc<dyn ProofFormatService>, Attachment), ProofError> {
        let request: RequestPresentationMessage = self
            .get_typed(record_id, MessageClass::Request, Some(MessageRole::Receiver))
            .await?;
        let attachment = request
            .request_attachment(|f| self.formats.supports(f))
            .cloned()
            .ok_or_else(|| {
                ProofError::MissingAttachment(format!(
                    "no supported request attachment stored for record `{}`",
                    record_id
                ))
            })?;
        let service = self.service_for_formats(request.formats.as_deref())?;
        Ok((service, attachment))
    }

    async fn save_typed<M: Serialize + Sync>(
        &self,
        record_id: &str,
        role: MessageRole,
        class: MessageClass,
        message: &M,
    ) -> Result<(), ProofError> {
        let value = serde_json::to_value(message)?;
        self.messages.save_message(record_id, role, class, value).await
    }

    async fn find_typed<M: DeserializeOwned>(
        &self,
        record_id: &str,
        class: MessageClass,
        role: Option<MessageRole>,
    ) -> Result<Option<M>, ProofError> {
        match self.messages.find_message(record_id, class, role).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn get_typed<M: DeserializeOwned>(
        &self,
        record_id: &str,
        class: MessageClass,
        role: Option<MessageRole>,
    ) -> Result<M, ProofError> {
        let value = self.messages.get_message(record_id, class, role).await?;
        Ok(serde_json::from_value(value)?)
    }
}
