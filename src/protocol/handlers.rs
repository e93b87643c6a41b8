// src/protocol/handlers.rs
//! Inbound message handlers.
//!
//! A handler runs the full inbound shape for one message type: process
//! the message through the engine, consult the auto-accept negotiator,
//! and produce the outbound reply when the policy allows responding
//! without external confirmation. When processing abandons the exchange
//! the handler surfaces both the problem report destined for the wire
//! and the typed error.

use crate::error::ProofError;
use crate::messages::{
    DidCommMessage, PresentationAckMessage, PresentationMessage,
    PresentationProblemReportMessage, ProposePresentationMessage, RequestPresentationMessage,
};
use crate::protocol::engine::{
    AcceptProposalOptions, AcceptRequestOptions, InboundMessageContext, ProofProtocol,
};
use crate::protocol::record::ProofExchangeRecord;
use crate::protocol::state::{ProofRole, ProofState};
use crate::storage::{MessageClass, MessageRole};

/// An outbound protocol message produced by a handler.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Proposal(ProposePresentationMessage),
    Request(RequestPresentationMessage),
    Presentation(PresentationMessage),
    Ack(PresentationAckMessage),
    ProblemReport(PresentationProblemReportMessage),
}

/// Result of handling one inbound message.
pub enum InboundOutcome {
    /// The message was processed; responding is left to the caller
    Recorded { record: ProofExchangeRecord },
    /// The message was processed and auto-accepted
    Replied {
        record: ProofExchangeRecord,
        reply: OutboundMessage,
    },
    /// Processing abandoned the exchange; the problem report must be
    /// sent and the error is still raised locally
    Abandoned {
        record: ProofExchangeRecord,
        problem_report: PresentationProblemReportMessage,
        error: ProofError,
    },
}

impl ProofProtocol {
    /// Handles an inbound proposal: process, then answer with a request
    /// when the negotiator allows it.
    pub async fn handle_proposal(
        &self,
        context: InboundMessageContext<ProposePresentationMessage>,
    ) -> Result<InboundOutcome, ProofError> {
        let message = context.message.clone();
        let record = match self.process_proposal(context).await {
            Ok(record) => record,
            Err(error) => {
                return self
                    .abandoned_outcome(message.thread_id(), ProofRole::Verifier, error)
                    .await
            }
        };

        if self.should_auto_respond_to_proposal(&record, &message).await? {
            let (record, reply) = self
                .accept_proposal(AcceptProposalOptions {
                    record_id: record.id().to_string(),
                    ..Default::default()
                })
                .await?;
            Ok(InboundOutcome::Replied {
                record,
                reply: OutboundMessage::Request(reply),
            })
        } else {
            Ok(InboundOutcome::Recorded { record })
        }
    }

    /// Handles an inbound request: process, then answer with a
    /// presentation when the negotiator allows it.
    pub async fn handle_request(
        &self,
        context: InboundMessageContext<RequestPresentationMessage>,
    ) -> Result<InboundOutcome, ProofError> {
        let message = context.message.clone();
        let record = match self.process_request(context).await {
            Ok(record) => record,
            Err(error) => {
                return self
                    .abandoned_outcome(message.thread_id(), ProofRole::Prover, error)
                    .await
            }
        };

        if self.should_auto_respond_to_request(&record, &message).await? {
            let (record, reply) = self
                .accept_request(AcceptRequestOptions {
                    record_id: record.id().to_string(),
                    ..Default::default()
                })
                .await?;
            Ok(InboundOutcome::Replied {
                record,
                reply: OutboundMessage::Presentation(reply),
            })
        } else {
            Ok(InboundOutcome::Recorded { record })
        }
    }

    /// Handles an inbound presentation: process (including
    /// verification), then acknowledge when the negotiator allows it.
    pub async fn handle_presentation(
        &self,
        context: InboundMessageContext<PresentationMessage>,
    ) -> Result<InboundOutcome, ProofError> {
        let message = context.message.clone();
        let record = match self.process_presentation(context).await {
            Ok(record) => record,
            Err(error) => {
                return self
                    .abandoned_outcome(message.thread_id(), ProofRole::Verifier, error)
                    .await
            }
        };

        if self
            .should_auto_respond_to_presentation(&record, &message)
            .await?
        {
            let (record, reply) = self.accept_presentation(record.id()).await?;
            Ok(InboundOutcome::Replied {
                record,
                reply: OutboundMessage::Ack(reply),
            })
        } else {
            Ok(InboundOutcome::Recorded { record })
        }
    }

    /// Handles an inbound presentation acknowledgement.
    pub async fn handle_ack(
        &self,
        context: InboundMessageContext<PresentationAckMessage>,
    ) -> Result<InboundOutcome, ProofError> {
        let record = self.process_ack(context).await?;
        Ok(InboundOutcome::Recorded { record })
    }

    /// Handles an inbound problem report.
    pub async fn handle_problem_report(
        &self,
        context: InboundMessageContext<PresentationProblemReportMessage>,
    ) -> Result<InboundOutcome, ProofError> {
        let record = self.process_problem_report(context).await?;
        Ok(InboundOutcome::Recorded { record })
    }

    /// Packages an abandoning failure: the stored problem report goes to
    /// the wire, the typed error to the caller. Errors that did not
    /// abandon a record (including everything raised before a record
    /// existed) propagate unchanged.
    async fn abandoned_outcome(
        &self,
        thread_id: &str,
        role: ProofRole,
        error: ProofError,
    ) -> Result<InboundOutcome, ProofError> {
        if !error.is_abandoning() {
            return Err(error);
        }

        let Some(record) = self
            .records_ref()
            .find_by_thread_and_role(thread_id, role, None)
            .await?
        else {
            // The failure happened before any record was persisted
            return Err(error);
        };
        if record.state() != ProofState::Abandoned {
            return Err(error);
        }

        let Some(problem_report) = self
            .find_stored_problem_report(record.id())
            .await?
        else {
            return Err(error);
        };

        Ok(InboundOutcome::Abandoned {
            record,
            problem_report,
            error,
        })
    }

    async fn find_stored_problem_report(
        &self,
        record_id: &str,
    ) -> Result<Option<PresentationProblemReportMessage>, ProofError> {
        match self
            .messages_ref()
            .find_message(record_id, MessageClass::ProblemReport, Some(MessageRole::Sender))
            .await?
        {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}
