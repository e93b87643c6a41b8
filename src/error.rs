// src/error.rs
//! Error types for the proof exchange protocol engine.
//!
//! Every fallible operation in the crate returns `Result<_, ProofError>`.
//! The variants follow the recoverability contract of the protocol:
//! state and authorization errors are surfaced to the caller as-is, while
//! structural and verification errors discovered after an exchange record
//! exists additionally drive the record into the terminal `Abandoned`
//! state (see `protocol::engine`).

use crate::protocol::state::ProofState;
use thiserror::Error;

/// Errors raised by the proof exchange protocol engine and its
/// collaborating services.
#[derive(Debug, Error)]
pub enum ProofError {
    /// An illegal state transition was attempted. Recoverable: the caller
    /// can inspect the current state and retry with a legal operation.
    #[error("proof record is in invalid state `{current}`. Valid states are: {}", allowed.iter().map(|s| format!("`{}`", s)).collect::<Vec<_>>().join(", "))]
    InvalidState {
        /// State the record was found in
        current: ProofState,
        /// States from which the attempted operation is legal
        allowed: Vec<ProofState>,
    },

    /// A message could not be attributed to the expected connection or
    /// service. Never auto-recovered; the message is rejected outright.
    #[error("unauthorized sender: {0}")]
    UnauthorizedSender(String),

    /// A structurally required attachment is absent from a message.
    #[error("missing attachment: {0}")]
    MissingAttachment(String),

    /// A format-specific payload is structurally malformed.
    #[error("format error: {0}")]
    Format(String),

    /// A non-revocation interval violates the configured best-practice
    /// policy.
    #[error("invalid revocation interval: {0}")]
    RevocationInterval(String),

    /// Credential selection exhausted all candidates for a referent.
    #[error("no suitable credential found for referent `{referent}`")]
    NoSuitableCredential {
        /// The request-local referent that could not be satisfied
        referent: String,
    },

    /// Cryptographic verification of a presentation failed.
    #[error("presentation verification failed: {0}")]
    VerificationFailed(String),

    /// A record or message that is structurally required was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An attribute group and a predicate share a referent name within
    /// one proof request.
    #[error("duplicate referent names in proof request: {0}")]
    DuplicateReferent(String),

    /// The protocol version of a message does not match the record.
    #[error("protocol version mismatch: record is `{expected}`, message is `{actual}`")]
    ProtocolVersionMismatch {
        /// Version the record was created with
        expected: String,
        /// Version carried by the offending message
        actual: String,
    },

    /// The storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The ledger/registry collaborator failed.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// The holder/verifier crypto collaborator failed.
    #[error("holder service error: {0}")]
    Holder(String),

    /// Connection-less negotiation or another unsupported operation was
    /// attempted.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProofError {
    /// Whether this error must abandon the exchange when it occurs after
    /// a record exists, pairing the local error with a problem report.
    pub fn is_abandoning(&self) -> bool {
        matches!(
            self,
            ProofError::MissingAttachment(_)
                | ProofError::Format(_)
                | ProofError::DuplicateReferent(_)
                | ProofError::VerificationFailed(_)
                | ProofError::NoSuitableCredential { .. }
        )
    }
}
