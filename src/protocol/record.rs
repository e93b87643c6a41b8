// src/protocol/record.rs
//! The proof exchange record: persistent state of one negotiation.
//!
//! The record carries no protocol logic. Its invariants: `id`, `role`
//! and `protocol_version` are immutable after creation; `state` only
//! changes through the engine's transition operation; `is_verified` is
//! set at most once, when a presentation has been cryptographically
//! checked.

use crate::error::ProofError;
use crate::messages::ProtocolVersion;
use crate::protocol::negotiator::AutoAcceptProof;
use crate::protocol::state::{legal_initial_states, ProofRole, ProofState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persistent state of one proof exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofExchangeRecord {
    id: String,
    created_at: DateTime<Utc>,
    role: ProofRole,
    protocol_version: ProtocolVersion,
    state: ProofState,
    /// Correlates all messages of the exchange
    pub thread_id: String,
    /// Set when the exchange was spawned from an out-of-band invitation
    pub parent_thread_id: Option<String>,
    /// Absent for connection-less exchanges
    pub connection_id: Option<String>,
    /// Per-record override of the global auto-accept policy
    pub auto_accept: Option<AutoAcceptProof>,
    /// Set once, when the presentation has been cryptographically
    /// checked
    pub is_verified: Option<bool>,
    /// Set when the record enters the terminal `Abandoned` state
    pub error_message: Option<String>,
}

impl ProofExchangeRecord {
    /// Creates a record in one of the role's legal initial states.
    ///
    /// # Errors
    /// `ProofError::InvalidState` when `state` is not a legal initial
    /// state for `role`.
    pub fn new(
        role: ProofRole,
        protocol_version: ProtocolVersion,
        state: ProofState,
        thread_id: impl Into<String>,
    ) -> Result<Self, ProofError> {
        let initial = legal_initial_states(role);
        if !initial.contains(&state) {
            return Err(ProofError::InvalidState {
                current: state,
                allowed: initial.to_vec(),
            });
        }

        Ok(ProofExchangeRecord {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            role,
            protocol_version,
            state,
            thread_id: thread_id.into(),
            parent_thread_id: None,
            connection_id: None,
            auto_accept: None,
            is_verified: None,
            error_message: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn role(&self) -> ProofRole {
        self.role
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub fn state(&self) -> ProofState {
        self.state
    }

    /// Mutates the state without legality checks. Only the engine's
    /// transition operation calls this, after `assert_transition`.
    pub(crate) fn set_state(&mut self, state: ProofState) {
        self.state = state;
    }

    /// Asserts the record is in one of the expected states.
    ///
    /// # Errors
    /// `ProofError::InvalidState` naming the current state and the
    /// expected set.
    pub fn assert_state(&self, expected: &[ProofState]) -> Result<(), ProofError> {
        if expected.contains(&self.state) {
            Ok(())
        } else {
            Err(ProofError::InvalidState {
                current: self.state,
                allowed: expected.to_vec(),
            })
        }
    }

    /// Asserts the record was created for the given protocol version.
    pub fn assert_protocol_version(&self, version: ProtocolVersion) -> Result<(), ProofError> {
        if self.protocol_version == version {
            Ok(())
        } else {
            Err(ProofError::ProtocolVersionMismatch {
                expected: self.protocol_version.to_string(),
                actual: version.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_rejects_illegal_initial_state() {
        let err = ProofExchangeRecord::new(
            ProofRole::Prover,
            ProtocolVersion::V1,
            ProofState::PresentationSent,
            "thread-1",
        )
        .unwrap_err();
        assert!(matches!(err, ProofError::InvalidState { .. }));
    }

    #[test]
    fn test_fresh_record_has_no_verification_result() {
        let record = ProofExchangeRecord::new(
            ProofRole::Verifier,
            ProtocolVersion::V1,
            ProofState::RequestSent,
            "thread-1",
        )
        .unwrap();
        assert!(record.is_verified.is_none());
        assert!(record.error_message.is_none());
        assert_eq!(record.state(), ProofState::RequestSent);
    }

    #[test]
    fn test_assert_state_names_current_and_expected() {
        let record = ProofExchangeRecord::new(
            ProofRole::Prover,
            ProtocolVersion::V2,
            ProofState::ProposalSent,
            "thread-2",
        )
        .unwrap();

        let err = record
            .assert_state(&[ProofState::RequestReceived])
            .unwrap_err();
        match err {
            ProofError::InvalidState { current, allowed } => {
                assert_eq!(current, ProofState::ProposalSent);
                assert_eq!(allowed, vec![ProofState::RequestReceived]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_protocol_version_is_asserted() {
        let record = ProofExchangeRecord::new(
            ProofRole::Prover,
            ProtocolVersion::V1,
            ProofState::ProposalSent,
            "thread-3",
        )
        .unwrap();
        assert!(record.assert_protocol_version(ProtocolVersion::V1).is_ok());
        assert!(record.assert_protocol_version(ProtocolVersion::V2).is_err());
    }
}
