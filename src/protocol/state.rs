// src/protocol/state.rs
//! Proof exchange states, roles and the legal-transition table.
//!
//! The transition table is the single source of truth for state machine
//! legality: `ProofExchangeRecord::assert_state` guards individual
//! operations, but every mutation ultimately passes through
//! `assert_transition` before being persisted.

use crate::error::ProofError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of this agent within one exchange. Fixed at record creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofRole {
    #[serde(rename = "prover")]
    Prover,
    #[serde(rename = "verifier")]
    Verifier,
}

impl fmt::Display for ProofRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofRole::Prover => write!(f, "prover"),
            ProofRole::Verifier => write!(f, "verifier"),
        }
    }
}

/// State of one proof exchange. `Done` and `Abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofState {
    #[serde(rename = "proposal-sent")]
    ProposalSent,
    #[serde(rename = "proposal-received")]
    ProposalReceived,
    #[serde(rename = "request-sent")]
    RequestSent,
    #[serde(rename = "request-received")]
    RequestReceived,
    #[serde(rename = "presentation-sent")]
    PresentationSent,
    #[serde(rename = "presentation-received")]
    PresentationReceived,
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "abandoned")]
    Abandoned,
}

impl ProofState {
    /// Whether no further transition may leave this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProofState::Done | ProofState::Abandoned)
    }
}

impl fmt::Display for ProofState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProofState::ProposalSent => "proposal-sent",
            ProofState::ProposalReceived => "proposal-received",
            ProofState::RequestSent => "request-sent",
            ProofState::RequestReceived => "request-received",
            ProofState::PresentationSent => "presentation-sent",
            ProofState::PresentationReceived => "presentation-received",
            ProofState::Done => "done",
            ProofState::Abandoned => "abandoned",
        };
        write!(f, "{}", s)
    }
}

/// States a record may be created in, per role.
pub fn legal_initial_states(role: ProofRole) -> &'static [ProofState] {
    match role {
        ProofRole::Prover => &[ProofState::ProposalSent, ProofState::RequestReceived],
        ProofRole::Verifier => &[ProofState::ProposalReceived, ProofState::RequestSent],
    }
}

/// States reachable from `from` for the given role.
///
/// `Abandoned` is reachable from every non-terminal state: any
/// unrecoverable per-exchange failure abandons the record. The
/// `RequestSent -> ProposalReceived` edge carries the verifier side of
/// the negotiation loop (receiving a counter-proposal).
pub fn legal_transitions(role: ProofRole, from: ProofState) -> &'static [ProofState] {
    use ProofState::*;
    match (role, from) {
        (ProofRole::Prover, ProposalSent) => &[RequestReceived, Abandoned],
        (ProofRole::Prover, RequestReceived) => &[ProposalSent, PresentationSent, Abandoned],
        (ProofRole::Prover, PresentationSent) => &[Done, Abandoned],
        (ProofRole::Verifier, ProposalReceived) => &[RequestSent, Abandoned],
        (ProofRole::Verifier, RequestSent) => &[ProposalReceived, PresentationReceived, Abandoned],
        (ProofRole::Verifier, PresentationReceived) => &[Done, Abandoned],
        _ => &[],
    }
}

/// Asserts that moving from `from` to `to` is legal for `role`.
///
/// # Errors
/// `ProofError::InvalidState` naming the current state and the allowed
/// successor set.
pub fn assert_transition(
    role: ProofRole,
    from: ProofState,
    to: ProofState,
) -> Result<(), ProofError> {
    let allowed = legal_transitions(role, from);
    if allowed.contains(&to) {
        Ok(())
    } else {
        Err(ProofError::InvalidState {
            current: from,
            allowed: allowed.to_vec(),
        })
    }
}
