// src/protocol/mod.rs
//! The proof exchange protocol: state machine, exchange record, engine,
//! handlers, auto-accept negotiation and events.

pub mod engine;
pub mod events;
pub mod handlers;
pub mod negotiator;
pub mod record;
pub mod state;

pub use engine::{
    AcceptProposalOptions, AcceptRequestOptions, CreateProposalOptions, CreateRequestOptions,
    FormatData, InboundMessageContext, NegotiateProposalOptions, NegotiateRequestOptions,
    ProofExchangeConfig, ProofProtocol,
};
pub use events::{EventBus, ProofEvent};
pub use handlers::{InboundOutcome, OutboundMessage};
pub use negotiator::AutoAcceptProof;
pub use record::ProofExchangeRecord;
pub use state::{ProofRole, ProofState};
