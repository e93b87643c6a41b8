// src/lib.rs

//! # Proof Exchange Protocol Engine
//!
//! A DIDComm present-proof protocol engine: it drives the multi-message,
//! asynchronous negotiation between a prover and a verifier that ends in
//! the exchange of a verifiable presentation.
//!
//! ## Architecture Overview
//! 1. **Protocol Layer**: state machine, exchange records, message
//!    handlers and auto-accept negotiation (`protocol`)
//! 2. **Format Layer**: pluggable proof format services building and
//!    parsing format-specific attachments (`formats`)
//! 3. **Message Layer**: protocol message types, attachments and
//!    decorators (`messages`)
//! 4. **Service Layer**: collaborator interfaces for holder/verifier
//!    cryptography, ledger lookup and connections (`services`)
//! 5. **Storage Layer**: record and message-log repositories (`storage`)
//!
//! The crate is a library component: proof cryptography, transport
//! encryption and persistent storage engines plug in behind the
//! collaborator traits in `services` and `storage`.

pub mod error;
pub mod formats; // Proof format services and credential selection
pub mod messages; // Protocol messages, attachments, decorators
pub mod models; // Wire data models
pub mod protocol; // State machine, engine, handlers, events
pub mod services; // External collaborator interfaces
pub mod storage; // Record and message-log repositories
pub mod utils; // Encoding and request-construction helpers

pub use error::ProofError;
pub use messages::ProtocolVersion;
pub use protocol::{
    AutoAcceptProof, ProofExchangeConfig, ProofExchangeRecord, ProofProtocol, ProofRole,
    ProofState,
};

#[cfg(test)]
mod e2e_tests;
