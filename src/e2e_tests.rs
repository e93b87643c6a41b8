// src/e2e_tests.rs
//! End-to-end exchanges between a prover and a verifier engine over
//! in-memory collaborators.

use crate::error::ProofError;
use crate::formats::{FormatRegistry, LegacyIndyProofFormatService, ProofProposalInput, ProofRequestInput};
use crate::messages::{DidCommMessage, PresentationMessage, ProblemReportReason, ProtocolVersion};
use crate::models::proof_request::PredicateType;
use crate::models::{
    CredentialInfo, PresentationPreview, PreviewAttribute, PreviewPredicate, Proof, ProofRequest,
    RequestedPredicate,
};
use crate::protocol::engine::{
    CreateProposalOptions, CreateRequestOptions, InboundMessageContext, NegotiateProposalOptions,
    NegotiateRequestOptions, ProofExchangeConfig, ProofProtocol,
};
use crate::protocol::handlers::{InboundOutcome, OutboundMessage};
use crate::protocol::negotiator::AutoAcceptProof;
use crate::protocol::state::ProofState;
use crate::protocol::EventBus;
use crate::services::registry::{CredentialDefinition, Schema};
use crate::services::{
    InMemoryConnectionService, InMemoryHolder, InMemoryLedger, InMemoryVerifier,
};
use crate::storage::{InMemoryMessageRepository, InMemoryProofRepository};
use std::collections::BTreeMap;
use std::sync::Arc;

const SCHEMA_ID: &str = "did:sov:issuer:2:employment:1.0";
const CRED_DEF_ID: &str = "did:sov:issuer:3:CL:12:default";
const CONNECTION_ID: &str = "conn-prover-verifier";

struct TestAgent {
    holder: Arc<InMemoryHolder>,
    engine: ProofProtocol,
}

async fn shared_ledger() -> Arc<InMemoryLedger> {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger
        .register_schema(Schema {
            id: SCHEMA_ID.to_string(),
            name: "employment".to_string(),
            version: "1.0".to_string(),
            attr_names: vec!["name".to_string(), "age".to_string()],
        })
        .await;
    ledger
        .register_credential_definition(CredentialDefinition {
            id: CRED_DEF_ID.to_string(),
            schema_id: SCHEMA_ID.to_string(),
            tag: "default".to_string(),
            value: serde_json::json!({}),
        })
        .await;
    ledger
}

async fn agent(
    auto_accept: AutoAcceptProof,
    ledger: Arc<InMemoryLedger>,
    connections: Arc<InMemoryConnectionService>,
) -> TestAgent {
    let holder = Arc::new(InMemoryHolder::new());
    let indy = Arc::new(LegacyIndyProofFormatService::new(
        holder.clone(),
        Arc::new(InMemoryVerifier::new()),
        ledger,
    ));
    let engine = ProofProtocol::new(
        ProtocolVersion::V1,
        FormatRegistry::new(vec![indy]),
        ProofExchangeConfig { auto_accept },
        Arc::new(InMemoryProofRepository::new()),
        Arc::new(InMemoryMessageRepository::new()),
        connections,
        EventBus::default(),
    );
    TestAgent { holder, engine }
}

async fn setup(auto_accept: AutoAcceptProof) -> (TestAgent, TestAgent) {
    let _ = env_logger::builder().is_test(true).try_init();

    let ledger = shared_ledger().await;
    let connections = Arc::new(InMemoryConnectionService::new());
    connections.add_connection(CONNECTION_ID).await;

    let prover = agent(auto_accept, ledger.clone(), connections.clone()).await;
    prover
        .holder
        .store_credential(CredentialInfo {
            credential_id: "cred-alice".to_string(),
            attributes: BTreeMap::from([
                ("name".to_string(), "Alice".to_string()),
                ("age".to_string(), "30".to_string()),
            ]),
            schema_id: SCHEMA_ID.to_string(),
            cred_def_id: CRED_DEF_ID.to_string(),
            revocation_registry_id: None,
            credential_revocation_index: None,
        })
        .await;

    let verifier = agent(auto_accept, ledger, connections).await;
    (prover, verifier)
}

fn name_proposal() -> ProofProposalInput {
    ProofProposalInput::new(PresentationPreview {
        attributes: vec![PreviewAttribute {
            name: "name".to_string(),
            cred_def_id: Some(CRED_DEF_ID.to_string()),
            ..Default::default()
        }],
        predicates: vec![],
    })
}

fn age_request(threshold: i64) -> ProofRequestInput {
    ProofRequestInput {
        name: "age check".to_string(),
        version: "1.0".to_string(),
        requested_attributes: BTreeMap::new(),
        requested_predicates: BTreeMap::from([(
            "predicate_age".to_string(),
            RequestedPredicate {
                name: "age".to_string(),
                p_type: PredicateType::GreaterThanOrEqual,
                p_value: threshold,
                restrictions: None,
                non_revoked: None,
            },
        )]),
        non_revoked: None,
    }
}

#[tokio::test]
async fn test_happy_path_with_auto_accept_always() {
    let (prover, verifier) = setup(AutoAcceptProof::Always).await;

    // Prover proposes revealing "name"
    let (prover_record, proposal) = prover
        .engine
        .create_proposal(CreateProposalOptions {
            connection_id: Some(CONNECTION_ID.to_string()),
            proposal: name_proposal(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(prover_record.state(), ProofState::ProposalSent);
    let proposed: ProofRequest = proposal
        .proposal_attachment(|_| true)
        .unwrap()
        .as_data()
        .unwrap();

    // Verifier auto-accepts the proposal with a request
    let outcome = verifier
        .engine
        .handle_proposal(InboundMessageContext::with_connection(
            proposal.clone(),
            CONNECTION_ID,
        ))
        .await
        .unwrap();
    let request = match outcome {
        InboundOutcome::Replied {
            reply: OutboundMessage::Request(request),
            ..
        } => request,
        _ => panic!("verifier should auto-respond with a request"),
    };

    // The request carries a fresh nonce, never the proposal's
    let requested: ProofRequest = request
        .request_attachment(|_| true)
        .unwrap()
        .as_data()
        .unwrap();
    assert_ne!(requested.nonce, proposed.nonce);

    // Prover auto-accepts the request with a presentation
    let outcome = prover
        .engine
        .handle_request(InboundMessageContext::with_connection(
            request.clone(),
            CONNECTION_ID,
        ))
        .await
        .unwrap();
    let presentation = match outcome {
        InboundOutcome::Replied {
            reply: OutboundMessage::Presentation(presentation),
            ..
        } => presentation,
        _ => panic!("prover should auto-respond with a presentation"),
    };

    // Revealed value is consistent raw/encoded
    let proof: Proof = presentation
        .presentation_attachment(|_| true)
        .unwrap()
        .as_data()
        .unwrap();
    let revealed = proof.requested_proof.revealed_attrs.values().next().unwrap();
    assert_eq!(revealed.raw, "Alice");
    assert_eq!(
        revealed.encoded,
        crate::utils::encoding::encode_credential_value("Alice")
    );

    // Verifier verifies and auto-acknowledges
    let outcome = verifier
        .engine
        .handle_presentation(InboundMessageContext::with_connection(
            presentation.clone(),
            CONNECTION_ID,
        ))
        .await
        .unwrap();
    let (verifier_record, ack) = match outcome {
        InboundOutcome::Replied {
            record,
            reply: OutboundMessage::Ack(ack),
        } => (record, ack),
        _ => panic!("verifier should auto-acknowledge"),
    };
    assert_eq!(verifier_record.is_verified, Some(true));
    assert_eq!(verifier_record.state(), ProofState::Done);

    // Prover finishes on the ack
    let prover_record = match prover
        .engine
        .handle_ack(InboundMessageContext::with_connection(ack, CONNECTION_ID))
        .await
        .unwrap()
    {
        InboundOutcome::Recorded { record } => record,
        _ => panic!("ack handling produces no reply"),
    };
    assert_eq!(prover_record.state(), ProofState::Done);
}

#[tokio::test]
async fn test_encoding_attack_abandons_the_exchange() {
    let (_prover, verifier) = setup(AutoAcceptProof::Always).await;

    // Verifier requests the "name" attribute
    let (_, request) = verifier
        .engine
        .create_request(CreateRequestOptions {
            connection_id: Some(CONNECTION_ID.to_string()),
            request: ProofRequestInput {
                name: "identity check".to_string(),
                version: "1.0".to_string(),
                requested_attributes: BTreeMap::from([(
                    "attr_name".to_string(),
                    crate::models::RequestedAttribute {
                        name: Some("name".to_string()),
                        ..Default::default()
                    },
                )]),
                ..Default::default()
            },
            ..Default::default()
        })
        .await
        .unwrap();

    // A malicious prover presents raw "Alice" with a forged encoding
    let requested: ProofRequest = request
        .request_attachment(|_| true)
        .unwrap()
        .as_data()
        .unwrap();
    let forged = Proof {
        proof: serde_json::json!({ "nonce": requested.nonce }),
        requested_proof: crate::models::RequestedProof {
            revealed_attrs: BTreeMap::from([(
                "attr_name".to_string(),
                crate::models::RevealedAttribute {
                    sub_proof_index: 0,
                    raw: "Alice".to_string(),
                    encoded: "12345".to_string(),
                },
            )]),
            ..Default::default()
        },
        identifiers: vec![crate::models::ProofIdentifier {
            schema_id: SCHEMA_ID.to_string(),
            cred_def_id: CRED_DEF_ID.to_string(),
            rev_reg_id: None,
            timestamp: None,
        }],
    };

    let mut presentation = PresentationMessage::new(ProtocolVersion::V1);
    presentation.presentation_attachments = vec![crate::messages::Attachment::from_data(
        crate::messages::LEGACY_PRESENTATION_ATTACHMENT_ID,
        &forged,
    )
    .unwrap()];
    presentation.thread = Some(crate::messages::respond_in_thread(request.thread_id(), None));

    let outcome = verifier
        .engine
        .handle_presentation(InboundMessageContext::with_connection(
            presentation,
            CONNECTION_ID,
        ))
        .await
        .unwrap();

    match outcome {
        InboundOutcome::Abandoned {
            record,
            problem_report,
            error,
        } => {
            assert!(matches!(error, ProofError::Format(_)));
            assert_eq!(record.state(), ProofState::Abandoned);
            assert_eq!(record.is_verified, Some(false));
            assert!(record.error_message.unwrap().contains("encoded"));
            assert_eq!(problem_report.description.code, ProblemReportReason::Abandoned);
            assert_eq!(problem_report.thread.unwrap().thid, request.thread_id());
        }
        _ => panic!("encoding mismatch must abandon the exchange"),
    }
}

#[tokio::test]
async fn test_negotiation_keeps_the_latest_request() {
    let (prover, verifier) = setup(AutoAcceptProof::Never).await;

    // Verifier opens with `age >= 21`
    let (_, first_request) = verifier
        .engine
        .create_request(CreateRequestOptions {
            connection_id: Some(CONNECTION_ID.to_string()),
            request: age_request(21),
            ..Default::default()
        })
        .await
        .unwrap();

    let prover_record = prover
        .engine
        .process_request(InboundMessageContext::with_connection(
            first_request.clone(),
            CONNECTION_ID,
        ))
        .await
        .unwrap();
    assert_eq!(prover_record.state(), ProofState::RequestReceived);

    // Prover counter-proposes a broader preview
    let (prover_record, counter_proposal) = prover
        .engine
        .negotiate_request(NegotiateRequestOptions {
            record_id: prover_record.id().to_string(),
            proposal: ProofProposalInput::new(PresentationPreview {
                attributes: vec![PreviewAttribute {
                    name: "name".to_string(),
                    cred_def_id: Some(CRED_DEF_ID.to_string()),
                    ..Default::default()
                }],
                predicates: vec![PreviewPredicate {
                    name: "age".to_string(),
                    predicate: PredicateType::GreaterThanOrEqual,
                    threshold: 18,
                    cred_def_id: Some(CRED_DEF_ID.to_string()),
                }],
            }),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(prover_record.state(), ProofState::ProposalSent);

    // Verifier receives the counter-proposal and negotiates a second
    // request
    let verifier_record = verifier
        .engine
        .process_proposal(InboundMessageContext::with_connection(
            counter_proposal,
            CONNECTION_ID,
        ))
        .await
        .unwrap();
    assert_eq!(verifier_record.state(), ProofState::ProposalReceived);

    let (verifier_record, second_request) = verifier
        .engine
        .negotiate_proposal(NegotiateProposalOptions {
            record_id: verifier_record.id().to_string(),
            request: age_request(21),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(verifier_record.state(), ProofState::RequestSent);
    assert_ne!(second_request.id, first_request.id);

    let prover_record = prover
        .engine
        .process_request(InboundMessageContext::with_connection(
            second_request.clone(),
            CONNECTION_ID,
        ))
        .await
        .unwrap();

    // Both sides' "current request" is the second one
    let at_verifier = verifier
        .engine
        .find_request_message(verifier_record.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(at_verifier.id, second_request.id);

    let at_prover = prover
        .engine
        .find_request_message(prover_record.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(at_prover.id, second_request.id);
}

#[tokio::test]
async fn test_duplicate_inbound_message_transitions_at_most_once() {
    let (prover, verifier) = setup(AutoAcceptProof::Never).await;

    let (_, request) = verifier
        .engine
        .create_request(CreateRequestOptions {
            connection_id: Some(CONNECTION_ID.to_string()),
            request: age_request(21),
            ..Default::default()
        })
        .await
        .unwrap();

    // The same retried request delivered twice: exactly one processing
    // succeeds, the other sees an illegal predecessor state
    let first = prover
        .engine
        .process_request(InboundMessageContext::with_connection(
            request.clone(),
            CONNECTION_ID,
        ))
        .await;
    let second = prover
        .engine
        .process_request(InboundMessageContext::with_connection(
            request,
            CONNECTION_ID,
        ))
        .await;

    assert!(first.is_ok());
    assert!(matches!(second, Err(ProofError::InvalidState { .. })));
}

#[tokio::test]
async fn test_state_changed_events_carry_previous_state() {
    let (prover, _verifier) = setup(AutoAcceptProof::Never).await;
    let mut events = prover.engine.events().subscribe();

    let (record, _) = prover
        .engine
        .create_proposal(CreateProposalOptions {
            connection_id: Some(CONNECTION_ID.to_string()),
            proposal: name_proposal(),
            ..Default::default()
        })
        .await
        .unwrap();

    let crate::protocol::ProofEvent::StateChanged {
        record: emitted,
        previous_state,
    } = events.try_recv().unwrap();
    assert_eq!(emitted.id(), record.id());
    assert_eq!(emitted.state(), ProofState::ProposalSent);
    assert!(previous_state.is_none());
}
