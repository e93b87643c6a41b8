// src/protocol/events.rs
//! Protocol event bus.
//!
//! Every state mutation emits a `StateChanged` event carrying the
//! updated record and the state it left. Delivery is fan-out over a
//! tokio broadcast channel; emitting with no subscribers is not an
//! error.

use crate::protocol::record::ProofExchangeRecord;
use crate::protocol::state::ProofState;
use tokio::sync::broadcast;

/// Events emitted by the proof exchange protocol engine.
#[derive(Debug, Clone)]
pub enum ProofEvent {
    /// An exchange record changed state. `previous_state` is `None` for
    /// record creation.
    StateChanged {
        record: ProofExchangeRecord,
        previous_state: Option<ProofState>,
    },
}

/// Broadcast bus for protocol events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ProofEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProofEvent> {
        self.sender.subscribe()
    }

    /// Emits an event to all current subscribers.
    pub fn emit(&self, event: ProofEvent) {
        // A send error only means there are no subscribers right now
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ProtocolVersion;
    use crate::protocol::state::ProofRole;

    #[tokio::test]
    async fn test_state_changed_events_reach_subscribers() {
        let bus = EventBus::default();
        let mut subscription = bus.subscribe();

        let record = ProofExchangeRecord::new(
            ProofRole::Prover,
            ProtocolVersion::V1,
            ProofState::ProposalSent,
            "thread-1",
        )
        .unwrap();

        bus.emit(ProofEvent::StateChanged {
            record: record.clone(),
            previous_state: None,
        });

        let ProofEvent::StateChanged { record: received, previous_state } =
            subscription.recv().await.unwrap();
        assert_eq!(received.id(), record.id());
        assert!(previous_state.is_none());
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::default();
        let record = ProofExchangeRecord::new(
            ProofRole::Verifier,
            ProtocolVersion::V1,
            ProofState::RequestSent,
            "thread-2",
        )
        .unwrap();
        bus.emit(ProofEvent::StateChanged {
            record,
            previous_state: None,
        });
    }
}
