// src/messages/decorators.rs
//! Message decorators: optional field groups shared by all protocol
//! messages.
//!
//! Each decorator is an independent optional field on the concrete
//! message structs; thread-id derivation is a shared helper rather than
//! message-type behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Threading decorator (`~thread`): correlates all messages of one
/// exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadDecorator {
    /// Thread id; equals the id of the first message of the exchange
    pub thid: String,
    /// Parent thread id, set when the exchange was spawned from an
    /// out-of-band invitation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pthid: Option<String>,
}

/// Service decorator (`~service`): transport details for connection-less
/// exchanges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDecorator {
    #[serde(rename = "recipientKeys")]
    pub recipient_keys: Vec<String>,
    #[serde(rename = "routingKeys", default, skip_serializing_if = "Vec::is_empty")]
    pub routing_keys: Vec<String>,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

/// Timing decorator (`~timing`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingDecorator {
    #[serde(rename = "out_time", skip_serializing_if = "Option::is_none")]
    pub out_time: Option<DateTime<Utc>>,
    #[serde(rename = "expires_time", skip_serializing_if = "Option::is_none")]
    pub expires_time: Option<DateTime<Utc>>,
}

/// Shared thread-id derivation: the explicit `~thread.thid` when set,
/// else the message's own id (first message of an exchange).
pub fn thread_id<'a>(thread: Option<&'a ThreadDecorator>, message_id: &'a str) -> &'a str {
    thread.map(|t| t.thid.as_str()).unwrap_or(message_id)
}

/// Builds the `~thread` decorator for a response within an exchange.
pub fn respond_in_thread(thread_id: &str, parent_thread_id: Option<&str>) -> ThreadDecorator {
    ThreadDecorator {
        thid: thread_id.to_string(),
        pthid: parent_thread_id.map(str::to_string),
    }
}
