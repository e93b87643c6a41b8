// src/messages/mod.rs
//! Protocol message types for the present-proof protocol.
//!
//! One concrete struct per message type; decorators (`~thread`,
//! `~service`, `~timing`) are optional field groups composed onto each
//! struct. Message type URIs are derived from the protocol major
//! version; the legacy v1 variant addresses attachments by fixed ids
//! while v2 carries an explicit format-descriptor list.

pub mod attachment;
pub mod decorators;

pub use attachment::{find_format_attachment, Attachment, AttachmentData, FormatSpec};
pub use decorators::{respond_in_thread, thread_id, ServiceDecorator, ThreadDecorator, TimingDecorator};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Fixed attachment id of the proposal payload in the legacy variant.
pub const LEGACY_PROPOSAL_ATTACHMENT_ID: &str = "libindy-presentation-preview-0";
/// Fixed attachment id of the request payload in the legacy variant.
pub const LEGACY_REQUEST_ATTACHMENT_ID: &str = "libindy-request-presentation-0";
/// Fixed attachment id of the presentation payload in the legacy variant.
pub const LEGACY_PRESENTATION_ATTACHMENT_ID: &str = "libindy-presentation-0";

/// Protocol major version of an exchange. Fixed at record creation; all
/// messages in a thread must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Legacy single-format variant: fixed attachment ids, no format
    /// descriptor list
    #[serde(rename = "v1")]
    V1,
    /// Multi-format variant: `(formats, attachments)` pairs keyed by
    /// attachment id
    #[serde(rename = "v2")]
    V2,
}

impl ProtocolVersion {
    /// The version segment used in message type URIs.
    fn uri_segment(self) -> &'static str {
        match self {
            ProtocolVersion::V1 => "1.0",
            ProtocolVersion::V2 => "2.0",
        }
    }

    /// Builds the full message type URI for a message name.
    pub fn message_type(self, name: &str) -> String {
        format!("https://didcomm.org/present-proof/{}/{}", self.uri_segment(), name)
    }

    /// Parses the protocol version out of a message type URI.
    pub fn from_message_type(message_type: &str) -> Option<ProtocolVersion> {
        if message_type.contains("/present-proof/1.0/") {
            Some(ProtocolVersion::V1)
        } else if message_type.contains("/present-proof/2.0/") {
            Some(ProtocolVersion::V2)
        } else {
            None
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => write!(f, "v1"),
            ProtocolVersion::V2 => write!(f, "v2"),
        }
    }
}

/// Common accessors shared by all protocol messages.
pub trait DidCommMessage {
    /// The message's own id.
    fn id(&self) -> &str;
    /// The `~thread` decorator, if set.
    fn thread(&self) -> Option<&ThreadDecorator>;
    /// The `~service` decorator, if set.
    fn service(&self) -> Option<&ServiceDecorator>;

    /// The thread id this message belongs to.
    fn thread_id(&self) -> &str {
        thread_id(self.thread(), self.id())
    }

    /// The parent thread id, when the exchange was spawned out-of-band.
    fn parent_thread_id(&self) -> Option<&str> {
        self.thread().and_then(|t| t.pthid.as_deref())
    }
}

macro_rules! didcomm_message {
    ($ty:ty) => {
        impl DidCommMessage for $ty {
            fn id(&self) -> &str {
                &self.id
            }
            fn thread(&self) -> Option<&ThreadDecorator> {
                self.thread.as_ref()
            }
            fn service(&self) -> Option<&ServiceDecorator> {
                self.service.as_ref()
            }
        }
    };
}

/// Proposal message: the prover offers a presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposePresentationMessage {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Format descriptors; absent in the legacy variant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formats: Option<Vec<FormatSpec>>,
    #[serde(rename = "proposals~attach")]
    pub proposal_attachments: Vec<Attachment>,
    #[serde(rename = "~thread", skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadDecorator>,
    #[serde(rename = "~service", skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceDecorator>,
    #[serde(rename = "~timing", skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingDecorator>,
}

didcomm_message!(ProposePresentationMessage);

impl ProposePresentationMessage {
    pub fn new(version: ProtocolVersion) -> Self {
        ProposePresentationMessage {
            id: Uuid::new_v4().to_string(),
            message_type: version.message_type("propose-presentation"),
            comment: None,
            formats: None,
            proposal_attachments: Vec::new(),
            thread: None,
            service: None,
            timing: None,
        }
    }

    /// The attachment carrying a supported proposal payload.
    pub fn proposal_attachment(&self, supports: impl Fn(&str) -> bool) -> Option<&Attachment> {
        find_format_attachment(
            &self.proposal_attachments,
            self.formats.as_deref(),
            LEGACY_PROPOSAL_ATTACHMENT_ID,
            supports,
        )
    }
}

/// Request message: the verifier asks for a presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPresentationMessage {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formats: Option<Vec<FormatSpec>>,
    #[serde(rename = "request_presentations~attach")]
    pub request_attachments: Vec<Attachment>,
    #[serde(rename = "~thread", skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadDecorator>,
    #[serde(rename = "~service", skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceDecorator>,
    #[serde(rename = "~timing", skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingDecorator>,
}

didcomm_message!(RequestPresentationMessage);

impl RequestPresentationMessage {
    pub fn new(version: ProtocolVersion) -> Self {
        RequestPresentationMessage {
            id: Uuid::new_v4().to_string(),
            message_type: version.message_type("request-presentation"),
            comment: None,
            formats: None,
            request_attachments: Vec::new(),
            thread: None,
            service: None,
            timing: None,
        }
    }

    /// The attachment carrying a supported request payload.
    pub fn request_attachment(&self, supports: impl Fn(&str) -> bool) -> Option<&Attachment> {
        find_format_attachment(
            &self.request_attachments,
            self.formats.as_deref(),
            LEGACY_REQUEST_ATTACHMENT_ID,
            supports,
        )
    }
}

/// Presentation message: the prover answers a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationMessage {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formats: Option<Vec<FormatSpec>>,
    #[serde(rename = "presentations~attach")]
    pub presentation_attachments: Vec<Attachment>,
    #[serde(rename = "~thread", skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadDecorator>,
    #[serde(rename = "~service", skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceDecorator>,
    #[serde(rename = "~timing", skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingDecorator>,
}

didcomm_message!(PresentationMessage);

impl PresentationMessage {
    pub fn new(version: ProtocolVersion) -> Self {
        PresentationMessage {
            id: Uuid::new_v4().to_string(),
            message_type: version.message_type("presentation"),
            comment: None,
            formats: None,
            presentation_attachments: Vec::new(),
            thread: None,
            service: None,
            timing: None,
        }
    }

    /// The attachment carrying a supported presentation payload.
    pub fn presentation_attachment(&self, supports: impl Fn(&str) -> bool) -> Option<&Attachment> {
        find_format_attachment(
            &self.presentation_attachments,
            self.formats.as_deref(),
            LEGACY_PRESENTATION_ATTACHMENT_ID,
            supports,
        )
    }
}

/// Acknowledgement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAIL")]
    Fail,
    #[serde(rename = "PENDING")]
    Pending,
}

/// Presentation acknowledgement, sent by the verifier after a verified
/// presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationAckMessage {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub message_type: String,
    pub status: AckStatus,
    #[serde(rename = "~thread", skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadDecorator>,
    #[serde(rename = "~service", skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceDecorator>,
    #[serde(rename = "~timing", skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingDecorator>,
}

didcomm_message!(PresentationAckMessage);

impl PresentationAckMessage {
    pub fn new(version: ProtocolVersion, status: AckStatus) -> Self {
        PresentationAckMessage {
            id: Uuid::new_v4().to_string(),
            message_type: version.message_type("ack"),
            status,
            thread: None,
            service: None,
            timing: None,
        }
    }
}

/// Machine-readable reason code carried by a problem report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProblemReportReason {
    /// The exchange was abandoned; currently the only defined code
    #[serde(rename = "abandoned")]
    Abandoned,
}

/// Human- and machine-readable description of a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDescription {
    /// English description of the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub en: Option<String>,
    pub code: ProblemReportReason,
}

/// Problem report, threaded to the failing exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationProblemReportMessage {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub message_type: String,
    pub description: ProblemDescription,
    #[serde(rename = "~thread", skip_serializing_if = "Option::is_none")]
    pub thread: Option<ThreadDecorator>,
    #[serde(rename = "~service", skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceDecorator>,
    #[serde(rename = "~timing", skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingDecorator>,
}

didcomm_message!(PresentationProblemReportMessage);

impl PresentationProblemReportMessage {
    pub fn new(version: ProtocolVersion, description: impl Into<String>) -> Self {
        PresentationProblemReportMessage {
            id: Uuid::new_v4().to_string(),
            message_type: version.message_type("problem-report"),
            description: ProblemDescription {
                en: Some(description.into()),
                code: ProblemReportReason::Abandoned,
            },
            thread: None,
            service: None,
            timing: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_uris_follow_version() {
        assert_eq!(
            ProtocolVersion::V1.message_type("request-presentation"),
            "https://didcomm.org/present-proof/1.0/request-presentation"
        );
        assert_eq!(
            ProtocolVersion::V2.message_type("propose-presentation"),
            "https://didcomm.org/present-proof/2.0/propose-presentation"
        );
    }

    #[test]
    fn test_thread_id_defaults_to_message_id() {
        let message = RequestPresentationMessage::new(ProtocolVersion::V1);
        assert_eq!(message.thread_id(), message.id);

        let mut threaded = message.clone();
        threaded.thread = Some(respond_in_thread("thread-1", None));
        assert_eq!(threaded.thread_id(), "thread-1");
    }

    #[test]
    fn test_version_round_trips_through_type_uri() {
        let message = PresentationMessage::new(ProtocolVersion::V2);
        assert_eq!(
            ProtocolVersion::from_message_type(&message.message_type),
            Some(ProtocolVersion::V2)
        );
    }

    #[test]
    fn test_problem_report_wire_code() {
        let report = PresentationProblemReportMessage::new(ProtocolVersion::V1, "boom");
        let wire = serde_json::to_value(&report).unwrap();
        assert_eq!(wire["description"]["code"], "abandoned");
    }
}
