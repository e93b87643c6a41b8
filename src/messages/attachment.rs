// src/messages/attachment.rs
//! Message attachments: format-specific payloads carried alongside
//! protocol messages, referenced by id.

use crate::error::ProofError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of an attachment: base64-encoded JSON or inline JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

/// A format-specific payload carried alongside a protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "mime-type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub data: AttachmentData,
}

impl Attachment {
    /// Wraps a serializable value as a base64 JSON attachment under the
    /// given id.
    ///
    /// # Errors
    /// Returns `ProofError::Json` if the value cannot be serialized.
    pub fn from_data<T: Serialize>(id: impl Into<String>, data: &T) -> Result<Self, ProofError> {
        let bytes = serde_json::to_vec(data)?;
        Ok(Attachment {
            id: id.into(),
            mime_type: Some("application/json".to_string()),
            data: AttachmentData {
                base64: Some(base64::encode(bytes)),
                json: None,
            },
        })
    }

    /// Wraps a serializable value as an inline-JSON attachment with a
    /// generated id. Used for transient attachments that never hit the
    /// wire (e.g. previews rebuilt for comparison).
    pub fn from_json<T: Serialize>(data: &T) -> Result<Self, ProofError> {
        Ok(Attachment {
            id: Uuid::new_v4().to_string(),
            mime_type: Some("application/json".to_string()),
            data: AttachmentData {
                base64: None,
                json: Some(serde_json::to_value(data)?),
            },
        })
    }

    /// Decodes the attachment payload into `T`, accepting either
    /// representation.
    ///
    /// # Errors
    /// `ProofError::Format` when the payload is absent, not valid
    /// base64, or does not deserialize into `T`.
    pub fn as_data<T: DeserializeOwned>(&self) -> Result<T, ProofError> {
        if let Some(json) = &self.data.json {
            return serde_json::from_value(json.clone())
                .map_err(|e| ProofError::Format(format!("invalid attachment `{}`: {}", self.id, e)));
        }

        if let Some(encoded) = &self.data.base64 {
            let bytes = base64::decode(encoded).map_err(|e| {
                ProofError::Format(format!("attachment `{}` is not valid base64: {}", self.id, e))
            })?;
            return serde_json::from_slice(&bytes)
                .map_err(|e| ProofError::Format(format!("invalid attachment `{}`: {}", self.id, e)));
        }

        Err(ProofError::Format(format!(
            "attachment `{}` carries no data",
            self.id
        )))
    }
}

/// Pairs a format identifier with the attachment id carrying its
/// payload. Only present on multi-format protocol versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    #[serde(rename = "attach_id")]
    pub attachment_id: String,
    pub format: String,
}

/// Resolves the attachment carrying a supported format payload.
///
/// With a format-descriptor list present, the attachment is addressed by
/// the first descriptor whose format identifier is supported. The legacy
/// single-format variant has no descriptor list and uses a fixed
/// attachment id per message type.
pub fn find_format_attachment<'a>(
    attachments: &'a [Attachment],
    formats: Option<&[FormatSpec]>,
    legacy_id: &str,
    supports: impl Fn(&str) -> bool,
) -> Option<&'a Attachment> {
    match formats {
        Some(specs) => specs
            .iter()
            .find(|spec| supports(&spec.format))
            .and_then(|spec| attachments.iter().find(|a| a.id == spec.attachment_id)),
        None => attachments.iter().find(|a| a.id == legacy_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base64_attachment_round_trip() {
        let payload = json!({ "name": "Proof Request", "nonce": "123" });
        let attachment = Attachment::from_data("attach-0", &payload).unwrap();
        assert!(attachment.data.base64.is_some());

        let decoded: serde_json::Value = attachment.as_data().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_missing_data_is_a_format_error() {
        let attachment = Attachment {
            id: "empty".to_string(),
            mime_type: None,
            data: AttachmentData::default(),
        };
        assert!(matches!(
            attachment.as_data::<serde_json::Value>(),
            Err(crate::error::ProofError::Format(_))
        ));
    }

    #[test]
    fn test_format_descriptor_addressing() {
        let attachments = vec![
            Attachment::from_data("a-1", &json!({"v": 1})).unwrap(),
            Attachment::from_data("a-2", &json!({"v": 2})).unwrap(),
        ];
        let formats = vec![
            FormatSpec {
                attachment_id: "a-1".to_string(),
                format: "unsupported/format@v0".to_string(),
            },
            FormatSpec {
                attachment_id: "a-2".to_string(),
                format: "hlindy/proof-req@v2.0".to_string(),
            },
        ];

        let found = find_format_attachment(&attachments, Some(formats.as_slice()), "ignored", |f| {
            f.starts_with("hlindy/")
        })
        .unwrap();
        assert_eq!(found.id, "a-2");
    }

    #[test]
    fn test_legacy_fixed_id_addressing() {
        let attachments = vec![Attachment::from_data("libindy-request-presentation-0", &json!({})).unwrap()];
        let found =
            find_format_attachment(&attachments, None, "libindy-request-presentation-0", |_| true);
        assert!(found.is_some());
    }
}
