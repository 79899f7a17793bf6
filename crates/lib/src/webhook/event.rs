//! Inbound webhook envelopes. A payload is only parsed after its signature verified.

use crate::webhook::signature::{RejectReason, SignatureVerifier, Verdict};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const NEW_MESSAGE_EVENT: &str = "message.received";

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("{0}")]
    Rejected(RejectReason),
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("malformed {event_type} payload: {reason}")]
    MalformedPayload { event_type: String, reason: String },
}

/// Verified request body with its event type.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub event_type: Option<String>,
    pub payload: Value,
}

/// What a verified envelope asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    NewMessage(NewMessageEvent),
    /// Any event type other than `message.received`.
    Ignored { event_type: Option<String> },
}

/// A `message.received` event: webhook metadata plus the message object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageEvent {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    /// `text`, falling back to `body`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contact_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    id: Option<String>,
    api_version: Option<String>,
    created_at: Option<String>,
    data: Option<RawData>,
}

#[derive(Deserialize)]
struct RawData {
    object: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(default)]
    id: String,
    from: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    to: Vec<String>,
    direction: Option<String>,
    text: Option<String>,
    body: Option<String>,
    status: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    user_id: Option<String>,
    phone_number_id: Option<String>,
    conversation_id: Option<String>,
    #[serde(default, deserialize_with = "strings_or_empty")]
    contact_ids: Vec<String>,
    media: Option<Value>,
}

/// `"+1555"` or `["+1555", ...]`.
fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(d)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// Anything other than a list of strings becomes empty.
fn strings_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    })
}

impl WebhookEnvelope {
    /// Verify `raw_body` against the signature header, then parse it. Rejection happens
    /// before any parsing.
    pub fn open(
        verifier: &SignatureVerifier,
        raw_body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<Self, EventError> {
        if let Verdict::Rejected(reason) = verifier.verify(raw_body, signature_header) {
            return Err(EventError::Rejected(reason));
        }
        let payload: Value = serde_json::from_slice(raw_body).map_err(EventError::InvalidJson)?;
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Self {
            event_type,
            payload,
        })
    }

    pub fn event(&self) -> Result<WebhookEvent, EventError> {
        if self.event_type.as_deref() != Some(NEW_MESSAGE_EVENT) {
            return Ok(WebhookEvent::Ignored {
                event_type: self.event_type.clone(),
            });
        }
        parse_new_message(&self.payload).map(WebhookEvent::NewMessage)
    }
}

fn parse_new_message(payload: &Value) -> Result<NewMessageEvent, EventError> {
    let malformed = |reason: String| EventError::MalformedPayload {
        event_type: NEW_MESSAGE_EVENT.to_string(),
        reason,
    };
    let raw: RawEvent = RawEvent::deserialize(payload).map_err(|e| malformed(e.to_string()))?;
    let object = raw
        .data
        .and_then(|d| d.object)
        .filter(Value::is_object)
        .ok_or_else(|| malformed("data.object is missing or not an object".to_string()))?;
    let msg = RawMessage::deserialize(&object).map_err(|e| malformed(e.to_string()))?;
    if msg.id.trim().is_empty() {
        return Err(malformed("message id is empty".to_string()));
    }
    Ok(NewMessageEvent {
        id: msg.id,
        event_id: raw.id,
        api_version: raw.api_version,
        event_created_at: raw.created_at,
        from: msg.from,
        to: msg.to,
        direction: msg.direction,
        text: msg.text.filter(|t| !t.is_empty()).or(msg.body),
        status: msg.status,
        created_at: msg.created_at,
        updated_at: msg.updated_at,
        user_id: msg.user_id,
        phone_number_id: msg.phone_number_id,
        conversation_id: msg.conversation_id,
        contact_ids: msg.contact_ids,
        media: msg.media,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::signature::sign;
    use serde_json::json;

    const KEY: &[u8] = b"k3y";

    fn open(body: &[u8]) -> Result<WebhookEnvelope, EventError> {
        let ts = chrono::Utc::now().timestamp().to_string();
        let header = sign(KEY, &ts, body);
        WebhookEnvelope::open(&SignatureVerifier::new(KEY, 300), body, Some(&header))
    }

    #[test]
    fn parses_new_message() {
        let body = json!({
            "id": "EV1",
            "type": "message.received",
            "apiVersion": "v3",
            "createdAt": "2024-01-01T00:00:00Z",
            "data": {"object": {
                "id": "MSG1", "from": "+15550001", "to": "+15550002",
                "body": "hello", "direction": "incoming", "contactIds": "oops"
            }}
        })
        .to_string();
        let msg = match open(body.as_bytes()).unwrap().event().unwrap() {
            WebhookEvent::NewMessage(msg) => msg,
            other => panic!("expected new message, got {:?}", other),
        };
        assert_eq!(msg.id, "MSG1");
        assert_eq!(msg.event_id.as_deref(), Some("EV1"));
        assert_eq!(msg.to, vec!["+15550002".to_string()]);
        assert_eq!(msg.text.as_deref(), Some("hello"));
        assert!(msg.contact_ids.is_empty());
    }

    #[test]
    fn other_event_types_are_ignored() {
        let body = json!({"type": "call.completed", "data": {"object": {"id": "AC1"}}}).to_string();
        let event = open(body.as_bytes()).unwrap().event().unwrap();
        assert_eq!(
            event,
            WebhookEvent::Ignored {
                event_type: Some("call.completed".to_string())
            }
        );
    }

    #[test]
    fn message_without_object_is_malformed() {
        let body = json!({"type": "message.received", "data": {}}).to_string();
        let err = open(body.as_bytes()).unwrap().event().unwrap_err();
        assert!(matches!(err, EventError::MalformedPayload { .. }));
    }

    #[test]
    fn invalid_json_after_valid_signature() {
        assert!(matches!(open(b"{not json"), Err(EventError::InvalidJson(_))));
    }

    #[test]
    fn rejected_before_parsing() {
        let err = WebhookEnvelope::open(&SignatureVerifier::new(KEY, 300), b"{not json", None)
            .unwrap_err();
        assert!(matches!(err, EventError::Rejected(RejectReason::MissingHeader)));
    }
}
