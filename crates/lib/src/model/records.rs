//! Per-kind API records, validated at the boundary where raw JSON becomes an `EntityNode`.
//!
//! Only the fields the walk needs are typed; everything the API returned is kept in the
//! node's raw field map.

use crate::model::{EntityKind, EntityNode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("{kind} item is not a JSON object")]
    NotAnObject { kind: EntityKind },
    #[error("{kind} item is invalid: {reason}")]
    Invalid { kind: EntityKind, reason: String },
    #[error("{kind} item has an empty id")]
    MissingId { kind: EntityKind },
}

/// A record type that can be parsed from one item of a listing response.
pub trait ApiRecord: DeserializeOwned {
    const KIND: EntityKind;
    fn id(&self) -> &str;
}

/// A typed record together with its tree node (raw fields, no children yet).
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub record: T,
    pub node: EntityNode,
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

fn into_object(kind: EntityKind, raw: Value) -> Result<Map<String, Value>, RecordError> {
    match raw {
        Value::Object(map) => Ok(map),
        _ => Err(RecordError::NotAnObject { kind }),
    }
}

/// Validate `raw` as a `T` and build its node.
pub fn parse_record<T: ApiRecord>(raw: Value) -> Result<Parsed<T>, RecordError> {
    let fields = into_object(T::KIND, raw)?;
    let record: T = serde_json::from_value(Value::Object(fields.clone())).map_err(|e| {
        RecordError::Invalid {
            kind: T::KIND,
            reason: e.to_string(),
        }
    })?;
    if record.id().trim().is_empty() {
        return Err(RecordError::MissingId { kind: T::KIND });
    }
    let node = EntityNode::new(T::KIND, record.id().to_string(), fields);
    Ok(Parsed { record, node })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            self.id.clone()
        } else {
            name
        }
    }
}

impl ApiRecord for User {
    const KIND: EntityKind = EntityKind::User;
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneNumber {
    pub id: String,
    pub number: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user_ids: Vec<String>,
    pub user_id: Option<String>,
}

impl PhoneNumber {
    /// Owning user: first of `userIds`, else `userId`.
    pub fn owner(&self) -> Option<&str> {
        self.user_ids
            .first()
            .map(String::as_str)
            .or(self.user_id.as_deref())
    }
}

impl ApiRecord for PhoneNumber {
    const KIND: EntityKind = EntityKind::PhoneNumber;
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub phone_number_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub participants: Vec<String>,
}

impl ApiRecord for Conversation {
    const KIND: EntityKind = EntityKind::Conversation;
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub id: String,
    pub phone_number_id: Option<String>,
    pub status: Option<String>,
}

impl ApiRecord for Call {
    const KIND: EntityKind = EntityKind::Call;
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: Option<String>,
}

impl ApiRecord for Message {
    const KIND: EntityKind = EntityKind::Message;
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub call_id: Option<String>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dialogue: Vec<Value>,
}

/// Parse a transcript response body. The body is the transcript itself or wraps it in
/// `data` (object or one-element list). Empty bodies mean the call has no transcript.
pub fn parse_transcript(call_id: &str, body: Value) -> Result<Option<EntityNode>, RecordError> {
    let kind = EntityKind::Transcript;
    let inner = match body {
        Value::Null => return Ok(None),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => match items.into_iter().next() {
                Some(first) => first,
                None => return Ok(None),
            },
            Some(Value::Null) => return Ok(None),
            Some(data) => data,
            None if map.is_empty() => return Ok(None),
            None => Value::Object(map),
        },
        _ => return Err(RecordError::NotAnObject { kind }),
    };
    let fields = into_object(kind, inner)?;
    if fields.is_empty() {
        return Ok(None);
    }
    let transcript: Transcript =
        serde_json::from_value(Value::Object(fields.clone())).map_err(|e| RecordError::Invalid {
            kind,
            reason: e.to_string(),
        })?;
    let id = transcript
        .call_id
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| call_id.to_string());
    Ok(Some(EntityNode::new(kind, id, fields)))
}
