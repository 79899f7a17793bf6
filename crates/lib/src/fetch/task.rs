//! Fetch tasks: one reissuable API call (endpoint kind, path parameters, pagination cursor).

use serde::{Deserialize, Serialize};

/// Endpoint kind of a fetch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchKind {
    Users,
    PhoneNumbers,
    Conversations,
    Calls,
    Messages,
    Transcript,
}

impl FetchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchKind::Users => "users",
            FetchKind::PhoneNumbers => "phoneNumbers",
            FetchKind::Conversations => "conversations",
            FetchKind::Calls => "calls",
            FetchKind::Messages => "messages",
            FetchKind::Transcript => "transcript",
        }
    }

    /// Operator-facing note on how a failed task of this kind is reissued.
    pub fn retry_hint(self) -> &'static str {
        match self {
            FetchKind::Users => "Resume the user listing from cursor (GET users?pageToken=)",
            FetchKind::PhoneNumbers => "Refetch phone numbers for userId (GET phone-numbers?userId=)",
            FetchKind::Conversations => {
                "Refetch conversations for phoneNumberId from cursor (GET conversations)"
            }
            FetchKind::Calls => {
                "Refetch calls for phoneNumberId and participant from cursor (GET calls)"
            }
            FetchKind::Messages => {
                "Refetch messages for the conversation's participants from cursor (GET messages)"
            }
            FetchKind::Transcript => "Refetch the transcript for callId (GET call-transcripts/{callId})",
        }
    }
}

impl std::fmt::Display for FetchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifiers needed to reissue a call. Only the ones relevant to the kind are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number_id: Option<String>,
    /// E.164 number of the phone number, kept for the operator's benefit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("{kind} task is missing {param}")]
    MissingParam { kind: FetchKind, param: &'static str },
}

/// One pending API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchTask {
    pub kind: FetchKind,
    #[serde(default)]
    pub params: FetchParams,
    /// Page token to resume from; None starts at the first page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Reissue only the page at `cursor`, without following later pages or walking
    /// the items' children (set for pages that held malformed items).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub single_page: bool,
}

impl FetchTask {
    fn new(kind: FetchKind, params: FetchParams) -> Self {
        Self {
            kind,
            params,
            cursor: None,
            single_page: false,
        }
    }

    pub fn users() -> Self {
        Self::new(FetchKind::Users, FetchParams::default())
    }

    pub fn phone_numbers(user_id: &str) -> Self {
        Self::new(
            FetchKind::PhoneNumbers,
            FetchParams {
                user_id: Some(user_id.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn conversations(phone_number_id: &str, phone_number: Option<&str>) -> Self {
        Self::new(
            FetchKind::Conversations,
            FetchParams {
                phone_number_id: Some(phone_number_id.to_string()),
                phone_number: phone_number.map(str::to_string),
                ..Default::default()
            },
        )
    }

    pub fn calls(phone_number_id: &str, participant: &str) -> Self {
        Self::new(
            FetchKind::Calls,
            FetchParams {
                phone_number_id: Some(phone_number_id.to_string()),
                participants: vec![participant.to_string()],
                ..Default::default()
            },
        )
    }

    pub fn messages(phone_number_id: &str, conversation_id: &str, participants: &[String]) -> Self {
        Self::new(
            FetchKind::Messages,
            FetchParams {
                phone_number_id: Some(phone_number_id.to_string()),
                conversation_id: Some(conversation_id.to_string()),
                participants: participants.to_vec(),
                ..Default::default()
            },
        )
    }

    pub fn transcript(call_id: &str) -> Self {
        Self::new(
            FetchKind::Transcript,
            FetchParams {
                call_id: Some(call_id.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn as_single_page(mut self) -> Self {
        self.single_page = true;
        self
    }

    /// Check that the parameters this kind needs are present (tasks read back from a ledger file).
    pub fn validate(&self) -> Result<(), TaskError> {
        let p = &self.params;
        let missing = |param: &'static str| -> Result<(), TaskError> {
            Err(TaskError::MissingParam {
                kind: self.kind,
                param,
            })
        };
        match self.kind {
            FetchKind::Users => Ok(()),
            FetchKind::PhoneNumbers if p.user_id.is_none() => missing("userId"),
            FetchKind::Conversations | FetchKind::Calls | FetchKind::Messages
                if p.phone_number_id.is_none() =>
            {
                missing("phoneNumberId")
            }
            FetchKind::Calls | FetchKind::Messages if p.participants.is_empty() => {
                missing("participants")
            }
            FetchKind::Transcript if p.call_id.is_none() => missing("callId"),
            _ => Ok(()),
        }
    }

    /// Request path relative to the API base URL.
    pub fn path(&self) -> String {
        match self.kind {
            FetchKind::Users => "users".to_string(),
            FetchKind::PhoneNumbers => "phone-numbers".to_string(),
            FetchKind::Conversations => "conversations".to_string(),
            FetchKind::Calls => "calls".to_string(),
            FetchKind::Messages => "messages".to_string(),
            FetchKind::Transcript => format!(
                "call-transcripts/{}",
                self.params.call_id.as_deref().unwrap_or_default()
            ),
        }
    }

    /// Fixed query parameters (the paginator adds the page token).
    pub fn query(&self) -> Vec<(String, String)> {
        let p = &self.params;
        let mut q = Vec::new();
        match self.kind {
            FetchKind::Users | FetchKind::Transcript => {}
            FetchKind::PhoneNumbers => {
                if let Some(ref id) = p.user_id {
                    q.push(("userId".to_string(), id.clone()));
                }
            }
            FetchKind::Conversations | FetchKind::Calls | FetchKind::Messages => {
                if let Some(ref id) = p.phone_number_id {
                    q.push(("phoneNumberId".to_string(), id.clone()));
                }
                if self.kind != FetchKind::Conversations {
                    for participant in &p.participants {
                        q.push(("participants".to_string(), participant.clone()));
                    }
                }
            }
        }
        q
    }

    /// Short label for logs, e.g. `messages(phoneNumberId=PN1, conversationId=CN1)`.
    pub fn describe(&self) -> String {
        let p = &self.params;
        let mut parts = Vec::new();
        if let Some(ref v) = p.user_id {
            parts.push(format!("userId={}", v));
        }
        if let Some(ref v) = p.phone_number_id {
            parts.push(format!("phoneNumberId={}", v));
        }
        if let Some(ref v) = p.conversation_id {
            parts.push(format!("conversationId={}", v));
        }
        if let Some(ref v) = p.call_id {
            parts.push(format!("callId={}", v));
        }
        if let Some(ref c) = self.cursor {
            parts.push(format!("cursor={}", c));
        }
        if self.single_page {
            parts.push("single page".to_string());
        }
        format!("{}({})", self.kind, parts.join(", "))
    }
}
