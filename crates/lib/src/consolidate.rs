//! Consolidated document: all user trees under one root with summary counts.

use crate::model::{EntityKind, EntityNode};
use crate::sink::JsonSink;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedDocument {
    pub generated_at: DateTime<Utc>,
    pub total_users: usize,
    pub total_phone_numbers: usize,
    pub total_conversations: usize,
    pub total_calls: usize,
    pub total_messages: usize,
    pub total_transcripts: usize,
    pub users: Vec<EntityNode>,
}

impl ConsolidatedDocument {
    pub fn write(&self, sink: &mut dyn JsonSink, path: &Path) -> Result<()> {
        let value = serde_json::to_value(self).context("serializing consolidated document")?;
        sink.write(path, &value)
    }
}

/// Collects user trees in the order they were walked.
#[derive(Debug, Default)]
pub struct Consolidator {
    users: Vec<EntityNode>,
}

impl Consolidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, user: EntityNode) {
        self.users.push(user);
    }

    pub fn extend(&mut self, users: impl IntoIterator<Item = EntityNode>) {
        self.users.extend(users);
    }

    pub fn finalize(self) -> ConsolidatedDocument {
        let total = |kind| self.users.iter().map(|u| u.count(kind)).sum();
        ConsolidatedDocument {
            generated_at: Utc::now(),
            total_users: self.users.len(),
            total_phone_numbers: total(EntityKind::PhoneNumber),
            total_conversations: total(EntityKind::Conversation),
            total_calls: total(EntityKind::Call),
            total_messages: total(EntityKind::Message),
            total_transcripts: total(EntityKind::Transcript),
            users: self.users,
        }
    }
}
