//! Entity tree: users own phone numbers, which own conversations and calls, which own
//! messages and transcripts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind tag of an entity node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    User,
    PhoneNumber,
    Conversation,
    Call,
    Message,
    Transcript,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::PhoneNumber => "phoneNumber",
            EntityKind::Conversation => "conversation",
            EntityKind::Call => "call",
            EntityKind::Message => "message",
            EntityKind::Transcript => "transcript",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of the exported tree: identifier, kind, the raw API fields, and owned children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    pub kind: EntityKind,
    pub id: String,
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<EntityNode>,
}

impl EntityNode {
    pub fn new(kind: EntityKind, id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            kind,
            id: id.into(),
            fields,
            children: Vec::new(),
        }
    }

    /// Append a child unless a sibling with the same id is already present. Returns whether it was added.
    pub fn push_child(&mut self, child: EntityNode) -> bool {
        if self.children.iter().any(|c| c.id == child.id) {
            return false;
        }
        self.children.push(child);
        true
    }

    /// Append each child, skipping duplicates. Returns how many were added.
    pub fn extend_children(&mut self, children: impl IntoIterator<Item = EntityNode>) -> usize {
        children
            .into_iter()
            .map(|c| self.push_child(c))
            .filter(|added| *added)
            .count()
    }

    /// Number of nodes of `kind` in this subtree, including this node.
    pub fn count(&self, kind: EntityKind) -> usize {
        let own = usize::from(self.kind == kind);
        own + self.children.iter().map(|c| c.count(kind)).sum::<usize>()
    }

    /// Depth-first search for a node by kind and id.
    pub fn find(&self, kind: EntityKind, id: &str) -> Option<&EntityNode> {
        if self.kind == kind && self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(kind, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: EntityKind, id: &str) -> EntityNode {
        EntityNode::new(kind, id, Map::new())
    }

    #[test]
    fn push_child_rejects_duplicate_id() {
        let mut pn = node(EntityKind::PhoneNumber, "PN1");
        assert!(pn.push_child(node(EntityKind::Call, "AC1")));
        assert!(!pn.push_child(node(EntityKind::Call, "AC1")));
        assert_eq!(pn.children.len(), 1);
    }

    #[test]
    fn count_and_find_walk_the_subtree() {
        let mut conv = node(EntityKind::Conversation, "CN1");
        conv.extend_children(vec![
            node(EntityKind::Message, "M1"),
            node(EntityKind::Message, "M2"),
        ]);
        let mut pn = node(EntityKind::PhoneNumber, "PN1");
        pn.push_child(conv);
        let mut user = node(EntityKind::User, "US1");
        user.push_child(pn);

        assert_eq!(user.count(EntityKind::Message), 2);
        assert_eq!(user.count(EntityKind::User), 1);
        assert!(user.find(EntityKind::Message, "M2").is_some());
        assert!(user.find(EntityKind::Call, "M2").is_none());
    }

    #[test]
    fn serializes_kind_camel_case_and_omits_empty_children() {
        let n = node(EntityKind::PhoneNumber, "PN1");
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["kind"], "phoneNumber");
        assert!(v.get("children").is_none());
    }
}
