//! Exported data model: the generic entity tree and the typed records it is built from.

mod entity;
mod records;

pub use entity::{EntityKind, EntityNode};
pub use records::{
    parse_record, parse_transcript, ApiRecord, Call, Conversation, Message, Parsed, PhoneNumber,
    RecordError, Transcript, User,
};
