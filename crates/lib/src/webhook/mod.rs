//! Inbound webhooks: signature verification, event parsing, the receiver, and registration.

mod event;
mod receiver;
mod registration;
mod signature;

pub use event::{EventError, NewMessageEvent, WebhookEnvelope, WebhookEvent, NEW_MESSAGE_EVENT};
pub use receiver::{
    router, run_receiver, spawn_workers, LoggingHandler, MessageHandler, ReceiverState,
};
pub use registration::{
    build_webhook_url, create_message_received_webhook, ensure_message_received_webhook,
    find_message_received_webhook, list_webhooks, parse_resource_ids, Registration,
    WebhookRequest,
};
pub use signature::{
    sign, RejectReason, SecretError, SignatureVerifier, Verdict, SIGNATURE_HEADER,
};
