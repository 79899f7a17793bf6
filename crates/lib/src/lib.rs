//! opsync core library: resumable export of an OpenPhone account and the webhook
//! receiver, shared by the CLI.

pub mod api;
pub mod config;
pub mod consolidate;
pub mod export;
pub mod fetch;
pub mod ledger;
pub mod model;
pub mod sink;
pub mod webhook;
