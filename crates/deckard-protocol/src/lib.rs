//! Deckard Protocol - Wire protocol for the control socket
//!
//! This crate provides the message types exchanged between front-ends
//! (the HTTP layer mapping user requests) and the orchestrator daemon.
//! Messages are line-delimited JSON, each client message carrying the
//! protocol version it speaks.

pub mod message;
pub mod version;

pub use message::{
    decode_upload, ClientMessage, ContentListing, DaemonMessage, DecodeError, MessageType,
    ModuleContent, StatsReport,
};
pub use version::{ProtocolVersion, VersionError};
