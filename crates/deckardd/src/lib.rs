//! Deckard Daemon - Session registry and worker orchestration
//!
//! This crate provides the core infrastructure for the Deckard daemon:
//! - `registry` - Session registry actor owning every session, port and sweep
//! - `session` - One user's worker process and custom catalog cache
//! - `ingest` - Translation catalog ingestion (upload or remote fetch)
//! - `compiler` - External catalog compiler invocation
//! - `launcher` - Worker process command line and environment
//! - `content` - Index of displayable UI definitions
//! - `locale` - Host locale probe
//! - `server` - Unix socket server for front-end connections
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      deckardd daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │  DaemonServer   │────▶│     RegistryActor           │    │
//! │  │ (Unix Socket)   │     │  (sessions, ports, sweep)   │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │                             │                   │
//! │           │ connections                 │ owns              │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │ConnectionHandler│     │  Session                    │    │
//! │  │  (per client)   │     │  worker Child + catalogs    │    │
//! │  └─────────────────┘     └─────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod compiler;
pub mod content;
pub mod ingest;
pub mod launcher;
pub mod locale;
pub mod registry;
pub mod server;
pub mod session;
