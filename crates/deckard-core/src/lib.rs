//! Deckard Core - Shared types for the rendering-worker orchestrator
//!
//! This crate provides the domain types shared between
//! the daemon (deckardd) and the wire protocol.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod catalog;
pub mod config;
pub mod error;
pub mod language;
pub mod token;

// Re-exports for convenience
pub use catalog::{
    group_by_module, is_catalog_name, CatalogCache, CatalogGrouping, Displaced,
    CATALOG_EXTENSION, COMPILED_EXTENSION,
};
pub use config::{CatalogsConfig, ConfigError, DeckardConfig, LimitsConfig, RunnerConfig};
pub use error::{OrchestratorError, OrchestratorResult};
pub use language::{
    detect_language, effective_language, normalize_language_tag, parse_language_header,
    LocaleSet, DEFAULT_LANGUAGE, HEADER_SCAN_LINES, POSIX_LANGUAGE,
};
pub use token::SessionToken;
