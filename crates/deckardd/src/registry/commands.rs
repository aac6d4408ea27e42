//! Registry actor commands, results, and setup errors.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `SpawnedRunner` / `StoredCatalogs` / `RegistryStats`: command results
//! - `RegistryError`: Errors raised while starting the registry
//!
//! Operation failures are reported as `OrchestratorError`, shared with the
//! wire protocol.

use deckard_core::{CatalogGrouping, ConfigError, OrchestratorResult, SessionToken};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::ingest::CatalogSource;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each request carries a oneshot channel for its response. The actor
/// handles one command at a time, which is what serializes every registry
/// mutation.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Start (or restart) the worker of a session.
    ///
    /// An absent or unknown token provisions a new session.
    ///
    /// # Errors
    /// - `CapacityExceeded` if a new session is needed and the table is full
    /// - `LanguageMismatch`, `InvalidPath`, `Launch` from the session
    SpawnRunner {
        token: Option<SessionToken>,
        module: String,
        file: String,
        language: String,
        respond_to: oneshot::Sender<OrchestratorResult<SpawnedRunner>>,
    },

    /// Ingest a catalog into a session's cache.
    ///
    /// # Errors
    /// - `CapacityExceeded` if a new session is needed and the table is full
    /// - any ingestion error (`NotACatalogFile`, `DownloadFailure`, ...)
    IngestCatalog {
        token: Option<SessionToken>,
        name: String,
        module: String,
        source: CatalogSource,
        respond_to: oneshot::Sender<OrchestratorResult<StoredCatalogs>>,
    },

    /// Heartbeat. Responds false if the token is unknown.
    KeepAlive {
        token: SessionToken,
        respond_to: oneshot::Sender<bool>,
    },

    /// One garbage-collection pass.
    ///
    /// Fire-and-forget, sent by the sweep task while armed.
    Sweep,

    /// Snapshot of registry occupancy.
    Stats {
        respond_to: oneshot::Sender<RegistryStats>,
    },

    /// Destroy every session and stop the actor.
    Shutdown { respond_to: oneshot::Sender<()> },
}

// ============================================================================
// Results
// ============================================================================

/// A started worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedRunner {
    pub token: SessionToken,
    pub port: u16,
}

/// Cached catalogs after an ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCatalogs {
    pub token: SessionToken,
    /// Module → catalog names, oldest first
    pub catalogs: CatalogGrouping,
}

/// Registry occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub sessions: usize,
    pub max_users: usize,
    /// Ascending
    pub ports_in_use: Vec<u16>,
    pub running_workers: usize,
    pub sweep_armed: bool,
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that prevent the registry from starting.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}
