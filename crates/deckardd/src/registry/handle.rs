//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending
//! commands to the registry actor.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `OrchestratorError::ChannelClosed`

use tokio::sync::{mpsc, oneshot};

use deckard_core::{OrchestratorError, OrchestratorResult, SessionToken};

use super::commands::{RegistryCommand, RegistryStats, SpawnedRunner, StoredCatalogs};
use crate::ingest::CatalogSource;

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks. The
/// actor stops once every handle is dropped.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// let spawned = handle.spawn_runner(None, "demo", "a.ui", "POSIX").await?;
/// handle.keep_alive(spawned.token).await?;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Start (or restart) a session's worker.
    ///
    /// # Errors
    ///
    /// - `CapacityExceeded` if a new session is needed and the table is full
    /// - `LanguageMismatch`, `InvalidPath`, `Launch` from the session
    /// - `ChannelClosed` if the actor has shut down
    pub async fn spawn_runner(
        &self,
        token: Option<SessionToken>,
        module: impl Into<String>,
        file: impl Into<String>,
        language: impl Into<String>,
    ) -> OrchestratorResult<SpawnedRunner> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::SpawnRunner {
            token,
            module: module.into(),
            file: file.into(),
            language: language.into(),
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| OrchestratorError::ChannelClosed)?
    }

    /// Ingest a catalog into a session's cache.
    ///
    /// # Errors
    ///
    /// - `CapacityExceeded` if a new session is needed and the table is full
    /// - any ingestion error
    /// - `ChannelClosed` if the actor has shut down
    pub async fn ingest_catalog(
        &self,
        token: Option<SessionToken>,
        name: impl Into<String>,
        module: impl Into<String>,
        source: CatalogSource,
    ) -> OrchestratorResult<StoredCatalogs> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::IngestCatalog {
            token,
            name: name.into(),
            module: module.into(),
            source,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| OrchestratorError::ChannelClosed)?
    }

    /// Heartbeat. `Ok(false)` means the token is unknown.
    pub async fn keep_alive(&self, token: SessionToken) -> OrchestratorResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::KeepAlive {
            token,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| OrchestratorError::ChannelClosed)
    }

    pub async fn stats(&self) -> OrchestratorResult<RegistryStats> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryCommand::Stats { respond_to: tx }).await?;
        rx.await.map_err(|_| OrchestratorError::ChannelClosed)
    }

    /// Destroys every session and stops the actor.
    ///
    /// Resolves once the sessions are gone. Calling it on a stopped
    /// registry is a no-op.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(RegistryCommand::Shutdown { respond_to: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Returns true once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn send(&self, cmd: RegistryCommand) -> OrchestratorResult<()> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| OrchestratorError::ChannelClosed)
    }
}
