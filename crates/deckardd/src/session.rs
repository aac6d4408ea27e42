//! Per-user session: one worker slot, one port, one bounded catalog cache.
//!
//! A `Session` is owned by the registry actor and only ever touched from
//! its task, so none of these methods need internal locking. Liveness is
//! always queried with `try_wait`, never by waiting on the child.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use deckard_core::{
    effective_language, group_by_module, CatalogCache, CatalogGrouping, Displaced,
    OrchestratorError, OrchestratorResult, SessionToken,
};

use crate::ingest::{CatalogSource, StoredCatalog, TranslationIngestor};
use crate::launcher::{LaunchSpec, WorkerLauncher, LIVENESS_TOKEN};

/// Bound on one heartbeat write; a worker that stopped reading must not
/// stall the registry.
const HEARTBEAT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Session {
    token: SessionToken,
    /// 0 until the first successful spawn
    port: u16,
    worker: Option<Child>,
    catalogs: CatalogCache<StoredCatalog>,
    /// Set by the sweep, cleared by any activity
    removable: bool,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(token: SessionToken, max_catalogs: usize) -> Self {
        let now = Utc::now();
        Self {
            token,
            port: 0,
            worker: None,
            catalogs: CatalogCache::new(max_catalogs),
            removable: false,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn removable_flag(&self) -> bool {
        self.removable
    }

    pub fn mark_removable(&mut self) {
        self.removable = true;
    }

    /// Records activity: clears the removable flag.
    pub fn touch(&mut self) {
        self.removable = false;
        self.last_activity = Utc::now();
    }

    pub fn catalog_count(&self) -> usize {
        self.catalogs.len()
    }

    /// Module → cached catalog names, oldest first.
    pub fn grouping(&self) -> CatalogGrouping {
        group_by_module(
            self.catalogs
                .iter()
                .map(|(name, entry)| (name, entry.module.as_str())),
        )
    }

    /// Returns true while the worker process has not exited.
    ///
    /// An exited worker is reaped and its slot cleared.
    pub fn is_running(&mut self) -> bool {
        let Some(worker) = self.worker.as_mut() else {
            return false;
        };
        match worker.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(token = %self.token.short(), %status, "Worker exited");
                self.worker = None;
                false
            }
            Err(e) => {
                warn!(token = %self.token.short(), error = %e, "Failed to query worker status");
                false
            }
        }
    }

    /// True if the sweep flagged this session, or if it holds neither a
    /// running worker nor any catalog.
    pub fn is_removable(&mut self) -> bool {
        self.removable || (!self.is_running() && self.catalogs.is_empty())
    }

    /// Starts the worker on `port`, replacing any running one.
    ///
    /// `language` naming a cached catalog selects that catalog (which must
    /// belong to `module`); anything else is a plain language tag served
    /// from `launcher`'s shipped catalogs.
    pub async fn spawn(
        &mut self,
        launcher: &WorkerLauncher,
        module: &str,
        file: &str,
        language: &str,
        port: u16,
    ) -> OrchestratorResult<()> {
        let (effective, catalog_root) = match self.catalogs.get(language) {
            Some(entry) if entry.module != module => {
                return Err(OrchestratorError::LanguageMismatch {
                    language: language.to_string(),
                    module: module.to_string(),
                });
            }
            Some(entry) => (format!("{}.UTF-8", entry.language), entry.catalog_root()),
            None => (effective_language(language), launcher.default_catalog_root()),
        };

        launcher.ui_path(module, file)?;
        let spec = LaunchSpec {
            port,
            module: module.to_string(),
            file: file.to_string(),
            language: effective,
            catalog_root,
        };

        self.stop_worker().await;

        let child = launcher.launch(&spec)?;
        info!(
            token = %self.token.short(),
            pid = ?child.id(),
            port,
            module = %module,
            language = %spec.language,
            "Runner spawned"
        );
        self.worker = Some(child);
        self.port = port;
        Ok(())
    }

    /// Ingests a catalog and caches it at the newest position.
    ///
    /// Replacing a cached name or evicting the oldest entry deletes the
    /// displaced catalog's storage.
    pub async fn ingest(
        &mut self,
        ingestor: &TranslationIngestor,
        name: &str,
        module: &str,
        source: CatalogSource,
    ) -> OrchestratorResult<CatalogGrouping> {
        let stored = ingestor.ingest(name, module, source).await?;

        match self.catalogs.insert(name, stored) {
            Some(Displaced::Replaced(old)) => {
                debug!(token = %self.token.short(), catalog = %name, "Replaced cached catalog");
                old.close();
            }
            Some(Displaced::Evicted { name: evicted, value }) => {
                debug!(token = %self.token.short(), catalog = %evicted, "Evicted oldest catalog");
                value.close();
            }
            None => {}
        }

        Ok(self.grouping())
    }

    /// Writes the liveness token to the worker. Returns whether a worker
    /// was there to ping.
    pub async fn keep_alive(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(stdin) = self.worker.as_mut().and_then(|w| w.stdin.as_mut()) else {
            return false;
        };

        let write = async {
            stdin.write_all(LIVENESS_TOKEN).await?;
            stdin.flush().await
        };
        match timeout(HEARTBEAT_WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(token = %self.token.short(), error = %e, "Heartbeat write failed"),
            Err(_) => debug!(token = %self.token.short(), "Heartbeat write timed out"),
        }
        true
    }

    /// Kills the worker and deletes every cached catalog. Safe to call
    /// more than once.
    pub async fn destroy(&mut self) {
        self.stop_worker().await;
        for (_, catalog) in self.catalogs.drain() {
            catalog.close();
        }
    }

    async fn stop_worker(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        if let Err(e) = worker.kill().await {
            // Already exited and reaped
            debug!(token = %self.token.short(), error = %e, "Worker kill failed");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.short())
            .field("port", &self.port)
            .field("worker", &self.worker.as_ref().and_then(Child::id))
            .field("catalogs", &self.catalogs.names())
            .field("removable", &self.removable)
            .finish()
    }
}
