//! Registry actor - owns all session state and processes commands.
//!
//! The RegistryActor is the single owner of every session, port assignment
//! and catalog cache in the daemon. It receives commands via an mpsc
//! channel and handles them one at a time: this sequential loop is the
//! exclusive lock every registry mutation (and every sweep tick) goes
//! through. A remote catalog download therefore holds up all sessions
//! until it completes.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Response send failures are ignored (the caller went away)

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use deckard_core::{LimitsConfig, OrchestratorError, OrchestratorResult, SessionToken};

use super::commands::{RegistryCommand, RegistryStats, SpawnedRunner, StoredCatalogs};
use super::SweepGate;
use crate::ingest::{CatalogSource, TranslationIngestor};
use crate::launcher::WorkerLauncher;
use crate::session::Session;

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all session state.
///
/// # Ownership
///
/// - `sessions`: token → Session, never more than `max_users` entries
/// - ports are not tracked separately: a port is in use iff some session
///   holds it, and a free one is found by scanning
///
/// # Session checkout
///
/// An operation on a session moves it out of `sessions`, works on the
/// owned value, then puts it back. Nothing else can observe the table in
/// between since commands are handled sequentially.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    sessions: HashMap<SessionToken, Session>,

    max_users: usize,
    first_port: u16,
    max_catalogs: usize,

    launcher: WorkerLauncher,
    ingestor: TranslationIngestor,

    /// Shared with the sweep task
    sweep: Arc<SweepGate>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        limits: &LimitsConfig,
        max_catalogs: usize,
        launcher: WorkerLauncher,
        ingestor: TranslationIngestor,
        sweep: Arc<SweepGate>,
    ) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            max_users: limits.max_users,
            first_port: limits.first_port,
            max_catalogs,
            launcher,
            ingestor,
            sweep,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until a `Shutdown` arrives or the channel closes
    /// (all handles dropped). Every remaining session is destroyed on exit.
    pub async fn run(mut self) {
        info!(
            max_users = self.max_users,
            first_port = self.first_port,
            storage_root = %self.ingestor.storage_root().display(),
            "Registry actor starting"
        );

        while let Some(cmd) = self.receiver.recv().await {
            if !self.handle_command(cmd).await {
                break;
            }
        }

        self.destroy_all().await;
        self.sweep.close();
        info!("Registry actor stopped");
    }

    /// Dispatches a command. Returns false once the actor should stop.
    pub(crate) async fn handle_command(&mut self, cmd: RegistryCommand) -> bool {
        match cmd {
            RegistryCommand::SpawnRunner {
                token,
                module,
                file,
                language,
                respond_to,
            } => {
                let result = self.handle_spawn_runner(token, &module, &file, &language).await;
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::IngestCatalog {
                token,
                name,
                module,
                source,
                respond_to,
            } => {
                let result = self.handle_ingest_catalog(token, &name, &module, source).await;
                let _ = respond_to.send(result);
            }
            RegistryCommand::KeepAlive { token, respond_to } => {
                let result = self.handle_keep_alive(&token).await;
                let _ = respond_to.send(result);
            }
            RegistryCommand::Sweep => {
                self.handle_sweep().await;
            }
            RegistryCommand::Stats { respond_to } => {
                let _ = respond_to.send(self.handle_stats());
            }
            RegistryCommand::Shutdown { respond_to } => {
                info!(sessions = self.sessions.len(), "Registry shutdown requested");
                self.destroy_all().await;
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    // ========================================================================
    // Session table
    // ========================================================================

    /// Checks out the session for `token`, creating one if the token is
    /// absent or unknown.
    ///
    /// A known session has its removable flag cleared. Creating the first
    /// session (or the first one after the table drained) arms the sweep.
    /// The returned session must be handed back with [`Self::restore`].
    fn resolve_or_create(&mut self, token: Option<SessionToken>) -> OrchestratorResult<Session> {
        if let Some(mut session) = token.and_then(|t| self.sessions.remove(&t)) {
            session.touch();
            return Ok(session);
        }

        if self.sessions.len() >= self.max_users {
            warn!(
                current = self.sessions.len(),
                max = self.max_users,
                "Registry is full, refusing new session"
            );
            return Err(OrchestratorError::CapacityExceeded {
                max: self.max_users,
            });
        }

        if !self.sweep.is_armed() {
            self.arm_sweep();
        }

        let token = loop {
            let candidate = SessionToken::generate();
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        info!(
            token = %token.short(),
            sessions = self.sessions.len() + 1,
            "Session created"
        );
        Ok(Session::new(token, self.max_catalogs))
    }

    fn restore(&mut self, session: Session) {
        self.sessions.insert(session.token().clone(), session);
    }

    /// First port of the pool not held by any session in the table.
    fn find_free_port(&self) -> OrchestratorResult<u16> {
        let used: HashSet<u16> = self
            .sessions
            .values()
            .map(Session::port)
            .filter(|port| *port != 0)
            .collect();

        let first = u32::from(self.first_port);
        let end = first.saturating_add(u32::try_from(self.max_users).unwrap_or(u32::MAX));
        (first..end)
            .filter_map(|port| u16::try_from(port).ok())
            .find(|port| !used.contains(port))
            .ok_or(OrchestratorError::PortExhausted {
                first: self.first_port,
                end,
            })
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    async fn handle_spawn_runner(
        &mut self,
        token: Option<SessionToken>,
        module: &str,
        file: &str,
        language: &str,
    ) -> OrchestratorResult<SpawnedRunner> {
        let mut session = self.resolve_or_create(token)?;
        let result = self.spawn_in(&mut session, module, file, language).await;
        let token = session.token().clone();
        self.restore(session);

        let port = result?;
        Ok(SpawnedRunner { token, port })
    }

    async fn spawn_in(
        &self,
        session: &mut Session,
        module: &str,
        file: &str,
        language: &str,
    ) -> OrchestratorResult<u16> {
        let port = match session.port() {
            0 => self.find_free_port().inspect_err(|e| {
                error!(
                    token = %session.token().short(),
                    sessions = self.sessions.len() + 1,
                    error = %e,
                    "Port pool inconsistent with session count"
                );
            })?,
            port => port,
        };

        session.spawn(&self.launcher, module, file, language, port).await?;
        session.touch();
        Ok(port)
    }

    async fn handle_ingest_catalog(
        &mut self,
        token: Option<SessionToken>,
        name: &str,
        module: &str,
        source: CatalogSource,
    ) -> OrchestratorResult<StoredCatalogs> {
        let known = token.as_ref().is_some_and(|t| self.sessions.contains_key(t));
        let mut session = self.resolve_or_create(token)?;
        if known {
            // Fetching and compiling can outlast the worker's heartbeat window
            session.keep_alive().await;
        }
        let result = session.ingest(&self.ingestor, name, module, source).await;
        session.touch();
        let token = session.token().clone();
        self.restore(session);

        match result {
            Ok(catalogs) => Ok(StoredCatalogs { token, catalogs }),
            Err(e) => {
                debug!(token = %token.short(), catalog = %name, error = %e, "Catalog ingestion failed");
                Err(e)
            }
        }
    }

    async fn handle_keep_alive(&mut self, token: &SessionToken) -> bool {
        let Some(session) = self.sessions.get_mut(token) else {
            debug!(token = %token.short(), "Keep-alive for unknown session");
            return false;
        };
        session.touch();
        let pinged = session.keep_alive().await;
        debug!(token = %token.short(), pinged, "Keep-alive");
        true
    }

    /// One sweep tick.
    ///
    /// A session flagged on a previous tick (no activity since) that is
    /// still removable is destroyed; every other session gets flagged for
    /// the next tick. The sweep disarms once the table is empty.
    async fn handle_sweep(&mut self) {
        if !self.sweep.is_armed() {
            return;
        }

        let mut doomed = Vec::new();
        for (token, session) in self.sessions.iter_mut() {
            if session.removable_flag() && session.is_removable() {
                doomed.push(token.clone());
            } else {
                session.mark_removable();
            }
        }

        for token in doomed {
            if let Some(mut session) = self.sessions.remove(&token) {
                session.destroy().await;
                info!(
                    token = %token.short(),
                    port = session.port(),
                    created = %session.created_at(),
                    idle_since = %session.last_activity(),
                    "Session reaped"
                );
            }
        }

        if self.sessions.is_empty() {
            self.sweep.disarm();
            debug!("No sessions left, sweep disarmed");
        }
    }

    /// Arms the sweep. The gate only disarms on an empty table, so there is
    /// never an existing session to flag here.
    fn arm_sweep(&mut self) {
        self.sweep.arm();
        debug!("Sweep armed");
    }

    fn handle_stats(&mut self) -> RegistryStats {
        let mut ports_in_use: Vec<u16> = self
            .sessions
            .values()
            .map(Session::port)
            .filter(|port| *port != 0)
            .collect();
        ports_in_use.sort_unstable();

        let running_workers = self
            .sessions
            .values_mut()
            .map(Session::is_running)
            .filter(|running| *running)
            .count();

        RegistryStats {
            sessions: self.sessions.len(),
            max_users: self.max_users,
            ports_in_use,
            running_workers,
            sweep_armed: self.sweep.is_armed(),
        }
    }

    async fn destroy_all(&mut self) {
        for (token, mut session) in self.sessions.drain() {
            session.destroy().await;
            debug!(token = %token.short(), "Session destroyed");
        }
        self.sweep.disarm();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use deckard_core::{CatalogsConfig, LocaleSet, RunnerConfig};
    use tokio::sync::oneshot;

    use crate::launcher::LIVENESS_TOKEN;

    struct Fixture {
        actor: RegistryActor,
        storage: tempfile::TempDir,
        _tx: mpsc::Sender<RegistryCommand>,
    }

    fn fixture(max_users: usize, max_catalogs: usize) -> Fixture {
        let storage = tempfile::tempdir().unwrap();
        let runner = RunnerConfig {
            program: "sh".to_string(),
            args: vec!["-c".into(), "cat >/dev/null".into(), "worker".into()],
        };
        let catalogs = CatalogsConfig {
            max_per_session: max_catalogs,
            compiler: "sh".to_string(),
            compiler_args: vec!["-c".into(), "cp \"$4\" \"$3\"".into(), "fakefmt".into()],
            ..CatalogsConfig::default()
        };
        let ingestor =
            TranslationIngestor::new(&catalogs, storage.path(), Arc::new(LocaleSet::permissive()))
                .unwrap();
        let limits = LimitsConfig {
            max_users,
            first_port: 2019,
        };

        let (tx, rx) = mpsc::channel(8);
        let actor = RegistryActor::new(
            rx,
            &limits,
            max_catalogs,
            WorkerLauncher::new(&runner, "/srv/content"),
            ingestor,
            Arc::new(SweepGate::new()),
        );
        Fixture {
            actor,
            storage,
            _tx: tx,
        }
    }

    fn upload() -> CatalogSource {
        CatalogSource::Upload(b"\"Language: fr\\n\"\n".to_vec())
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_port_reused_and_capacity_enforced() {
        let mut f = fixture(1, 4);

        let first = f.actor.handle_spawn_runner(None, "demo", "a.ui", "POSIX").await.unwrap();
        assert_eq!(first.port, 2019);

        let again = f
            .actor
            .handle_spawn_runner(Some(first.token.clone()), "demo", "a.ui", "POSIX")
            .await
            .unwrap();
        assert_eq!(again, first);

        let err = f
            .actor
            .handle_spawn_runner(None, "demo", "a.ui", "POSIX")
            .await
            .unwrap_err();
        assert_eq!(err, OrchestratorError::CapacityExceeded { max: 1 });
        assert_eq!(f.actor.sessions.len(), 1);

        f.actor.destroy_all().await;
    }

    #[tokio::test]
    async fn test_unknown_token_gets_a_fresh_session() {
        let mut f = fixture(2, 4);
        let bogus = SessionToken::new("not-issued");

        let spawned = f
            .actor
            .handle_spawn_runner(Some(bogus.clone()), "demo", "a.ui", "POSIX")
            .await
            .unwrap();
        assert_ne!(spawned.token, bogus);
        assert!(f.actor.sessions.contains_key(&spawned.token));

        f.actor.destroy_all().await;
    }

    #[tokio::test]
    async fn test_distinct_ports_until_pool_exhausted() {
        let mut f = fixture(2, 4);

        let a = f.actor.handle_spawn_runner(None, "demo", "a.ui", "POSIX").await.unwrap();
        let b = f.actor.handle_spawn_runner(None, "demo", "a.ui", "POSIX").await.unwrap();
        assert_eq!((a.port, b.port), (2019, 2020));

        let err = f.actor.find_free_port().unwrap_err();
        assert!(err.is_internal());
        assert!(matches!(err, OrchestratorError::PortExhausted { first: 2019, end: 2021 }));

        f.actor.destroy_all().await;
    }

    #[tokio::test]
    async fn test_failed_spawn_keeps_session_without_port() {
        let mut f = fixture(2, 4);

        let err = f
            .actor
            .handle_spawn_runner(None, "..", "a.ui", "POSIX")
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidPath(_)));

        let stats = f.actor.handle_stats();
        assert_eq!(stats.sessions, 1);
        assert!(stats.ports_in_use.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_evicts_oldest() {
        let mut f = fixture(2, 2);

        let a = f.actor.handle_ingest_catalog(None, "a.po", "m", upload()).await.unwrap();
        let token = Some(a.token.clone());
        assert_eq!(entries(f.storage.path()), 1);

        f.actor.handle_ingest_catalog(token.clone(), "b.po", "m", upload()).await.unwrap();
        let c = f.actor.handle_ingest_catalog(token, "c.po", "m", upload()).await.unwrap();

        assert_eq!(c.token, a.token);
        assert_eq!(
            c.catalogs.get("m"),
            Some(&vec!["b.po".to_string(), "c.po".to_string()])
        );
        assert_eq!(entries(f.storage.path()), 2);

        f.actor.destroy_all().await;
        assert_eq!(entries(f.storage.path()), 0);
    }

    #[tokio::test]
    async fn test_ingest_non_catalog_allocates_nothing() {
        let mut f = fixture(2, 2);

        let err = f
            .actor
            .handle_ingest_catalog(None, "notes.txt", "m", upload())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotACatalogFile { .. }));
        assert_eq!(entries(f.storage.path()), 0);
    }

    #[tokio::test]
    async fn test_keep_alive_unknown_token() {
        let mut f = fixture(2, 2);

        assert!(!f.actor.handle_keep_alive(&SessionToken::new("nope")).await);
        assert!(f.actor.sessions.is_empty());
        assert!(!f.actor.sweep.is_armed());
    }

    #[tokio::test]
    async fn test_sweep_needs_two_idle_ticks() {
        let mut f = fixture(2, 2);

        // Session left empty by a failed ingestion
        let _ = f.actor.handle_ingest_catalog(None, "x.txt", "m", upload()).await;
        assert!(f.actor.sweep.is_armed());
        assert_eq!(f.actor.sessions.len(), 1);

        f.actor.handle_sweep().await;
        assert_eq!(f.actor.sessions.len(), 1, "reaped on the first tick");

        f.actor.handle_sweep().await;
        assert!(f.actor.sessions.is_empty());
        assert!(!f.actor.sweep.is_armed());

        // Next creation re-arms, and the new session starts unflagged
        let _ = f.actor.handle_ingest_catalog(None, "x.txt", "m", upload()).await;
        assert!(f.actor.sweep.is_armed());
        assert!(f.actor.sessions.values().all(|s| !s.removable_flag()));

        f.actor.handle_sweep().await;
        assert_eq!(f.actor.sessions.len(), 1, "reaped on the first tick after re-arming");
    }

    #[tokio::test]
    async fn test_ingest_pings_existing_worker() {
        let mut f = fixture(2, 2);
        let heartbeats = f.storage.path().join("heartbeats");
        let runner = RunnerConfig {
            program: "sh".to_string(),
            args: vec!["-c".into(), "cat > \"$0\"".into(), heartbeats.display().to_string()],
        };
        f.actor.launcher = WorkerLauncher::new(&runner, "/srv/content");

        let spawned = f.actor.handle_spawn_runner(None, "demo", "a.ui", "POSIX").await.unwrap();
        f.actor
            .handle_ingest_catalog(Some(spawned.token.clone()), "a.po", "m", upload())
            .await
            .unwrap();

        let mut received = Vec::new();
        for _ in 0..50 {
            received = std::fs::read(&heartbeats).unwrap_or_default();
            if !received.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(received, LIVENESS_TOKEN);

        f.actor.destroy_all().await;
    }

    #[tokio::test]
    async fn test_activity_postpones_reaping() {
        let mut f = fixture(2, 2);

        let spawned = f.actor.handle_spawn_runner(None, "demo", "a.ui", "POSIX").await.unwrap();

        f.actor.handle_sweep().await;
        assert!(f.actor.handle_keep_alive(&spawned.token).await);
        f.actor.handle_sweep().await;
        assert_eq!(f.actor.sessions.len(), 1);

        f.actor.handle_sweep().await;
        assert!(f.actor.sessions.is_empty());
        assert!(!f.actor.sweep.is_armed());
    }

    #[tokio::test]
    async fn test_sweep_reap_removes_catalog_storage() {
        let mut f = fixture(2, 2);

        f.actor.handle_ingest_catalog(None, "a.po", "m", upload()).await.unwrap();
        assert_eq!(entries(f.storage.path()), 1);

        f.actor.handle_sweep().await;
        f.actor.handle_sweep().await;
        assert!(f.actor.sessions.is_empty());
        assert_eq!(entries(f.storage.path()), 0);
    }

    #[tokio::test]
    async fn test_stats_and_shutdown_commands() {
        let mut f = fixture(3, 2);
        f.actor.handle_spawn_runner(None, "demo", "a.ui", "POSIX").await.unwrap();
        f.actor.handle_ingest_catalog(None, "a.po", "m", upload()).await.unwrap();

        let (tx, rx) = oneshot::channel();
        assert!(f.actor.handle_command(RegistryCommand::Stats { respond_to: tx }).await);
        let stats = rx.await.unwrap();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.max_users, 3);
        assert_eq!(stats.ports_in_use, vec![2019]);
        assert_eq!(stats.running_workers, 1);
        assert!(stats.sweep_armed);

        let (tx, rx) = oneshot::channel();
        assert!(!f.actor.handle_command(RegistryCommand::Shutdown { respond_to: tx }).await);
        rx.await.unwrap();
        assert!(f.actor.sessions.is_empty());
        assert_eq!(entries(f.storage.path()), 0);
        assert!(!f.actor.sweep.is_armed());
    }
}
