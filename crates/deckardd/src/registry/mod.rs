//! Session registry using Actor pattern.
//!
//! The registry is the central state manager for every user session. It
//! receives commands via a tokio mpsc channel and is the single owner of
//! sessions, their ports, and their workers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ ConnectionHandler│────▶│  RegistryActor  │────▶│  Session (xN)   │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!         │                       ▲                       │
//!         │   RegistryCommand     │ Sweep                 │ worker Child
//!         │   (mpsc channel)      │ (while armed)         │ catalog TempDirs
//!         ▼                       │                       ▼
//!    SpawnRunner             ┌────┴──────┐          kill / rm -r
//!    IngestCatalog           │ sweep task│
//!    KeepAlive               └───────────┘
//! ```
//!
//! # Sweep
//!
//! One persistent task drives garbage collection. It sleeps until the
//! [`SweepGate`] is armed (first session created), then sends a `Sweep`
//! command every interval until the actor disarms the gate (no sessions
//! left). It only holds a weak sender, so it never keeps the actor alive.
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::debug;

use deckard_core::{DeckardConfig, LocaleSet};

use crate::ingest::TranslationIngestor;
use crate::launcher::WorkerLauncher;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError, RegistryStats, SpawnedRunner, StoredCatalogs};
pub use handle::RegistryHandle;

/// Channel buffer size
const COMMAND_BUFFER: usize = 100;

/// Spawn the registry actor and its sweep task, returning a handle.
///
/// # Errors
///
/// Fails if `config` does not validate or the HTTP client for remote
/// catalogs cannot be built.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use deckard_core::{DeckardConfig, LocaleSet};
/// use deckardd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let config = DeckardConfig::default();
///     let handle = spawn_registry(&config, Arc::new(LocaleSet::permissive())).unwrap();
///
///     let alive = handle.keep_alive("unknown".into()).await;
///     assert_eq!(alive, Ok(false));
/// }
/// ```
pub fn spawn_registry(
    config: &DeckardConfig,
    locales: Arc<LocaleSet>,
) -> Result<RegistryHandle, RegistryError> {
    config.validate()?;

    let ingestor = TranslationIngestor::new(&config.catalogs, config.storage_root(), locales)
        .map_err(|e| RegistryError::HttpClient(e.to_string()))?;
    let launcher = WorkerLauncher::new(&config.runner, &config.content_root);

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let gate = Arc::new(SweepGate::new());

    let actor = RegistryActor::new(
        cmd_rx,
        &config.limits,
        config.catalogs.max_per_session,
        launcher,
        ingestor,
        Arc::clone(&gate),
    );
    tokio::spawn(actor.run());

    spawn_sweep_task(cmd_tx.downgrade(), gate, config.sweep_interval());

    Ok(RegistryHandle::new(cmd_tx))
}

// ============================================================================
// Sweep Gate
// ============================================================================

/// Armed/disarmed switch shared by the actor and the sweep task.
#[derive(Debug, Default)]
pub struct SweepGate {
    armed: AtomicBool,
    closed: AtomicBool,
    notify: Notify,
}

impl SweepGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) {
        if !self.armed.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Releases the sweep task for good.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.armed.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Waits until armed. Returns false if the gate was closed instead.
    pub async fn wait_armed(&self) -> bool {
        loop {
            if self.is_closed() {
                return false;
            }
            if self.is_armed() {
                return true;
            }
            self.notify.notified().await;
        }
    }
}

/// Spawn the task that sends `Sweep` every `period` while the gate is armed.
fn spawn_sweep_task(
    sender: mpsc::WeakSender<RegistryCommand>,
    gate: Arc<SweepGate>,
    period: Duration,
) {
    tokio::spawn(async move {
        while gate.wait_armed().await {
            debug!(period_secs = period.as_secs(), "Sweep task running");
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while gate.is_armed() {
                ticker.tick().await;

                let Some(strong) = sender.upgrade() else {
                    debug!("Sweep task stopping: registry dropped");
                    return;
                };
                if strong.send(RegistryCommand::Sweep).await.is_err() {
                    debug!("Sweep task stopping: registry channel closed");
                    return;
                }
            }
            debug!("Sweep task idle");
        }
        debug!("Sweep task stopping: gate closed");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_wakes_waiter_on_arm() {
        let gate = Arc::new(SweepGate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_armed().await })
        };

        tokio::task::yield_now().await;
        gate.arm();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_gate_close_releases_waiter() {
        let gate = Arc::new(SweepGate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait_armed().await })
        };

        gate.close();
        assert!(!waiter.await.unwrap());
        assert!(!gate.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_sends_while_armed() {
        let (tx, mut rx) = mpsc::channel(8);
        let gate = Arc::new(SweepGate::new());
        spawn_sweep_task(tx.downgrade(), Arc::clone(&gate), Duration::from_secs(5));

        gate.arm();
        let cmd = rx.recv().await;
        assert!(matches!(cmd, Some(RegistryCommand::Sweep)));

        gate.disarm();
        gate.close();
        drop(tx);
    }
}
