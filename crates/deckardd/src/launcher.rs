//! Worker process invocation.
//!
//! A worker renders one UI definition on a broadway display bound to the
//! session's port. Its command line is:
//!
//! ```text
//! <program> [args..] --suicidal --with-broadwayd <port> \
//!     <content_root>/<module>/<file> <module> <language> <catalog_root>
//! ```
//!
//! `--suicidal` makes the worker exit when nothing was written to its stdin
//! since its last check, so stdin is always piped.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use deckard_core::{OrchestratorError, OrchestratorResult, RunnerConfig};

/// Bytes written to a worker's stdin as a heartbeat.
pub const LIVENESS_TOKEN: &[u8] = b"Please stay alive!";

/// Everything that varies between two worker launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub port: u16,
    pub module: String,
    pub file: String,
    /// Effective language (`fr_FR.UTF-8`, `POSIX`)
    pub language: String,
    /// Directory holding `<lang>/LC_MESSAGES/<module>.mo`
    pub catalog_root: PathBuf,
}

/// Builds and starts worker processes.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: String,
    args: Vec<String>,
    content_root: PathBuf,
}

impl WorkerLauncher {
    pub fn new(runner: &RunnerConfig, content_root: impl Into<PathBuf>) -> Self {
        Self {
            program: runner.program.clone(),
            args: runner.args.clone(),
            content_root: content_root.into(),
        }
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    /// Catalog root shipped with the content (`<content_root>/LANGS`).
    pub fn default_catalog_root(&self) -> PathBuf {
        self.content_root.join("LANGS")
    }

    /// Resolves the UI-definition path, refusing anything that could leave
    /// the content root.
    pub fn ui_path(&self, module: &str, file: &str) -> OrchestratorResult<PathBuf> {
        check_relative(module)?;
        check_relative(file)?;
        Ok(self.content_root.join(module).join(file))
    }

    /// Builds the worker command without starting it.
    pub fn command(&self, spec: &LaunchSpec) -> OrchestratorResult<Command> {
        let ui_path = self.ui_path(&spec.module, &spec.file)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--suicidal")
            .arg("--with-broadwayd")
            .arg(spec.port.to_string())
            .arg(ui_path)
            .arg(&spec.module)
            .arg(&spec.language)
            .arg(&spec.catalog_root)
            .env("GDK_BACKEND", "broadway")
            .env("UBUNTU_MENUPROXY", "")
            .env("LIBOVERLAY_SCROLLBAR", "0")
            .env("LANG", &spec.language)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        Ok(cmd)
    }

    /// Starts a worker.
    pub fn launch(&self, spec: &LaunchSpec) -> OrchestratorResult<Child> {
        let mut cmd = self.command(spec)?;
        let child = cmd
            .spawn()
            .map_err(|e| OrchestratorError::Launch(format!("{}: {e}", self.program)))?;
        debug!(
            pid = ?child.id(),
            port = spec.port,
            module = %spec.module,
            language = %spec.language,
            "Worker started"
        );
        Ok(child)
    }
}

fn check_relative(part: &str) -> OrchestratorResult<()> {
    let path = Path::new(part);
    let plain = !part.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if plain {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidPath(part.to_string()))
    }
}
