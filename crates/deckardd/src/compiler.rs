//! Catalog compiler invocation.
//!
//! The compiler is called as `<program> [args..] --check --output-file <out> <src>`.
//! Its stdout and stderr form the diagnostic shown to the user, with the
//! local source path stripped so temporary directory names do not leak.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use deckard_core::{CatalogsConfig, OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone)]
pub struct CatalogCompiler {
    program: String,
    args: Vec<String>,
}

impl CatalogCompiler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &CatalogsConfig) -> Self {
        Self::new(config.compiler.clone(), config.compiler_args.clone())
    }

    /// Compiles `source` into `output`, creating the output's parent
    /// directories first.
    pub async fn compile(&self, source: &Path, output: &Path) -> OrchestratorResult<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(OrchestratorError::storage)?;
        }

        let result = Command::new(&self.program)
            .args(&self.args)
            .arg("--check")
            .arg("--output-file")
            .arg(output)
            .arg(source)
            .stdin(Stdio::null())
            .output()
            .await;

        let out = match result {
            Ok(out) => out,
            Err(e) => {
                warn!(program = %self.program, error = %e, "Failed to run catalog compiler");
                return Err(OrchestratorError::CompileFailure {
                    log: format!("unable to run {}: {e}", self.program),
                });
            }
        };

        if out.status.success() {
            debug!(output = %output.display(), "Catalog compiled");
            return Ok(());
        }

        let mut log = String::from_utf8_lossy(&out.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&out.stderr));
        Err(OrchestratorError::CompileFailure {
            log: redact_path(&log, source),
        })
    }
}

/// Removes every `<path>:` prefix the compiler put in its diagnostic.
pub fn redact_path(log: &str, path: &Path) -> String {
    let needle = format!("{}:", path.display());
    log.replace(&needle, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `sh -c <script> fakefmt --check --output-file OUT SRC` puts OUT in
    /// `$3` and SRC in `$4`.
    fn shell_compiler(script: &str) -> CatalogCompiler {
        CatalogCompiler::new("sh", vec!["-c".into(), script.into(), "fakefmt".into()])
    }

    #[test]
    fn test_redact_path() {
        let path = Path::new("/tmp/deckard_x1/file.po");
        let log = "/tmp/deckard_x1/file.po:12: missing `msgstr' section\n\
                   msgfmt: found 1 fatal error\n";
        assert_eq!(
            redact_path(log, path),
            "12: missing `msgstr' section\nmsgfmt: found 1 fatal error"
        );
    }

    #[tokio::test]
    async fn test_compile_failure_carries_redacted_log() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("file.po");
        std::fs::write(&source, "garbage").unwrap();

        let compiler = shell_compiler("echo \"$4:3: syntax error\" >&2; exit 1");
        let err = compiler
            .compile(&source, &dir.path().join("out/LC_MESSAGES/m.mo"))
            .await
            .unwrap_err();

        match err {
            OrchestratorError::CompileFailure { log } => assert_eq!(log, "3: syntax error"),
            other => panic!("Expected CompileFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_compile_success_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("file.po");
        std::fs::write(&source, "msgid \"\"\nmsgstr \"\"\n").unwrap();

        let output = dir.path().join("LANGS/fr_FR/LC_MESSAGES/m.mo");
        shell_compiler("cp \"$4\" \"$3\"")
            .compile(&source, &output)
            .await
            .unwrap();
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_missing_compiler() {
        let dir = tempfile::tempdir().unwrap();
        let err = CatalogCompiler::new("/nonexistent/msgfmt", Vec::new())
            .compile(&dir.path().join("file.po"), &dir.path().join("m.mo"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::CompileFailure { .. }));
    }
}
