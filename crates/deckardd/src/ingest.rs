//! Translation catalog ingestion.
//!
//! A catalog is either uploaded by the user or fetched from the first
//! configured URL template that serves it. Each ingested catalog gets its
//! own temporary storage directory:
//!
//! ```text
//! <storage_root>/deckard_XXXXXX/
//!   file.po                                   source as received
//!   LANGS/<lang>/LC_MESSAGES/<module>.mo      compiled catalog
//! ```
//!
//! The directory is owned by the returned [`StoredCatalog`] and removed
//! when it is dropped or closed, so a failed ingestion never leaves
//! anything behind.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use deckard_core::{
    detect_language, is_catalog_name, CatalogsConfig, LocaleSet, OrchestratorError,
    OrchestratorResult, COMPILED_EXTENSION,
};

use crate::compiler::CatalogCompiler;
use crate::content::LANGS_DIR;

/// Prefix of every catalog storage directory.
pub const STORAGE_PREFIX: &str = "deckard_";

/// Name of the stored catalog source.
const SOURCE_FILE: &str = "file.po";

/// Upper bound on one remote fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where catalog bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogSource {
    /// Bytes supplied by the user
    Upload(Vec<u8>),
    /// Fetch through the configured URL templates
    Remote,
}

/// A compiled catalog and the storage directory that holds it.
#[derive(Debug)]
pub struct StoredCatalog {
    /// Module the catalog translates
    pub module: String,
    /// Detected language (`ll_TT`)
    pub language: String,
    storage: TempDir,
}

impl StoredCatalog {
    pub fn storage_path(&self) -> &Path {
        self.storage.path()
    }

    /// Root to hand to a worker (`<storage>/LANGS`).
    pub fn catalog_root(&self) -> PathBuf {
        self.storage.path().join(LANGS_DIR)
    }

    /// Deletes the storage directory, logging instead of failing.
    pub fn close(self) {
        let path = self.storage.path().to_path_buf();
        if let Err(e) = self.storage.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove catalog storage");
        }
    }
}

/// Validates, stores and compiles catalogs.
#[derive(Debug, Clone)]
pub struct TranslationIngestor {
    storage_root: PathBuf,
    urls: Vec<String>,
    max_download_size: u64,
    default_language: String,
    compiler: CatalogCompiler,
    locales: Arc<LocaleSet>,
    client: reqwest::Client,
}

impl TranslationIngestor {
    /// Builds an ingestor storing catalogs under `storage_root`.
    pub fn new(
        config: &CatalogsConfig,
        storage_root: impl Into<PathBuf>,
        locales: Arc<LocaleSet>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self {
            storage_root: storage_root.into(),
            urls: config.urls.clone(),
            max_download_size: config.max_download_size,
            default_language: config.default_language.clone(),
            compiler: CatalogCompiler::from_config(config),
            locales,
            client,
        })
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Ingests the catalog `name` for `module`.
    ///
    /// # Errors
    ///
    /// - `NotACatalogFile` before any storage is created
    /// - `InvalidPath` if `module` is not a plain directory name
    /// - `DownloadFailure` / `FileTooLarge` for remote sources
    /// - `CompileFailure` if the compiler rejects the catalog
    /// - `Storage` on filesystem faults
    pub async fn ingest(
        &self,
        name: &str,
        module: &str,
        source: CatalogSource,
    ) -> OrchestratorResult<StoredCatalog> {
        if !is_catalog_name(name) {
            return Err(OrchestratorError::NotACatalogFile {
                name: name.to_string(),
            });
        }
        check_module_name(module)?;

        let storage = tempfile::Builder::new()
            .prefix(STORAGE_PREFIX)
            .tempdir_in(&self.storage_root)
            .map_err(OrchestratorError::storage)?;
        let source_path = storage.path().join(SOURCE_FILE);

        match source {
            CatalogSource::Upload(bytes) => {
                tokio::fs::write(&source_path, bytes)
                    .await
                    .map_err(OrchestratorError::storage)?;
            }
            CatalogSource::Remote => self.fetch(name, &source_path).await?,
        }

        let contents = tokio::fs::read(&source_path)
            .await
            .map_err(OrchestratorError::storage)?;
        let language = detect_language(Cursor::new(contents), &self.locales, &self.default_language)
            .map_err(OrchestratorError::storage)?;

        let output = storage
            .path()
            .join(LANGS_DIR)
            .join(&language)
            .join("LC_MESSAGES")
            .join(format!("{module}.{COMPILED_EXTENSION}"));
        self.compiler.compile(&source_path, &output).await?;

        info!(catalog = %name, module = %module, language = %language, "Catalog ingested");
        Ok(StoredCatalog {
            module: module.to_string(),
            language,
            storage,
        })
    }

    /// Tries every URL template in order until one serves `name`.
    async fn fetch(&self, name: &str, dest: &Path) -> OrchestratorResult<()> {
        let mut last_reason = String::from("no remote catalog source is configured");

        for template in &self.urls {
            let url = template.replace("%s", name);
            match self.fetch_one(name, &url, dest).await {
                Ok(()) => {
                    debug!(catalog = %name, url = %url, "Catalog downloaded");
                    return Ok(());
                }
                Err(FetchError::Fatal(e)) => return Err(e),
                Err(FetchError::Retry(reason)) => {
                    debug!(catalog = %name, url = %url, reason = %reason, "Catalog source failed");
                    last_reason = reason;
                }
            }
        }

        Err(OrchestratorError::DownloadFailure {
            name: name.to_string(),
            reason: last_reason,
        })
    }

    async fn fetch_one(&self, name: &str, url: &str, dest: &Path) -> Result<(), FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| FetchError::Retry(e.to_string()))?;

        let max = self.max_download_size;
        if let Some(size) = response.content_length() {
            if size > max {
                return Err(FetchError::Fatal(too_large(name, size, max)));
            }
        }

        let mut file = File::create(dest)
            .await
            .map_err(|e| FetchError::Fatal(OrchestratorError::storage(e)))?;
        let mut received: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Retry(e.to_string()))?
        {
            received += chunk.len() as u64;
            if received > max {
                return Err(FetchError::Fatal(too_large(name, received, max)));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::Fatal(OrchestratorError::storage(e)))?;
        }
        file.flush()
            .await
            .map_err(|e| FetchError::Fatal(OrchestratorError::storage(e)))?;
        Ok(())
    }
}

/// Outcome of one URL template.
enum FetchError {
    /// This source failed; try the next one
    Retry(String),
    /// Abort the whole ingestion
    Fatal(OrchestratorError),
}

fn too_large(name: &str, size: u64, max: u64) -> OrchestratorError {
    OrchestratorError::FileTooLarge {
        name: name.to_string(),
        size,
        max,
    }
}

fn check_module_name(module: &str) -> OrchestratorResult<()> {
    let plain = !module.is_empty()
        && module != "."
        && module != ".."
        && !module.contains(['/', '\\', '\0']);
    if plain {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidPath(module.to_string()))
    }
}
