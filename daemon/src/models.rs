//! Model catalog, local cache scan and downloads.
//!
//! The remote catalog lists the Whisper GGML variants we know how to fetch;
//! the local cache is a flat directory of `ggml-<variant>.bin` files. The
//! two are merged for display without duplicates. Cache-scan failures are
//! never fatal; they degrade to an empty local list.

use crate::error::EngineError;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// A variant the remote catalog knows about.
struct CatalogEntry {
    variant: &'static str,
    size_bytes: u64,
    /// Not offered for interactive use (too large for most hosts).
    disabled: bool,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry { variant: "tiny", size_bytes: 77_691_713, disabled: false },
    CatalogEntry { variant: "tiny.en", size_bytes: 77_704_715, disabled: false },
    CatalogEntry { variant: "base", size_bytes: 147_951_465, disabled: false },
    CatalogEntry { variant: "base.en", size_bytes: 147_964_211, disabled: false },
    CatalogEntry { variant: "small", size_bytes: 487_601_967, disabled: false },
    CatalogEntry { variant: "small.en", size_bytes: 487_614_201, disabled: false },
    CatalogEntry { variant: "medium", size_bytes: 1_533_774_781, disabled: false },
    CatalogEntry { variant: "medium.en", size_bytes: 1_533_774_781, disabled: false },
    CatalogEntry { variant: "large-v3", size_bytes: 3_094_623_691, disabled: true },
    CatalogEntry { variant: "large-v3-turbo", size_bytes: 1_624_592_891, disabled: false },
];

fn catalog_entry(variant: &str) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|e| e.variant == variant)
}

/// One row of the merged model list shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    pub name: String,
    /// Present in the local cache.
    pub local: bool,
    /// Known remotely but not offered on this host.
    pub disabled: bool,
}

/// Derive the user-facing variant name from a cache filename.
///
/// `ggml-base.en.bin` becomes `base.en`. Files that don't look like model
/// weights yield `None` and are skipped by the scan.
pub fn format_model_file(filename: &str) -> Option<String> {
    let stem = filename.strip_suffix(".bin")?;
    let variant = stem.strip_prefix("ggml-")?;
    if variant.is_empty() {
        return None;
    }
    Some(variant.to_string())
}

/// Manages the model cache directory and downloads.
pub struct ModelManager {
    models_dir: PathBuf,
    repo: String,
}

impl ModelManager {
    /// Create a ModelManager over the default cache directory.
    ///
    /// Default: `~/.local/share/murmur/models/`
    pub fn new(repo: impl Into<String>) -> anyhow::Result<Self> {
        let models_dir = murmur_common::dirs::models_dir()?;
        Ok(Self {
            models_dir,
            repo: repo.into(),
        })
    }

    /// Create a ModelManager with a custom cache directory.
    pub fn with_dir(models_dir: impl Into<PathBuf>, repo: impl Into<String>) -> Self {
        Self {
            models_dir: models_dir.into(),
            repo: repo.into(),
        }
    }

    /// Get the cache directory path.
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Path a variant's weights live at once downloaded.
    pub fn model_path(&self, variant: &str) -> PathBuf {
        self.models_dir.join(format!("ggml-{variant}.bin"))
    }

    /// Download URL for a variant. `repo` is either a Hugging Face
    /// repository name or a full mirror base URL.
    fn model_url(&self, variant: &str) -> String {
        let filename = format!("ggml-{variant}.bin");
        if self.repo.starts_with("http://") || self.repo.starts_with("https://") {
            format!("{}/{filename}", self.repo.trim_end_matches('/'))
        } else {
            format!(
                "https://huggingface.co/{}/resolve/main/{filename}",
                self.repo
            )
        }
    }

    /// List variants present in the local cache.
    ///
    /// A missing or unreadable cache directory is logged and reported as
    /// empty, never an error.
    pub fn scan_local(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.models_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(
                    dir = %self.models_dir.display(),
                    error = %e,
                    "Model cache not readable, treating as empty"
                );
                return Vec::new();
            }
        };

        let mut variants: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|name| format_model_file(&name))
            .collect();
        variants.sort();
        variants
    }

    /// Merge the remote catalog with the local cache, without duplicates.
    ///
    /// Local files that the catalog doesn't know (e.g. hand-copied weights)
    /// are still offered.
    pub fn available_models(&self) -> Vec<ModelEntry> {
        let local = self.scan_local();
        let mut merged: Vec<ModelEntry> = CATALOG
            .iter()
            .map(|e| ModelEntry {
                name: e.variant.to_string(),
                local: local.iter().any(|l| l == e.variant),
                disabled: e.disabled,
            })
            .collect();

        for variant in local {
            if !merged.iter().any(|m| m.name == variant) {
                merged.push(ModelEntry {
                    name: variant,
                    local: true,
                    disabled: false,
                });
            }
        }

        merged
    }

    /// Ensure a variant is available locally, downloading if necessary.
    ///
    /// `on_progress` receives the download fraction on every received chunk.
    /// With `force` set, any local copy is discarded and fetched again.
    pub async fn ensure_model(
        &self,
        variant: &str,
        force: bool,
        on_progress: impl Fn(f64) + Send + Sync,
    ) -> Result<PathBuf, EngineError> {
        let model_path = self.model_path(variant);
        let expected_size = catalog_entry(variant).map(|e| e.size_bytes);

        if model_path.exists() && !force {
            // Validate size if known
            if let Some(expected) = expected_size {
                let metadata = fs::metadata(&model_path)
                    .await
                    .map_err(|e| EngineError::file_access(&model_path, e))?;
                if metadata.len() != expected {
                    warn!(
                        variant = variant,
                        expected = expected,
                        actual = metadata.len(),
                        "Model size mismatch, re-downloading"
                    );
                } else {
                    debug!(path = %model_path.display(), "Model already cached");
                    return Ok(model_path);
                }
            } else {
                debug!(path = %model_path.display(), "Model already cached");
                return Ok(model_path);
            }
        }

        self.download(variant, &model_path, expected_size, on_progress)
            .await?;
        Ok(model_path)
    }

    /// Download a variant, reporting the fraction received on every chunk.
    async fn download(
        &self,
        variant: &str,
        dest: &Path,
        expected_size: Option<u64>,
        on_progress: impl Fn(f64) + Send + Sync,
    ) -> Result<(), EngineError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::file_access(parent, e))?;
        }

        let url = self.model_url(variant);
        info!(url = %url, dest = %dest.display(), "Downloading model");

        let response = reqwest::get(&url)
            .await
            .map_err(|e| EngineError::Download(format!("request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Download(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        let total = response.content_length().or(expected_size);

        // Stream to a temporary file first, then rename (atomic)
        let temp_path = dest.with_extension("part");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| EngineError::file_access(&temp_path, e))?;

        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| EngineError::Download(format!("read from {url} failed: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| EngineError::file_access(&temp_path, e))?;
            received += chunk.len() as u64;
            if let Some(total) = total.filter(|t| *t > 0) {
                on_progress((received as f64 / total as f64).min(1.0));
            }
        }
        file.sync_all()
            .await
            .map_err(|e| EngineError::file_access(&temp_path, e))?;
        drop(file);

        if let Some(expected) = expected_size
            && received != expected
        {
            let _ = fs::remove_file(&temp_path).await;
            return Err(EngineError::Download(format!(
                "size mismatch for {variant}: expected {expected}, got {received}"
            )));
        }

        fs::rename(&temp_path, dest)
            .await
            .map_err(|e| EngineError::file_access(dest, e))?;

        info!(path = %dest.display(), size = received, "Model downloaded");
        Ok(())
    }

    /// Remove a variant from the local cache.
    pub fn delete_model(&self, variant: &str) -> Result<(), EngineError> {
        let path = self.model_path(variant);
        std::fs::remove_file(&path).map_err(|e| EngineError::file_access(&path, e))?;
        info!(variant = variant, "Deleted local model");
        Ok(())
    }
}

#[cfg(test)]
#[path = "models_test.rs"]
mod tests;
