//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable consulted when resolving the root folder
pub const ROOT_ENV_VAR: &str = "OCRQ_ROOT";

/// Config file name looked up inside the root folder
pub const CONFIG_FILE_NAME: &str = "ocrq.toml";

/// Service configuration loaded from `<root>/ocrq.toml`.
///
/// Every field has a default so a missing or empty file yields a
/// fully usable configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Number of worker tasks draining the queue
    pub worker_count: usize,
    /// Maximum delivery attempts per task before it is dropped
    pub max_task_attempts: u32,
    /// Delay before a transiently failed task is re-enqueued (ms)
    pub retry_delay_ms: u64,
    /// Bounded timeout for mirror store calls (ms)
    pub mirror_timeout_ms: u64,
    /// Recognition engine languages (engine-specific codes)
    pub engine_languages: Vec<String>,
    /// Lifetime of generated read-access URLs (seconds)
    pub url_ttl_seconds: u64,
    /// Secret used to sign read-access URLs
    pub url_signing_secret: String,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_task_attempts: 5,
            retry_delay_ms: 500,
            mirror_timeout_ms: 2_000,
            engine_languages: vec!["eng".to_string()],
            url_ttl_seconds: 3_600,
            url_signing_secret: "ocrq-dev-secret".to_string(),
        }
    }
}

impl TomlConfig {
    /// Load configuration from the root folder, falling back to
    /// defaults when the file does not exist.
    pub fn load(root_folder: &Path) -> Result<Self> {
        let path = root_folder.join(CONFIG_FILE_NAME);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. `OCRQ_ROOT` environment variable
/// 3. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: OS-dependent compiled default
    get_default_root_folder()
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("ocrq"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/ocrq"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("ocrq"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/ocrq"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("ocrq"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\ocrq"))
    } else {
        PathBuf::from("./ocrq_data")
    }
}

/// Ensure the root folder and its substructure exist
pub fn ensure_root_folder(root: &Path) -> Result<()> {
    std::fs::create_dir_all(root)?;
    std::fs::create_dir_all(objects_path(root))?;
    Ok(())
}

/// Path of the authoritative SQLite database inside the root folder
pub fn database_path(root: &Path) -> PathBuf {
    root.join("ocrq.db")
}

/// Path of the on-disk object store inside the root folder
pub fn objects_path(root: &Path) -> PathBuf {
    root.join("objects")
}
