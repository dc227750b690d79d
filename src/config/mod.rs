//! Configuration: global config file, target storage, and runtime settings.
//!
//! The global config lives at `<user-config>/jshunter/config.yaml` and maps
//! target names to storage directories. Everything else is per-run and comes
//! from CLI flags with the defaults below.

pub mod installation;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils::fs as fsutil;

pub const CONFIG_DIR_NAME: &str = "jshunter";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

pub const DEFAULT_PORT: u16 = 20450;

/// Global on-disk configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub storage_dir: PathBuf,
}

/// Per-pool worker counts and queue capacities.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub extraction_workers: usize,
    pub extraction_queue: usize,
    pub prettify_workers: usize,
    pub prettify_queue: usize,
    pub sourcemap_workers: usize,
    pub sourcemap_queue: usize,
    pub analysis_workers: usize,
    pub analysis_queue: usize,
    pub dechunker_workers: usize,
    pub dechunker_queue: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            extraction_workers: 4,
            extraction_queue: 100,
            prettify_workers: 8,
            prettify_queue: 400,
            sourcemap_workers: 4,
            sourcemap_queue: 400,
            analysis_workers: 6,
            analysis_queue: 400,
            dechunker_workers: 4,
            dechunker_queue: 400,
        }
    }
}

/// Resolved runtime settings for one server run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub target: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub mobile_extraction: bool,
    pub workers: WorkerSettings,
    /// Upper bound on one extraction job, browser time included.
    pub browser_worker_timeout: Duration,
    pub prettifier_binary: PathBuf,
    pub analyzer_binary: PathBuf,
    pub dechunker_binary: PathBuf,
}

impl Settings {
    /// Settings for a target with every knob at its default.
    pub fn for_target(target: &str, storage_dir: PathBuf) -> Self {
        let libs = libs_directory();
        Self {
            target: target.to_string(),
            port: DEFAULT_PORT,
            storage_dir,
            mobile_extraction: false,
            workers: WorkerSettings::default(),
            browser_worker_timeout: Duration::from_secs(90),
            prettifier_binary: libs.join(binary_file_name("prettifier")),
            analyzer_binary: libs.join(binary_file_name("analyzer")),
            dechunker_binary: libs.join(binary_file_name("dechunker")),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join("db")
    }

    pub fn database_file(&self) -> PathBuf {
        self.db_path().join("data.db")
    }

    pub fn files_path(&self) -> PathBuf {
        self.storage_dir.join("files")
    }
}

/// The user-level config directory for this tool.
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME))
        .context("could not determine the user config directory")
}

/// Directory the helper binaries are installed into.
pub fn libs_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_default()
        .join(CONFIG_DIR_NAME)
        .join("libs")
}

/// Platform-specific helper binary file name.
pub fn binary_file_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

/// Load the global config, creating a default file on first run.
pub fn load_global_config() -> Result<GlobalConfig> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating config directory {}", dir.display()))?;
    std::fs::create_dir_all(dir.join("targets"))?;

    let config_file = dir.join(CONFIG_FILE_NAME);
    if !config_file.exists() {
        save_global_config(&GlobalConfig::default())?;
        return Ok(GlobalConfig::default());
    }

    let contents = std::fs::read_to_string(&config_file)
        .with_context(|| format!("reading {}", config_file.display()))?;
    let config: GlobalConfig = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing {}", config_file.display()))?;
    Ok(config)
}

pub fn save_global_config(config: &GlobalConfig) -> Result<()> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir)?;
    let out = serde_yaml::to_string(config)?;
    std::fs::write(dir.join(CONFIG_FILE_NAME), out)?;
    Ok(())
}

fn default_target_storage_dir(target: &str) -> Result<PathBuf> {
    Ok(config_dir()?.join("targets").join(target))
}

/// Resolve and prepare the storage directory for a target, updating the
/// global config. When the target already exists with a different storage
/// dir and a new one is given, the existing `db/` and `files/` trees are
/// moved over.
pub fn setup_target_storage(target: &str, new_storage_dir: Option<&Path>) -> Result<PathBuf> {
    if target.is_empty() {
        bail!("target name cannot be empty");
    }

    let mut config = load_global_config()?;
    let existing = config.targets.get(target).cloned();

    let storage_dir = match new_storage_dir {
        Some(dir) => {
            if let Some(existing) = &existing {
                if !existing.storage_dir.as_os_str().is_empty() && existing.storage_dir != dir {
                    info!(
                        "Moving existing files from {} to {}",
                        existing.storage_dir.display(),
                        dir.display()
                    );
                    fsutil::move_target_files(&existing.storage_dir, dir)
                        .context("moving target files")?;
                }
            }
            dir.to_path_buf()
        }
        None => match existing {
            Some(existing) if !existing.storage_dir.as_os_str().is_empty() => {
                existing.storage_dir
            }
            _ => default_target_storage_dir(target)?,
        },
    };

    std::fs::create_dir_all(storage_dir.join("db")).context("creating db directory")?;
    std::fs::create_dir_all(storage_dir.join("files")).context("creating files directory")?;

    config.targets.insert(
        target.to_string(),
        TargetConfig {
            storage_dir: storage_dir.clone(),
        },
    );
    save_global_config(&config)?;

    Ok(storage_dir)
}
