///! Viewer configuration
///!
///! A small JSON file in the per-user config directory
///! (`~/.config/comic_viewer/config.json` on Linux). Loading never fails:
///! anything unusable falls back to defaults with a warning.
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::cache::{CacheOptions, DEFAULT_CAPACITY};
use crate::index::Validation;
use crate::utils::error::{ComicError, Result};

pub const CONFIG_VERSION: &str = "1.0";

/// Environment variable that replaces the index/state cache directory
pub const CACHE_DIR_ENV: &str = "COMICVIEW_CACHE_DIR";

const APP_DIR: &str = "comic_viewer";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub last_browsed_directory: Option<PathBuf>,
    pub last_opened_file: Option<PathBuf>,
    /// Decoded pages kept in memory
    pub cache_capacity: usize,
    /// Pages preloaded in the reading direction
    pub preload_ahead: usize,
    pub preload_workers: usize,
    pub validation: Validation,
    /// Overrides the per-user cache directory
    pub cache_dir: Option<PathBuf>,

    /// File this config was loaded from (and is saved back to)
    #[serde(skip)]
    source: Option<PathBuf>,
    /// Cache directory for this run only (command line), never saved
    #[serde(skip)]
    cache_dir_override: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            last_browsed_directory: None,
            last_opened_file: None,
            cache_capacity: DEFAULT_CAPACITY,
            preload_ahead: 1,
            preload_workers: 1,
            validation: Validation::Fast,
            cache_dir: None,
            source: None,
            cache_dir_override: None,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_DIR)
}

/// `<user config dir>/comic_viewer/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// `<user cache dir>/comic_viewer`
pub fn default_cache_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.cache_dir().to_path_buf())
}

impl Config {
    /// Load from the default location
    pub fn load() -> Self {
        match default_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::warn!("No home directory found, using default configuration");
                Self::default()
            }
        }
    }

    /// Load from `path`; later saves go back to the same file
    pub fn load_from(path: &Path) -> Self {
        let mut config = match Self::read(path) {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(e) => {
                tracing::warn!("Using default configuration: {}", e);
                Self::default()
            }
        };
        config.source = Some(path.to_path_buf());
        config
    }

    fn read(path: &Path) -> Result<Option<Self>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ComicError::Config(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ComicError::Config(format!("corrupted {}: {}", path.display(), e)))?;

        if config.version != CONFIG_VERSION {
            return Err(ComicError::Config(format!(
                "unknown config version '{}'",
                config.version
            )));
        }
        Ok(Some(config))
    }

    /// Write to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::debug!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Best-effort save to the file this config came from
    pub fn save(&self) {
        let Some(path) = self.source.clone().or_else(default_config_path) else {
            return;
        };
        if let Err(e) = self.save_to(&path) {
            tracing::warn!("Could not save config: {}", e);
        }
    }

    pub fn remember_directory(&mut self, directory: &Path) {
        self.last_browsed_directory = Some(absolute(directory));
        self.save();
    }

    pub fn remember_opened_file(&mut self, file: &Path) {
        self.last_opened_file = Some(absolute(file));
        if let Some(parent) = self.last_opened_file.as_deref().and_then(Path::parent) {
            self.last_browsed_directory = Some(parent.to_path_buf());
        }
        self.save();
    }

    /// Index and reading-state directory: override, then environment, then
    /// config, then per-user default
    pub fn cache_dir(&self) -> Option<PathBuf> {
        pick_cache_dir(
            self.cache_dir_override.as_deref(),
            std::env::var_os(CACHE_DIR_ENV),
            self.cache_dir.as_deref(),
        )
    }

    /// Use `dir` for this run regardless of environment and config file
    pub fn override_cache_dir(&mut self, dir: impl Into<PathBuf>) {
        self.cache_dir_override = Some(dir.into());
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            capacity: self.cache_capacity,
            preload_workers: self.preload_workers,
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

fn pick_cache_dir(
    forced: Option<&Path>,
    env: Option<OsString>,
    configured: Option<&Path>,
) -> Option<PathBuf> {
    if let Some(dir) = forced {
        return Some(dir.to_path_buf());
    }
    env.filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| configured.map(Path::to_path_buf))
        .or_else(default_cache_dir)
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
