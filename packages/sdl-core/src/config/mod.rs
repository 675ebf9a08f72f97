//! Configuration
//!
//! Loaded from the path in `SDL_CONFIG` (or an explicit path); YAML, which
//! also accepts JSON documents. `SDL_DB_PATH` overrides the configured
//! database location. Invalid configuration is fatal (`ConfigInvalid`).

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::shared::models::{CoreError, Result};

pub const ENV_CONFIG: &str = "SDL_CONFIG";
pub const ENV_DB_PATH: &str = "SDL_DB_PATH";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SdlConfig {
    pub db_path: Option<PathBuf>,
    pub repos: Vec<RepoConfig>,
    pub indexing: IndexingConfig,
    pub cache: CacheConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub repo_id: String,
    pub root_path: PathBuf,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    pub max_file_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub enable_file_watching: bool,
    pub debounce_ms: u64,
    /// 0 means auto (`min(cpu, 8)`)
    pub max_workers: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            enable_file_watching: false,
            debounce_ms: 500,
            max_workers: 0,
        }
    }
}

impl IndexingConfig {
    /// Bounded extraction parallelism: configured cap or `min(cpu, 8)`.
    pub fn effective_workers(&self) -> usize {
        let auto = num_cpus::get().min(8).max(1);
        if self.max_workers == 0 {
            auto
        } else {
            self.max_workers.min(auto)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_size_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            max_size_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub max_window_lines: u32,
    pub max_window_tokens: u32,
    pub require_identifiers: bool,
    pub allow_break_glass: bool,
    pub default_deny_raw: bool,
    pub slice_max_cards: u32,
    pub slice_max_tokens: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_window_lines: 180,
            max_window_tokens: 1400,
            require_identifiers: true,
            allow_break_glass: false,
            default_deny_raw: true,
            slice_max_cards: 60,
            slice_max_tokens: 12000,
        }
    }
}

impl SdlConfig {
    /// Load from an explicit path, falling back to `SDL_CONFIG`; defaults
    /// apply when neither names a file. `SDL_DB_PATH` wins over `db_path`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = env::var_os(ENV_CONFIG).map(PathBuf::from);
        let chosen = path.map(Path::to_path_buf).or(env_path);

        let mut config = match chosen {
            Some(p) => {
                let text = std::fs::read_to_string(&p).map_err(|e| {
                    CoreError::config(format!("cannot read config {}: {e}", p.display()))
                })?;
                Self::parse(&text)?
            }
            None => Self::default(),
        };

        if let Some(db) = env::var_os(ENV_DB_PATH) {
            config.db_path = Some(PathBuf::from(db));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| CoreError::config(format!("invalid config: {e}")))
    }

    /// Resolved database path (default `./sdl-ledger.db`).
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("sdl-ledger.db"))
    }

    pub fn validate(&self) -> Result<()> {
        for repo in &self.repos {
            if repo.repo_id.is_empty() {
                return Err(CoreError::config("repo with empty repo_id"));
            }
            if !repo.root_path.is_absolute() {
                return Err(CoreError::config(format!(
                    "repo {}: root_path must be absolute, got {}",
                    repo.repo_id,
                    repo.root_path.display()
                )));
            }
        }
        if self.cache.max_entries == 0 {
            return Err(CoreError::config("cache.max_entries must be positive"));
        }
        if self.policy.max_window_lines == 0 || self.policy.max_window_tokens == 0 {
            return Err(CoreError::config("policy window limits must be positive"));
        }
        Ok(())
    }
}
