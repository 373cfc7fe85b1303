//! Pool settings - process limit and logging, merged from file and env

use super::env::EnvReader;
use crate::logging::{parse_level, LogSettings};
use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Settings file name inside the store directory
pub const CONFIG_FILE: &str = "config.json";

/// Worker processes allowed at once when nothing else is configured
pub const DEFAULT_MAX_PROCESSES: usize = 4;

pub const ENV_MAX_PROCESSES: &str = "MPDISPATCH_MAX_PROCESSES";
pub const ENV_LOG_LEVEL: &str = "MPDISPATCH_LOG_LEVEL";
pub const ENV_LOG_FILE: &str = "MPDISPATCH_LOG_FILE";
pub const ENV_LOG_MAX_SIZE_MB: &str = "MPDISPATCH_LOG_MAX_SIZE_MB";
pub const ENV_LOG_BACKUPS: &str = "MPDISPATCH_LOG_BACKUPS";

/// Pool-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSettings {
    /// Upper bound on concurrently running worker processes
    #[serde(default = "default_max_processes")]
    pub max_processes: usize,

    /// Logging configuration
    #[serde(default)]
    pub log: LogSettings,
}

fn default_max_processes() -> usize {
    DEFAULT_MAX_PROCESSES
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
            log: LogSettings::default(),
        }
    }
}

impl PoolSettings {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Project file, else global file, else defaults; then the environment
    pub fn load() -> Result<Self> {
        let project = JsonStore::current_project()?;
        let mut settings = match project.load_optional::<Self>(CONFIG_FILE)? {
            Some(settings) => settings,
            None => match JsonStore::global() {
                Ok(global) => Self::load_from(&global)?,
                Err(_) => Self::default(),
            },
        };
        settings.apply_env(&EnvReader::process());
        settings.validate()?;
        Ok(settings)
    }

    /// Settings from one store, defaults when the file is absent
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        Ok(store.load_optional::<Self>(CONFIG_FILE)?.unwrap_or_default())
    }

    /// Overlay environment variables; invalid values keep the current setting
    pub fn apply_env<F>(&mut self, env: &EnvReader<F>)
    where
        F: Fn(&str) -> Option<String>,
    {
        self.max_processes = env.get_positive(ENV_MAX_PROCESSES, self.max_processes);

        if let Some(level) = env.raw(ENV_LOG_LEVEL).filter(|l| !l.is_empty()) {
            match parse_level(&level) {
                Ok(_) => self.log.level = level,
                Err(e) => warn!("{}. Keeping {}", e, self.log.level),
            }
        }
        if let Some(file) = env.get_optional::<PathBuf>(ENV_LOG_FILE) {
            self.log.file = Some(file);
        }
        self.log.max_size_mb = env.get_positive(ENV_LOG_MAX_SIZE_MB, self.log.max_size_mb);
        self.log.backups = env.get(ENV_LOG_BACKUPS, self.log.backups);
    }

    /// Reject settings the dispatcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_processes == 0 {
            return Err(Error::Config(
                "maxProcesses must be a positive integer".to_string(),
            ));
        }
        parse_level(&self.log.level)?;
        Ok(())
    }

    pub fn with_max_processes(mut self, max_processes: usize) -> Self {
        self.max_processes = max_processes;
        self
    }

    pub fn with_log(mut self, log: LogSettings) -> Self {
        self.log = log;
        self
    }
}
