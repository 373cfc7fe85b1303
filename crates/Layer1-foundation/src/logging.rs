//! Logging setup
//!
//! Library code only emits `tracing` events. Binaries call [`init_logging`]
//! once at startup. Console output always goes to stderr: worker processes
//! reserve stdout for the result channel.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    /// TRACE, DEBUG, INFO, WARN, ERROR (CRITICAL is accepted as ERROR)
    #[serde(default = "default_level")]
    pub level: String,

    /// Optional log file, appended to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Rotate the log file at startup once it grows past this size
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,

    /// Rotated files to keep (`app.log.1` .. `app.log.N`)
    #[serde(default = "default_backups")]
    pub backups: usize,
}

fn default_level() -> String {
    "INFO".to_string()
}

fn default_max_size_mb() -> u64 {
    10
}

fn default_backups() -> usize {
    5
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
            max_size_mb: default_max_size_mb(),
            backups: default_backups(),
        }
    }
}

impl LogSettings {
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Log file path with a `.log` extension added when none was given
    pub fn file_path(&self) -> Option<PathBuf> {
        let file = self.file.as_ref()?;
        if file.as_os_str().is_empty() {
            return None;
        }
        if file.extension().is_some() {
            Some(file.clone())
        } else {
            Some(file.with_extension("log"))
        }
    }
}

/// Parse a level name, case-insensitively
pub fn parse_level(level: &str) -> Result<LevelFilter> {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Ok(LevelFilter::TRACE),
        "DEBUG" => Ok(LevelFilter::DEBUG),
        "INFO" => Ok(LevelFilter::INFO),
        "WARN" | "WARNING" => Ok(LevelFilter::WARN),
        "ERROR" | "CRITICAL" => Ok(LevelFilter::ERROR),
        "OFF" => Ok(LevelFilter::OFF),
        other => Err(Error::Config(format!(
            "Invalid log level: {}. Must be one of TRACE, DEBUG, INFO, WARN, ERROR, CRITICAL",
            other
        ))),
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `settings.level` when set.
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let level = parse_level(&settings.level)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let file_layer = match settings.file_path() {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            rotate_if_needed(&path, settings.max_size_mb * 1024 * 1024, settings.backups)?;
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install logger: {}", e)))
}

fn backup_path(path: &Path, index: usize) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// Size-based rotation: `app.log` -> `app.log.1` -> ... -> `app.log.N`
///
/// Returns whether a rotation happened. With `backups == 0` the oversized
/// file is simply removed.
pub fn rotate_if_needed(path: &Path, max_bytes: u64, backups: usize) -> Result<bool> {
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if size <= max_bytes {
        return Ok(false);
    }

    if backups == 0 {
        std::fs::remove_file(path)?;
        return Ok(true);
    }

    let oldest = backup_path(path, backups);
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }
    for index in (1..backups).rev() {
        let from = backup_path(path, index);
        if from.exists() {
            std::fs::rename(&from, backup_path(path, index + 1))?;
        }
    }
    std::fs::rename(path, backup_path(path, 1))?;

    debug!("Rotated log file {} ({} bytes)", path.display(), size);
    Ok(true)
}
