//! # mpdispatch-foundation
//!
//! Foundation layer for mpdispatch:
//! - Error: shared error type and `Result` alias
//! - Config: pool settings, lenient environment parsing
//! - Logging: `tracing-subscriber` setup with optional file output
//! - Storage: JSON settings store (`.mpdispatch/`)
//!
//! ## Layering
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  mpdispatch (CLI)                            │
//! │                     │                        │
//! │                     ▼                        │
//! │  mpdispatch-task (dispatcher + worker)       │
//! │                     │                        │
//! │                     ▼                        │
//! │  mpdispatch-foundation (error/config/log)    │
//! └──────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    env::{missing_keys, parse_bool, EnvReader},
    PoolSettings, CONFIG_FILE, DEFAULT_MAX_PROCESSES, ENV_LOG_BACKUPS, ENV_LOG_FILE,
    ENV_LOG_LEVEL, ENV_LOG_MAX_SIZE_MB, ENV_MAX_PROCESSES,
};

// ============================================================================
// Logging
// ============================================================================
pub use logging::{init_logging, parse_level, rotate_if_needed, LogSettings};

// ============================================================================
// Storage
// ============================================================================
pub use storage::JsonStore;
