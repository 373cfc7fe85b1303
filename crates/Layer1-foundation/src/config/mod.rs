//! Config - pool settings and environment parsing
//!
//! - `env.rs` - lenient environment variable parsing
//! - `pool.rs` - PoolSettings (file + env overlay)

pub mod env;
mod pool;

pub use pool::{
    PoolSettings, CONFIG_FILE, DEFAULT_MAX_PROCESSES, ENV_LOG_BACKUPS, ENV_LOG_FILE,
    ENV_LOG_LEVEL, ENV_LOG_MAX_SIZE_MB, ENV_MAX_PROCESSES,
};
