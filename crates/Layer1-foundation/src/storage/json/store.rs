//! Settings files kept as pretty-printed JSON
//!
//! A store is a directory. The global one lives under the user's config
//! directory and the project one under `.mpdispatch/` in the working tree.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory name used for both the global and the project store
pub const STORE_DIR: &str = "mpdispatch";

#[derive(Debug, Clone)]
pub struct JsonStore {
    base_dir: PathBuf,
}

impl JsonStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `<config dir>/mpdispatch/`
    pub fn global() -> Result<Self> {
        match dirs::config_dir() {
            Some(config) => Ok(Self::new(config.join(STORE_DIR))),
            None => Err(Error::Config(
                "no per-user config directory on this platform".to_string(),
            )),
        }
    }

    /// `<root>/.mpdispatch/`
    pub fn project(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join(format!(".{}", STORE_DIR)))
    }

    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("working directory unavailable: {}", e)))?;
        Ok(Self::project(cwd))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.file_path(name).is_file()
    }

    /// Read and decode `name`; a missing file is an error
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        self.load_optional(name)?.ok_or_else(|| {
            Error::Config(format!("{} does not exist", self.file_path(name).display()))
        })
    }

    pub fn load_optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.file_path(name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Config(format!("cannot read {}: {}", path.display(), e)))
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| Error::Config(format!("{} is not valid settings: {}", path.display(), e)))
    }

    /// Encode `value` into `name`, creating the store directory if needed
    ///
    /// The file is written beside its final name and renamed into place, so
    /// a reader never sees half a document.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| {
            Error::Config(format!("cannot create {}: {}", self.base_dir.display(), e))
        })?;
        let path = self.file_path(name);
        let staged = self.file_path(&format!("{}.tmp", name));
        let mut text = serde_json::to_string_pretty(value)?;
        text.push('\n');
        std::fs::write(&staged, text)
            .and_then(|_| std::fs::rename(&staged, &path))
            .map_err(|e| Error::Config(format!("cannot write {}: {}", path.display(), e)))
    }
}
