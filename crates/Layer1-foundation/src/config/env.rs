//! Environment variable parsing
//!
//! Values are read through a lookup function so the same code serves the
//! real process environment and fixed maps in tests. Parsing is lenient: an
//! unset variable yields the default, an unparsable one logs a warning and
//! yields the default.

use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, error, warn};

/// Parse a boolean the way operators tend to write them
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "t" | "y" | "yes" => Some(true),
        "false" | "0" | "f" | "n" | "no" => Some(false),
        _ => None,
    }
}

/// Required variables that are absent from the process environment
pub fn missing_keys(required: &[&str]) -> Vec<String> {
    EnvReader::process().missing(required)
}

fn process_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Typed reader over an environment lookup
pub struct EnvReader<F> {
    lookup: F,
}

impl EnvReader<fn(&str) -> Option<String>> {
    /// Reader over the current process environment
    pub fn process() -> Self {
        Self {
            lookup: process_lookup,
        }
    }
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Reader over an arbitrary lookup
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }

    /// Raw value, with surrounding whitespace removed
    pub fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name).map(|v| v.trim().to_string())
    }

    /// Parse `name` as `T`, falling back to `default`
    pub fn get<T>(&self, name: &str, default: T) -> T
    where
        T: FromStr + Display,
    {
        let Some(value) = self.raw(name) else {
            debug!("Using default value for {}: {}", name, default);
            return default;
        };

        match value.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    "Invalid value for {}={} (expected {}). Using default: {}",
                    name,
                    value,
                    std::any::type_name::<T>(),
                    default
                );
                default
            }
        }
    }

    /// Parse `name` as a boolean, falling back to `default`
    pub fn get_bool(&self, name: &str, default: bool) -> bool {
        let Some(value) = self.raw(name) else {
            debug!("Using default value for {}: {}", name, default);
            return default;
        };

        parse_bool(&value).unwrap_or_else(|| {
            warn!(
                "Invalid boolean value for {}={}. Using default: {}",
                name, value, default
            );
            default
        })
    }

    /// Parse `name` as a strictly positive number, falling back to `default`
    pub fn get_positive<T>(&self, name: &str, default: T) -> T
    where
        T: FromStr + Display + PartialOrd + Default + Copy,
    {
        let value = self.get(name, default);
        if value <= T::default() {
            warn!(
                "{} must be greater than 0. Using default: {}",
                name, default
            );
            return default;
        }
        value
    }

    /// Parse `name` when set and non-empty
    pub fn get_optional<T>(&self, name: &str) -> Option<T>
    where
        T: FromStr,
    {
        let value = self.raw(name).filter(|v| !v.is_empty())?;
        match value.parse::<T>() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!("Invalid value for {}={}. Ignoring it", name, value);
                None
            }
        }
    }

    /// Names from `required` that the lookup does not know
    pub fn missing(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|key| (self.lookup)(**key).is_none())
            .map(|key| {
                error!("Required environment variable {} is not set", key);
                key.to_string()
            })
            .collect()
    }
}
