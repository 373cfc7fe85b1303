//! Storage module for mpdispatch
//!
//! - `json`: JSON settings files under `.mpdispatch/`

mod json;

pub use json::JsonStore;
