//! Configuration system
//!
//! Configuration types are plain serde structs with defaults. They load from
//! TOML files, accept `PREFIX_*` environment overrides and validate themselves
//! before use.

pub mod traits;

pub use traits::{set_nested_value, KeywardConfig};
