//! Core configuration trait

use crate::{KeywardError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Core trait for Keyward configuration types
///
/// Environment variables map onto fields by stripping [`Self::ENV_PREFIX`],
/// lowercasing, and treating `__` as the nesting separator:
/// `KEYWARD_SAS__INCLUDE_MASTER_KEY=false` sets `sas.include_master_key`.
pub trait KeywardConfig:
    Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Prefix (including the trailing underscore) of environment overrides
    const ENV_PREFIX: &'static str;

    /// Get default configuration values
    fn defaults() -> Self {
        Self::default()
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()>;

    /// Parse a TOML document; missing fields take their defaults
    fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KeywardError::internal(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Merge with the process environment
    fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Merge with an explicit set of `(name, value)` variables
    fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix(Self::ENV_PREFIX) {
                let key = key.to_lowercase().replace("__", ".");
                tracing::debug!(key = %key, "Applying configuration override from environment");
                self.set_from_string(&key, &value)?;
            }
        }
        self.validate()
    }

    /// Set a configuration value from a string, using dot notation for nesting
    fn set_from_string(&mut self, key: &str, value: &str) -> Result<()> {
        let mut tree = serde_json::to_value(&*self)?;
        set_nested_value(&mut tree, key, value)?;
        *self = serde_json::from_value(tree).map_err(|e| {
            KeywardError::invalid(format!("Invalid value for configuration key '{key}': {e}"))
        })?;
        Ok(())
    }
}

/// Set a nested value using dot notation (e.g. `"a.b.c"`).
///
/// The raw value is parsed as JSON when possible (numbers, booleans, arrays)
/// and otherwise stored as a string. Unknown keys are rejected.
pub fn set_nested_value(tree: &mut serde_json::Value, key: &str, raw: &str) -> Result<()> {
    let parsed = serde_json::from_str::<serde_json::Value>(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));

    let mut node = tree;
    let mut parts = key.split('.').peekable();
    while let Some(part) = parts.next() {
        let object = node.as_object_mut().ok_or_else(|| {
            KeywardError::invalid(format!("Configuration key '{key}' is not a table path"))
        })?;
        let child = object
            .get_mut(part)
            .ok_or_else(|| KeywardError::invalid(format!("Unknown configuration key '{key}'")))?;
        if parts.peek().is_none() {
            *child = parsed;
            return Ok(());
        }
        node = child;
    }
    Err(KeywardError::invalid("Empty configuration key"))
}
