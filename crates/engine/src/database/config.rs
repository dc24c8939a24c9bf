//! Database configuration via `worlddb.toml`
//!
//! On first open, a default `worlddb.toml` is created in the database
//! directory. To change settings, edit the file and reopen, or pass a
//! config to `Database::open_with_config`, which also writes it back.

use crate::schema::DEFAULT_STRING_INLINE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use worlddb_core::{Error, Result};

/// Config file name placed in the database directory.
pub const CONFIG_FILE_NAME: &str = "worlddb.toml";

/// Database configuration loaded from `worlddb.toml`.
///
/// # Example
///
/// ```toml
/// max_allocs = 256
/// string_inline = 32
/// list_initial_capacity = 10
/// dict_initial_capacity = 10
/// sync_on_close = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Tracked entries (allocations + fragments) per fragment file before a
    /// new fragment file is started.
    #[serde(default = "default_max_allocs")]
    pub max_allocs: u32,
    /// Inline width of [`Database::string_type`](crate::Database::string_type).
    #[serde(default = "default_string_inline")]
    pub string_inline: u32,
    /// Element slots reserved when a list is created.
    #[serde(default = "default_capacity")]
    pub list_initial_capacity: u32,
    /// Hash slots reserved when a dictionary is created.
    #[serde(default = "default_capacity")]
    pub dict_initial_capacity: u32,
    /// fsync every file on close.
    #[serde(default = "default_sync_on_close")]
    pub sync_on_close: bool,
}

fn default_max_allocs() -> u32 {
    256
}

fn default_string_inline() -> u32 {
    DEFAULT_STRING_INLINE
}

fn default_capacity() -> u32 {
    10
}

fn default_sync_on_close() -> bool {
    true
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            max_allocs: default_max_allocs(),
            string_inline: default_string_inline(),
            list_initial_capacity: default_capacity(),
            dict_initial_capacity: default_capacity(),
            sync_on_close: default_sync_on_close(),
        }
    }
}

impl WorldConfig {
    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a capacity is zero or `max_allocs < 2`.
    pub fn validate(&self) -> Result<()> {
        if self.max_allocs < 2 {
            return Err(Error::Config(format!(
                "max_allocs must be at least 2, got {}",
                self.max_allocs
            )));
        }
        if self.string_inline == 0 {
            return Err(Error::Config("string_inline must be positive".into()));
        }
        if self.list_initial_capacity == 0 {
            return Err(Error::Config("list_initial_capacity must be positive".into()));
        }
        if self.dict_initial_capacity == 0 {
            return Err(Error::Config("dict_initial_capacity must be positive".into()));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# worlddb configuration
#
# Tracked entries (allocations + fragments) per fragment file.
# A new fragment file is started when every existing one is full.
max_allocs = 256

# Inline width, in bytes, of strings declared through Database::string_type.
# Longer values are stored in a separate blob.
string_inline = 32

# Element slots reserved for a new list / hash slots for a new dictionary.
list_initial_capacity = 10
dict_initial_capacity = 10

# fsync every file when the database is closed.
sync_on_close = true
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: WorldConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
