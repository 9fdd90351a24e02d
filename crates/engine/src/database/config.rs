//! Process configuration
//!
//! Configuration is loaded once at startup into an immutable
//! [`EventStoreConfig`] and passed explicitly to the database and the
//! notification pipeline.
//!
//! 1. The application mode comes from `EVENT_STORE_MODE`
//!    (`development` | `staging` | `production`, case-insensitive).
//! 2. Parameters are opaque string lookups under `/<mode>/event-store/`,
//!    served by a [`ParameterSource`].
//!
//! # Parameter file
//!
//! ```toml
//! "/development/event-store/PORT" = "8080"
//! "/development/event-store/TABLE_NAME" = "event-store"
//! "/development/event-store/NOTIFICATION_CHANNEL" = "event-store-commits"
//! "/development/event-store/DATA_DIR" = "/var/lib/evstore"
//! ```

use evstore_core::{Error, Result};
use evstore_storage::DurabilityMode;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable selecting the application mode
pub const MODE_ENV_VAR: &str = "EVENT_STORE_MODE";

/// Default secondary index name
pub const DEFAULT_INDEX_NAME: &str = "StreamIndex";

/// Default number of items per read page
pub const DEFAULT_PAGE_SIZE: usize = 100;

// ============================================================================
// Application Mode
// ============================================================================

/// Deployment environment the process runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppMode {
    /// Local development
    Development,
    /// Pre-production
    Staging,
    /// Production
    Production,
}

impl AppMode {
    /// Read the mode from `EVENT_STORE_MODE`
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(MODE_ENV_VAR).map_err(|_| {
            Error::Configuration(format!("environment variable {} is not set", MODE_ENV_VAR))
        })?;
        raw.parse()
    }

    /// Lowercase mode name
    pub fn as_str(&self) -> &'static str {
        match self {
            AppMode::Development => "development",
            AppMode::Staging => "staging",
            AppMode::Production => "production",
        }
    }

    /// Parameter path prefix for this mode, e.g. `/staging/event-store/`
    pub fn parameter_prefix(&self) -> String {
        format!("/{}/event-store/", self.as_str())
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(AppMode::Development),
            "staging" => Ok(AppMode::Staging),
            "production" => Ok(AppMode::Production),
            other => Err(Error::Configuration(format!(
                "unknown application mode '{}', expected development, staging or production",
                other
            ))),
        }
    }
}

// ============================================================================
// Parameter Sources
// ============================================================================

/// Key/value parameter store addressed by path prefix
pub trait ParameterSource: Send + Sync {
    /// All parameters under `path`, keyed by the remainder of their name
    fn get_parameters_by_path(&self, path: &str) -> Result<BTreeMap<String, String>>;
}

fn collect_under(entries: &BTreeMap<String, String>, path: &str) -> BTreeMap<String, String> {
    entries
        .range(path.to_string()..)
        .take_while(|(k, _)| k.starts_with(path))
        .map(|(k, v)| (k[path.len()..].to_string(), v.clone()))
        .collect()
}

/// Parameters held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryParameters {
    entries: BTreeMap<String, String>,
}

impl InMemoryParameters {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter by full path
    pub fn with(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(path.into(), value.into());
        self
    }

    /// Add a parameter under a mode's prefix
    pub fn with_param(self, mode: AppMode, name: &str, value: impl Into<String>) -> Self {
        let path = format!("{}{}", mode.parameter_prefix(), name);
        self.with(path, value)
    }
}

impl ParameterSource for InMemoryParameters {
    fn get_parameters_by_path(&self, path: &str) -> Result<BTreeMap<String, String>> {
        Ok(collect_under(&self.entries, path))
    }
}

/// Parameters read from a TOML file of `"/path/NAME" = value` entries
#[derive(Debug, Clone, Default)]
pub struct TomlParameters {
    entries: BTreeMap<String, String>,
}

impl TomlParameters {
    /// Parse parameters from TOML text
    ///
    /// String, integer and boolean values are accepted and kept as strings.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = content
            .parse()
            .map_err(|e| Error::Configuration(format!("Failed to parse parameters: {}", e)))?;

        let mut entries = BTreeMap::new();
        for (key, value) in table {
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => {
                    return Err(Error::Configuration(format!(
                        "parameter '{}' must be a string, integer or boolean, got {}",
                        key,
                        other.type_str()
                    )))
                }
            };
            entries.insert(key, value);
        }
        Ok(TomlParameters { entries })
    }

    /// Read and parse a parameter file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read parameter file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }
}

impl ParameterSource for TomlParameters {
    fn get_parameters_by_path(&self, path: &str) -> Result<BTreeMap<String, String>> {
        Ok(collect_under(&self.entries, path))
    }
}

// ============================================================================
// Event Store Configuration
// ============================================================================

/// Immutable process configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStoreConfig {
    /// Application mode the parameters were loaded for
    pub mode: AppMode,
    /// Service port
    pub port: u16,
    /// Table name
    pub table_name: String,
    /// Secondary index name
    pub index_name: String,
    /// Notification channel identifier
    pub notification_channel: String,
    /// Data directory; `None` runs an ephemeral in-memory store
    pub data_dir: Option<PathBuf>,
    /// Default read page size
    pub page_size: usize,
    /// WAL durability mode
    pub durability: DurabilityMode,
}

impl EventStoreConfig {
    /// Load every parameter for `mode` from `source`
    ///
    /// # Errors
    ///
    /// `Configuration` if a required parameter is missing or a value does
    /// not parse.
    pub fn load(mode: AppMode, source: &dyn ParameterSource) -> Result<Self> {
        let prefix = mode.parameter_prefix();
        let params = source.get_parameters_by_path(&prefix)?;

        let required = |name: &str| -> Result<String> {
            params
                .get(name)
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .ok_or_else(|| {
                    Error::Configuration(format!("missing parameter {}{}", prefix, name))
                })
        };

        let port_raw = required("PORT")?;
        let port = port_raw.trim().parse::<u16>().map_err(|_| {
            Error::Configuration(format!("PORT must be a port number, got '{}'", port_raw))
        })?;

        let page_size = match params.get("PAGE_SIZE") {
            None => DEFAULT_PAGE_SIZE,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::Configuration(format!(
                        "PAGE_SIZE must be a positive integer, got '{}'",
                        raw
                    )))
                }
            },
        };

        let durability = match params.get("DURABILITY") {
            None => DurabilityMode::default(),
            Some(raw) => raw.parse().map_err(Error::Configuration)?,
        };

        Ok(EventStoreConfig {
            mode,
            port,
            table_name: required("TABLE_NAME")?,
            index_name: params
                .get("INDEX_NAME")
                .cloned()
                .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string()),
            notification_channel: required("NOTIFICATION_CHANNEL")?,
            data_dir: params
                .get("DATA_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            page_size,
            durability,
        })
    }
}
