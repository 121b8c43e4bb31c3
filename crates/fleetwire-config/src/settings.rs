//! Collector process settings with multi-source merging.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;

/// Settings for the collector process itself (not the behavior pushed
/// to nodes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Address the listener binds.
    pub bind_address: String,
    /// Numeric identifier this collector reports to nodes.
    pub server_id: u32,
    /// Where the node inventory store lives.
    pub store_path: PathBuf,
    /// Optional JSON file with the default behavior config; built-in
    /// defaults are used when unset.
    pub behavior_file: Option<PathBuf>,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8675".to_string(),
            server_id: 1,
            store_path: PathBuf::from("fleetwire-inventory.json"),
            behavior_file: None,
        }
    }
}

/// Settings loader with builder pattern.
///
/// Precedence, lowest first: built-in defaults, `fleetwire.toml` in the
/// working directory, `FLEETWIRE_*` environment variables.
pub struct SettingsLoader {
    working_dir: PathBuf,
    env_prefix: String,
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self {
            working_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "FLEETWIRE".to_string(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads settings from all sources with proper precedence.
    pub fn load(self) -> ConfigResult<CollectorSettings> {
        let mut builder = config::Config::builder();

        let defaults = CollectorSettings::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        let settings_file = self.working_dir.join("fleetwire.toml");
        if settings_file.exists() {
            builder = builder.add_source(
                config::File::from(settings_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Loads settings or falls back to defaults.
    pub fn load_or_default(self) -> CollectorSettings {
        self.load().unwrap_or_default()
    }
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self::new()
    }
}
