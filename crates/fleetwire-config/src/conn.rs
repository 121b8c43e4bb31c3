//! The connection state a node persists between runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fleetwire_types::{HumanDuration, NodeId};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Everything a node keeps on disk: where its collector lives, the
/// identity the collector assigned it, and how patiently to dial.
///
/// Written back whenever the identity changes and on clean shutdown.
/// The save is a truncate-and-rewrite of the same file; there is no
/// atomic-rename guarantee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnConfig {
    /// Identity assigned by the collector; empty until first handshake.
    #[serde(default)]
    pub id: NodeId,
    pub server_address: String,
    pub server_port: u16,
    #[serde(default)]
    pub server_id: u32,
    /// Delay between dial attempts.
    pub connect_interval: HumanDuration,
    /// Total time budget for one `connect()` call.
    pub connect_period: HumanDuration,
    /// Where this config was loaded from; not serialized.
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            id: NodeId::unassigned(),
            server_address: "127.0.0.1".to_string(),
            server_port: 8675,
            server_id: 0,
            connect_interval: HumanDuration::new(Duration::from_secs(5)),
            connect_period: HumanDuration::new(Duration::from_secs(15 * 60)),
            path: None,
        }
    }
}

impl ConnConfig {
    /// Loads the config from `path`. The path is remembered for
    /// subsequent [`save`](Self::save) calls.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut conf: ConnConfig =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        conf.path = Some(path.to_path_buf());
        Ok(conf)
    }

    /// Loads the config, falling back to defaults when the file does
    /// not exist yet. First run on a node is not an error; the file
    /// appears after the first successful handshake.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(conf) => conf,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "using default connection config");
                let mut conf = Self::default();
                conf.path = Some(path.to_path_buf());
                conf
            }
        }
    }

    /// Overrides the file this config saves to.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    /// Persists the config to the path it was loaded from.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self.path.as_ref().ok_or(ConfigError::PathUnset)?;
        let json = serde_json::to_vec_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.clone(),
            source,
        })
    }

    /// The collector endpoint in `host:port` form.
    pub fn server_endpoint(&self) -> String {
        format!("{}:{}", self.server_address, self.server_port)
    }
}
