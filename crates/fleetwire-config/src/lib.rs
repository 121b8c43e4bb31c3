//! # fleetwire-config: Persisted node state and collector configuration
//!
//! Three concerns:
//! - [`ConnConfig`]: the connection state a node persists between runs
//!   (JSON on disk, durations as human-readable strings).
//! - [`BehaviorConfig`]: the sampling periods the collector pushes to
//!   nodes during handshake; loadable from a JSON file on the
//!   collector side.
//! - [`CollectorSettings`]: the collector process's own settings,
//!   loaded from defaults, a TOML file, and `FLEETWIRE_*` environment
//!   overrides.

mod behavior;
mod conn;
mod error;
mod settings;

pub use behavior::BehaviorConfig;
pub use conn::ConnConfig;
pub use error::{ConfigError, ConfigResult};
pub use settings::{CollectorSettings, SettingsLoader};
