//! The `fleetwire server` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use fleetwire_config::{BehaviorConfig, SettingsLoader};
use fleetwire_server::{Collector, ForwardingSink, JsonFileStore, TracingSink};

/// Points buffered between node sessions and the sink writer.
const SINK_CAPACITY: usize = 1024;

pub fn run(address: Option<String>, port: Option<u16>, config_dir: Option<PathBuf>) -> Result<()> {
    let loader = match &config_dir {
        Some(dir) => SettingsLoader::new().with_working_dir(dir),
        None => SettingsLoader::new(),
    };
    let mut settings = loader.load().context("failed to load settings")?;

    if let Some(address) = address {
        let current_port = settings
            .bind_address
            .rsplit_once(':')
            .map_or(8675, |(_, p)| p.parse().unwrap_or(8675));
        settings.bind_address = format!("{address}:{current_port}");
    }
    if let Some(port) = port {
        let host = settings
            .bind_address
            .rsplit_once(':')
            .map_or("127.0.0.1".to_string(), |(h, _)| h.to_string());
        settings.bind_address = format!("{host}:{port}");
    }

    let behavior = match &settings.behavior_file {
        Some(path) => BehaviorConfig::load(path)
            .with_context(|| format!("failed to load behavior config {}", path.display()))?,
        None => BehaviorConfig::default(),
    };

    let store = Box::new(JsonFileStore::new(&settings.store_path));
    let sink = Arc::new(ForwardingSink::start(Box::new(TracingSink), SINK_CAPACITY));

    let collector = Collector::new(settings.server_id, behavior, store, sink)
        .context("failed to start collector")?;
    collector
        .bind_and_serve(&settings.bind_address)
        .context("collector stopped")?;
    Ok(())
}
