//! The `fleetwire agent` command.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, bail};
use fleetwire_client::{Producer, SampleSource, Session};
use fleetwire_config::ConnConfig;
use fleetwire_wire::Kind;

use crate::sources::{CpuSource, LoadAvgSource, MemSource, NetSource};

/// Name of the persisted connection config inside the state dir.
const CONN_FILE: &str = "fleetwire.json";

/// Environment override for the state directory.
const STATE_DIR_ENV: &str = "FLEETWIRE_PATH";

/// Startup connect attempts before giving up.
const STARTUP_ATTEMPTS: u32 = 3;

pub fn run(
    address: Option<String>,
    port: Option<u16>,
    serverless: bool,
    state_dir: Option<PathBuf>,
) -> Result<()> {
    let state_dir = state_dir
        .or_else(|| env::var_os(STATE_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&state_dir)
        .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;

    let mut conn = ConnConfig::load_or_default(state_dir.join(CONN_FILE));
    if let Some(address) = address {
        conn.server_address = address;
    }
    if let Some(port) = port {
        conn.server_port = port;
    }

    if serverless {
        return healthbeat_local();
    }

    let session = Session::new(conn);
    let mut connected = false;
    for attempt in 1..=STARTUP_ATTEMPTS {
        match session.connect() {
            Ok(()) => {
                connected = true;
                break;
            }
            Err(e) => tracing::warn!(attempt, error = %e, "startup connect failed"),
        }
    }
    if !connected {
        bail!("could not reach the collector after {STARTUP_ATTEMPTS} attempts");
    }
    if let Err(e) = session.save_conn() {
        tracing::warn!(error = %e, "connection config not saved");
    }

    let behavior = session.behavior();
    tracing::info!(id = %session.node_id(), "agent running");

    let writer = thread::Builder::new()
        .name("fw-writer".into())
        .spawn({
            let session = Arc::clone(&session);
            move || session.run_writer()
        })
        .context("failed to spawn writer thread")?;

    let mut producers = Vec::new();
    producers.push(
        Producer::new(
            Kind::CpuUtilization,
            behavior.cpu_utilization_period.as_duration(),
            CpuSource::new(),
            Arc::clone(&session),
        )
        .spawn(),
    );
    producers.push(
        Producer::new(
            Kind::MemInfo,
            behavior.mem_info_period.as_duration(),
            MemSource,
            Arc::clone(&session),
        )
        .spawn(),
    );
    producers.push(
        Producer::new(
            Kind::NetUsage,
            behavior.net_usage_period.as_duration(),
            NetSource,
            Arc::clone(&session),
        )
        .spawn(),
    );

    // The read loop runs on this thread until the session ends.
    session.listen(Box::new(LoadAvgSource));
    session.terminate();

    for handle in producers {
        if handle.join().is_err() {
            tracing::error!("producer thread panicked");
        }
    }
    if writer.join().is_err() {
        tracing::error!("writer thread panicked");
    }
    if let Err(e) = session.save_conn() {
        tracing::warn!(error = %e, "connection config not saved on shutdown");
    }
    tracing::info!("agent stopped");
    Ok(())
}

/// Serverless mode: no collector, just a periodic load-average line in
/// the local log.
fn healthbeat_local() -> Result<()> {
    let period = fleetwire_config::BehaviorConfig::default()
        .healthbeat_interval
        .as_duration();
    let mut source = LoadAvgSource;
    tracing::info!(period = ?period, "serverless healthbeat");
    loop {
        match source.collect() {
            Ok(payload) => match postcard::from_bytes::<fleetwire_types::LoadAvg>(&payload) {
                Ok(load) => tracing::info!(
                    one = load.one,
                    five = load.five,
                    fifteen = load.fifteen,
                    "healthbeat"
                ),
                Err(e) => tracing::warn!(error = %e, "bad loadavg sample"),
            },
            Err(e) => tracing::error!(error = %e, "loadavg collection failed"),
        }
        thread::sleep(period);
    }
}
