//! Timeseries sink boundary and sample-to-point adapters.
//!
//! Decoded samples become [`Point`]s, the neutral form a downstream
//! timeseries database ingests. The collector never blocks a node
//! session on a slow sink: [`ForwardingSink`] decouples sessions from
//! the real writer with a bounded queue and drops on overflow.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use fleetwire_types::{CpuSample, LoadAvg, MemSample, NetSample, Timestamp};

use crate::inventory::NodeRecord;

/// One timeseries data point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: &'static str,
    pub tags: Vec<(&'static str, String)>,
    pub fields: Vec<(&'static str, f64)>,
    /// Collection time from the sample, not arrival time.
    pub timestamp: Timestamp,
}

/// Where points go. Implementations must tolerate concurrent writers.
pub trait SampleSink: Send + Sync {
    fn write(&self, point: Point);
}

/// Sink that logs every point. The serverless and test default.
#[derive(Debug, Default)]
pub struct TracingSink;

impl SampleSink for TracingSink {
    fn write(&self, point: Point) {
        tracing::info!(
            measurement = point.measurement,
            tags = ?point.tags,
            fields = ?point.fields,
            timestamp = point.timestamp.as_nanos(),
            "point"
        );
    }
}

/// Decouples node sessions from the real sink with a bounded queue
/// and a single writer thread.
///
/// `write` never blocks: a full queue drops the point with a warning.
pub struct ForwardingSink {
    queue: Arc<ArrayQueue<Point>>,
    shutdown: Arc<AtomicBool>,
    writer: std::sync::Mutex<Option<thread::JoinHandle<()>>>,
}

impl ForwardingSink {
    /// Starts the writer thread draining into `inner`.
    pub fn start(inner: Box<dyn SampleSink>, capacity: usize) -> Self {
        let queue = Arc::new(ArrayQueue::new(capacity));
        let shutdown = Arc::new(AtomicBool::new(false));

        let writer_queue = Arc::clone(&queue);
        let writer_shutdown = Arc::clone(&shutdown);
        let writer = thread::Builder::new()
            .name("fw-sink".into())
            .spawn(move || {
                loop {
                    match writer_queue.pop() {
                        Some(point) => inner.write(point),
                        None => {
                            if writer_shutdown.load(Ordering::Acquire) {
                                break;
                            }
                            thread::sleep(Duration::from_millis(1));
                        }
                    }
                }
                // Flush whatever arrived between the last pop and the
                // shutdown flag.
                while let Some(point) = writer_queue.pop() {
                    inner.write(point);
                }
                tracing::debug!("sink writer stopped");
            })
            .expect("failed to spawn sink writer thread");

        Self {
            queue,
            shutdown,
            writer: std::sync::Mutex::new(Some(writer)),
        }
    }

    /// Stops the writer after flushing queued points.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.writer.lock().expect("writer lock poisoned").take() {
            if handle.join().is_err() {
                tracing::error!("sink writer panicked");
            }
        }
    }
}

impl SampleSink for ForwardingSink {
    fn write(&self, point: Point) {
        if self.queue.push(point).is_err() {
            tracing::warn!("sink queue full, dropping point");
        }
    }
}

impl Drop for ForwardingSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn node_tags(record: &NodeRecord) -> Vec<(&'static str, String)> {
    let mut tags = Vec::new();
    if !record.hostname.is_empty() {
        tags.push(("host", record.hostname.clone()));
    }
    if !record.region.is_empty() {
        tags.push(("region", record.region.clone()));
    }
    tags.push(("node", record.id.to_string()));
    tags
}

/// CPU utilization point. Values arrive as integer hundredths of a
/// percent and leave as percentages.
pub fn cpu_point(record: &NodeRecord, sample: &CpuSample) -> Point {
    let mut tags = node_tags(record);
    tags.push(("cpu", sample.cpu_id.clone()));
    Point {
        measurement: "cpu",
        tags,
        fields: vec![
            ("usr", f64::from(sample.usr) / 100.0),
            ("sys", f64::from(sample.sys) / 100.0),
            ("iowait", f64::from(sample.iowait) / 100.0),
            ("idle", f64::from(sample.idle) / 100.0),
        ],
        timestamp: sample.timestamp,
    }
}

pub fn mem_point(record: &NodeRecord, sample: &MemSample) -> Point {
    Point {
        measurement: "memory",
        tags: node_tags(record),
        fields: vec![
            ("mem_total", sample.mem_total as f64),
            ("mem_used", sample.mem_used as f64),
            ("mem_free", sample.mem_free as f64),
            ("mem_shared", sample.mem_shared as f64),
            ("mem_buffers", sample.mem_buffers as f64),
            ("cache_used", sample.cache_used as f64),
            ("cache_free", sample.cache_free as f64),
            ("swap_total", sample.swap_total as f64),
            ("swap_used", sample.swap_used as f64),
            ("swap_free", sample.swap_free as f64),
        ],
        timestamp: sample.timestamp,
    }
}

pub fn net_point(record: &NodeRecord, sample: &NetSample) -> Point {
    let mut tags = node_tags(record);
    tags.push(("interface", sample.interface.clone()));
    Point {
        measurement: "network",
        tags,
        fields: vec![
            ("rx_bytes", sample.rx_bytes as f64),
            ("rx_packets", sample.rx_packets as f64),
            ("tx_bytes", sample.tx_bytes as f64),
            ("tx_packets", sample.tx_packets as f64),
        ],
        timestamp: sample.timestamp,
    }
}

pub fn load_point(record: &NodeRecord, sample: &LoadAvg) -> Point {
    Point {
        measurement: "loadavg",
        tags: node_tags(record),
        fields: vec![
            ("one", sample.one),
            ("five", sample.five),
            ("fifteen", sample.fifteen),
        ],
        timestamp: sample.timestamp,
    }
}
