//! `/proc`-backed metric sources.
//!
//! Thin by intent: read the counter file, parse, encode. Anything
//! smarter (per-CPU breakdown, per-interface series, rate windows)
//! belongs downstream of the sink.

use std::fs;

use bytes::Bytes;
use fleetwire_client::{CollectError, SampleSource};
use fleetwire_types::{CpuSample, LoadAvg, MemSample, NetSample, Timestamp};
use serde::Serialize;

const PROC_STAT: &str = "/proc/stat";
const PROC_MEMINFO: &str = "/proc/meminfo";
const PROC_NET_DEV: &str = "/proc/net/dev";
const PROC_LOADAVG: &str = "/proc/loadavg";

fn encode<T: Serialize>(sample: &T) -> Result<Bytes, CollectError> {
    postcard::to_allocvec(sample)
        .map(Bytes::from)
        .map_err(|e| CollectError::Malformed(format!("sample encoding failed: {e}")))
}

// ----------------------------------------------------------------------
// CPU
// ----------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
struct CpuTimes {
    usr: u64,
    sys: u64,
    iowait: u64,
    idle: u64,
    total: u64,
}

/// Aggregate CPU utilization from `/proc/stat`, reported as the delta
/// since the previous tick. The first tick reports the since-boot
/// average.
#[derive(Debug, Default)]
pub struct CpuSource {
    prev: CpuTimes,
}

impl CpuSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SampleSource for CpuSource {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Bytes, CollectError> {
        let stat = fs::read_to_string(PROC_STAT)?;
        let now = parse_cpu_stat(&stat)?;
        let sample = cpu_sample(self.prev, now);
        self.prev = now;
        encode(&sample)
    }
}

fn parse_cpu_stat(stat: &str) -> Result<CpuTimes, CollectError> {
    let line = stat
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| CollectError::Malformed("no aggregate cpu line".into()))?;
    let fields = line
        .split_whitespace()
        .skip(1)
        .map(str::parse)
        .collect::<Result<Vec<u64>, _>>()
        .map_err(|e| CollectError::Malformed(format!("bad cpu counter: {e}")))?;
    if fields.len() < 7 {
        return Err(CollectError::Malformed("short cpu line".into()));
    }
    Ok(CpuTimes {
        // user + nice
        usr: fields[0] + fields[1],
        // system + irq + softirq
        sys: fields[2] + fields[5] + fields[6],
        idle: fields[3],
        iowait: fields[4],
        total: fields.iter().sum(),
    })
}

fn cpu_sample(prev: CpuTimes, now: CpuTimes) -> CpuSample {
    let whole = now.total.saturating_sub(prev.total);
    let pct = |part: u64, prev_part: u64| {
        if whole == 0 {
            0
        } else {
            (part.saturating_sub(prev_part) * 10_000 / whole) as u32
        }
    };
    CpuSample {
        timestamp: Timestamp::now(),
        cpu_id: "cpu".into(),
        usr: pct(now.usr, prev.usr),
        sys: pct(now.sys, prev.sys),
        iowait: pct(now.iowait, prev.iowait),
        idle: pct(now.idle, prev.idle),
    }
}

// ----------------------------------------------------------------------
// Memory
// ----------------------------------------------------------------------

/// Memory usage from `/proc/meminfo`.
#[derive(Debug, Default)]
pub struct MemSource;

impl SampleSource for MemSource {
    fn name(&self) -> &'static str {
        "mem"
    }

    fn collect(&mut self) -> Result<Bytes, CollectError> {
        let meminfo = fs::read_to_string(PROC_MEMINFO)?;
        encode(&parse_meminfo(&meminfo)?)
    }
}

fn parse_meminfo(meminfo: &str) -> Result<MemSample, CollectError> {
    let bytes_of = |key: &str| -> u64 {
        meminfo
            .lines()
            .find_map(|l| l.strip_prefix(key)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(0, |kb| kb * 1024)
    };
    let mem_total = bytes_of("MemTotal");
    if mem_total == 0 {
        return Err(CollectError::Malformed("MemTotal missing".into()));
    }
    let mem_free = bytes_of("MemFree");
    let mem_available = bytes_of("MemAvailable");
    let cached = bytes_of("Cached");
    let swap_total = bytes_of("SwapTotal");
    let swap_free = bytes_of("SwapFree");
    Ok(MemSample {
        timestamp: Timestamp::now(),
        mem_total,
        mem_used: mem_total.saturating_sub(mem_free),
        mem_free,
        mem_shared: bytes_of("Shmem"),
        mem_buffers: bytes_of("Buffers"),
        cache_used: cached,
        cache_free: mem_available.saturating_sub(mem_free),
        swap_total,
        swap_used: swap_total.saturating_sub(swap_free),
        swap_free,
    })
}

// ----------------------------------------------------------------------
// Network
// ----------------------------------------------------------------------

/// Network usage from `/proc/net/dev`, summed over every interface
/// except loopback.
#[derive(Debug, Default)]
pub struct NetSource;

impl SampleSource for NetSource {
    fn name(&self) -> &'static str {
        "net"
    }

    fn collect(&mut self) -> Result<Bytes, CollectError> {
        let netdev = fs::read_to_string(PROC_NET_DEV)?;
        encode(&parse_netdev(&netdev)?)
    }
}

fn parse_netdev(netdev: &str) -> Result<NetSample, CollectError> {
    let mut sample = NetSample {
        timestamp: Timestamp::now(),
        interface: "total".into(),
        rx_bytes: 0,
        rx_packets: 0,
        tx_bytes: 0,
        tx_packets: 0,
    };
    let mut seen = false;
    for line in netdev.lines().skip(2) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        if name.trim() == "lo" {
            continue;
        }
        let fields = counters
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<Vec<u64>, _>>()
            .map_err(|e| CollectError::Malformed(format!("bad net counter: {e}")))?;
        if fields.len() < 10 {
            return Err(CollectError::Malformed("short interface line".into()));
        }
        sample.rx_bytes += fields[0];
        sample.rx_packets += fields[1];
        sample.tx_bytes += fields[8];
        sample.tx_packets += fields[9];
        seen = true;
    }
    if !seen {
        return Err(CollectError::Malformed("no interfaces".into()));
    }
    Ok(sample)
}

// ----------------------------------------------------------------------
// Load average
// ----------------------------------------------------------------------

/// Load average from `/proc/loadavg`. Also serves the collector's
/// on-demand load requests and the serverless healthbeat.
#[derive(Debug, Default)]
pub struct LoadAvgSource;

impl SampleSource for LoadAvgSource {
    fn name(&self) -> &'static str {
        "loadavg"
    }

    fn collect(&mut self) -> Result<Bytes, CollectError> {
        let loadavg = fs::read_to_string(PROC_LOADAVG)?;
        encode(&parse_loadavg(&loadavg)?)
    }
}

fn parse_loadavg(loadavg: &str) -> Result<LoadAvg, CollectError> {
    let mut fields = loadavg.split_whitespace();
    let mut next = || -> Result<f64, CollectError> {
        fields
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| CollectError::Malformed("bad loadavg line".into()))
    };
    Ok(LoadAvg {
        timestamp: Timestamp::now(),
        one: next()?,
        five: next()?,
        fifteen: next()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "cpu  100 20 50 800 30 5 15 0 0 0\n\
                        cpu0 50 10 25 400 15 2 8 0 0 0\n\
                        intr 12345\n";

    #[test]
    fn cpu_stat_aggregates_the_summary_line() {
        let times = parse_cpu_stat(STAT).expect("parse");
        assert_eq!(times.usr, 120);
        assert_eq!(times.sys, 70);
        assert_eq!(times.idle, 800);
        assert_eq!(times.iowait, 30);
        assert_eq!(times.total, 1020);
    }

    #[test]
    fn cpu_sample_reports_delta_in_hundredths() {
        let prev = parse_cpu_stat(STAT).expect("prev");
        let next = CpuTimes {
            usr: prev.usr + 50,
            sys: prev.sys + 25,
            iowait: prev.iowait,
            idle: prev.idle + 25,
            total: prev.total + 100,
        };
        let sample = cpu_sample(prev, next);
        assert_eq!(sample.usr, 5_000);
        assert_eq!(sample.sys, 2_500);
        assert_eq!(sample.iowait, 0);
        assert_eq!(sample.idle, 2_500);
    }

    #[test]
    fn cpu_sample_with_no_progress_is_all_zero() {
        let times = parse_cpu_stat(STAT).expect("parse");
        let sample = cpu_sample(times, times);
        assert_eq!((sample.usr, sample.sys, sample.iowait, sample.idle), (0, 0, 0, 0));
    }

    #[test]
    fn meminfo_parses_and_derives_used() {
        let sample = parse_meminfo(
            "MemTotal:       16384 kB\n\
             MemFree:         4096 kB\n\
             MemAvailable:    8192 kB\n\
             Buffers:          512 kB\n\
             Cached:          2048 kB\n\
             Shmem:            256 kB\n\
             SwapTotal:       1024 kB\n\
             SwapFree:        1000 kB\n",
        )
        .expect("parse");
        assert_eq!(sample.mem_total, 16384 * 1024);
        assert_eq!(sample.mem_used, 12288 * 1024);
        assert_eq!(sample.mem_shared, 256 * 1024);
        assert_eq!(sample.swap_used, 24 * 1024);
    }

    #[test]
    fn meminfo_without_total_is_malformed() {
        let err = parse_meminfo("MemFree: 1 kB\n").expect_err("must fail");
        assert!(matches!(err, CollectError::Malformed(_)));
    }

    #[test]
    fn netdev_sums_everything_but_loopback() {
        let sample = parse_netdev(
            "Inter-|   Receive                                                |  Transmit\n\
             face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n\
             lo: 999 9 0 0 0 0 0 0 999 9 0 0 0 0 0 0\n\
             eth0: 100 10 0 0 0 0 0 0 200 20 0 0 0 0 0 0\n\
             eth1: 50 5 0 0 0 0 0 0 25 2 0 0 0 0 0 0\n",
        )
        .expect("parse");
        assert_eq!(sample.rx_bytes, 150);
        assert_eq!(sample.rx_packets, 15);
        assert_eq!(sample.tx_bytes, 225);
        assert_eq!(sample.tx_packets, 22);
    }

    #[test]
    fn loadavg_parses_three_windows() {
        let load = parse_loadavg("0.25 0.50 0.75 2/345 6789\n").expect("parse");
        assert!((load.one - 0.25).abs() < f64::EPSILON);
        assert!((load.five - 0.50).abs() < f64::EPSILON);
        assert!((load.fifteen - 0.75).abs() < f64::EPSILON);
    }
}
