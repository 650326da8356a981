//! Metric reports in the collectd exec plain-text protocol
//!
//! One `PUTVAL` line per metric:
//!
//! ```text
//! PUTVAL <host>/exec-<name>[-<instance>]/<metric> interval=<seconds> N:<value>
//! ```

use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use procwatch_common::{Pid, WatchPoint};

/// Round to the nearest integer, ties away from zero
pub fn round_half_up(value: f64) -> i64 {
    if value.is_finite() {
        (value + 0.5).floor() as i64
    } else {
        0
    }
}

/// Series identifier for a target instance
///
/// Stable-identity targets report as `exec-<name>`, every other target as
/// `exec-<name>-<instance>`.
pub fn plugin_instance(name: &str, instance: Option<&str>) -> String {
    match instance {
        Some(instance) => format!("exec-{}-{}", name, instance),
        None => format!("exec-{}", name),
    }
}

/// One formatted metric value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub host: String,
    pub plugin_instance: String,
    pub metric: &'static str,
    pub interval_secs: u64,
    pub value: i64,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PUTVAL {}/{}/{} interval={} N:{}",
            self.host, self.plugin_instance, self.metric, self.interval_secs, self.value
        )
    }
}

/// Where a batch of reports is tagged
#[derive(Debug, Clone)]
pub struct ReportContext<'a> {
    pub host: &'a str,
    pub interval_secs: u64,
}

/// Build every report for one sample
///
/// `stable_pid` is set for stable-identity targets and adds an
/// `objects-pid` line so the backing PID stays visible.
pub fn build_reports(
    ctx: &ReportContext<'_>,
    plugin_instance: &str,
    point: &WatchPoint,
    stable_pid: Option<Pid>,
) -> Vec<Report> {
    let cpu = round_half_up(point.cpu_total);
    let mut values = vec![
        ("cpu-perc", cpu),
        ("percent-cpu", cpu),
        ("cpu-user", round_half_up(point.cpu_user)),
        ("cpu-system", round_half_up(point.cpu_system)),
        ("memory-virtual", point.memory_virtual_kb as i64),
        ("memory-resident", point.memory_resident_kb as i64),
        ("percent-memory", round_half_up(point.memory_percent as f64)),
        ("threads", point.thread_count as i64),
    ];
    if let Some(pid) = stable_pid {
        values.push(("objects-pid", pid as i64));
    }

    values
        .into_iter()
        .map(|(metric, value)| Report {
            host: ctx.host.to_string(),
            plugin_instance: plugin_instance.to_string(),
            metric,
            interval_secs: ctx.interval_secs,
            value,
        })
        .collect()
}

/// Line-oriented report output
pub struct ReportSink {
    writer: Mutex<Box<dyn Write + Send>>,
    lines: AtomicU64,
}

impl ReportSink {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
            lines: AtomicU64::new(0),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Write a batch of reports, one per line
    pub fn emit(&self, reports: &[Report]) -> io::Result<()> {
        let mut writer = self.writer.lock();
        for report in reports {
            writeln!(writer, "{}", report)?;
        }
        self.lines.fetch_add(reports.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }

    /// Total lines written since creation
    pub fn lines_written(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ReportSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportSink")
            .field("lines", &self.lines_written())
            .finish()
    }
}
