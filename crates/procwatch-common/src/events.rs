//! Process and sample types shared between discovery and sampling

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operating system process ID
pub type Pid = u32;

/// One row of the live process table
///
/// Re-read on every scan and never cached across reconciliation cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    /// Operating system process ID
    pub pid: Pid,
    /// Argument vector as read from the process table
    pub argv: Vec<String>,
}

impl ProcessEntry {
    pub fn new(pid: Pid, argv: Vec<String>) -> Self {
        Self { pid, argv }
    }
}

/// Raw resource usage of a single process, as returned by a stats provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessStats {
    /// CPU utilisation in percent since the previous sample
    pub cpu_percent: f64,
    /// Accumulated user CPU time in seconds
    pub cpu_user_seconds: f64,
    /// Accumulated system CPU time in seconds
    pub cpu_system_seconds: f64,
    /// Virtual memory size in KiB
    pub memory_virtual_kb: u64,
    /// Resident set size in KiB
    pub memory_resident_kb: u64,
    /// Resident memory as a percentage of total memory
    pub memory_percent: f32,
    /// Number of threads
    pub thread_count: u32,
}

/// One timestamped resource usage sample for a tracked process
///
/// Immutable once produced. Ownership moves from the sampler to whoever
/// requested it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchPoint {
    pub timestamp: DateTime<Utc>,
    pub thread_count: u32,
    pub memory_percent: f32,
    pub cpu_user: f64,
    pub cpu_system: f64,
    pub cpu_total: f64,
    pub memory_virtual_kb: u64,
    pub memory_resident_kb: u64,
}

impl WatchPoint {
    /// Build a watch point stamped with the current time
    pub fn from_stats(stats: &ProcessStats) -> Self {
        Self::at(Utc::now(), stats)
    }

    /// Build a watch point with an explicit timestamp
    pub fn at(timestamp: DateTime<Utc>, stats: &ProcessStats) -> Self {
        Self {
            timestamp,
            thread_count: stats.thread_count,
            memory_percent: stats.memory_percent,
            cpu_user: stats.cpu_user_seconds,
            cpu_system: stats.cpu_system_seconds,
            cpu_total: stats.cpu_percent,
            memory_virtual_kb: stats.memory_virtual_kb,
            memory_resident_kb: stats.memory_resident_kb,
        }
    }

    /// Sum several samples into one
    ///
    /// CPU, memory and thread figures add up; the timestamp is the latest
    /// one. Returns `None` for an empty slice.
    pub fn aggregate(points: &[WatchPoint]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        Some(rest.iter().fold(first.clone(), |mut acc, point| {
            acc.timestamp = acc.timestamp.max(point.timestamp);
            acc.thread_count += point.thread_count;
            acc.memory_percent += point.memory_percent;
            acc.cpu_user += point.cpu_user;
            acc.cpu_system += point.cpu_system;
            acc.cpu_total += point.cpu_total;
            acc.memory_virtual_kb += point.memory_virtual_kb;
            acc.memory_resident_kb += point.memory_resident_kb;
            acc
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_watch_point_copies_stats() {
        let stats = ProcessStats {
            cpu_percent: 12.5,
            cpu_user_seconds: 3.0,
            cpu_system_seconds: 1.5,
            memory_virtual_kb: 2048,
            memory_resident_kb: 512,
            memory_percent: 0.25,
            thread_count: 4,
        };

        let point = WatchPoint::from_stats(&stats);
        assert_eq!(point.cpu_total, 12.5);
        assert_eq!(point.cpu_user, 3.0);
        assert_eq!(point.cpu_system, 1.5);
        assert_eq!(point.memory_virtual_kb, 2048);
        assert_eq!(point.memory_resident_kb, 512);
        assert_eq!(point.thread_count, 4);
        assert!(point.timestamp.timestamp() > 0);
    }

    #[test]
    fn test_aggregate_sums_and_keeps_latest_timestamp() {
        let stats = ProcessStats {
            cpu_percent: 10.0,
            cpu_user_seconds: 2.0,
            cpu_system_seconds: 0.5,
            memory_virtual_kb: 1000,
            memory_resident_kb: 100,
            memory_percent: 0.5,
            thread_count: 3,
        };
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();

        let total = WatchPoint::aggregate(&[WatchPoint::at(late, &stats), WatchPoint::at(early, &stats)]).unwrap();
        assert_eq!(total.timestamp, late);
        assert_eq!(total.cpu_total, 20.0);
        assert_eq!(total.cpu_user, 4.0);
        assert_eq!(total.cpu_system, 1.0);
        assert_eq!(total.memory_virtual_kb, 2000);
        assert_eq!(total.memory_resident_kb, 200);
        assert_eq!(total.memory_percent, 1.0);
        assert_eq!(total.thread_count, 6);
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(WatchPoint::aggregate(&[]).is_none());
    }
}
