//! Sysinfo-backed stats provider
//!
//! CPU percentage and memory come from sysinfo. Accumulated user/system CPU
//! time and the thread count are not exposed by sysinfo, so they are read
//! from /proc/<pid>/stat.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use parking_lot::RwLock;
use procwatch_common::{Pid, ProcessStats, ProcessStatsProvider, StatsError, StatsResult};
use sysinfo::{Pid as SysPid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::scanner::DEFAULT_PROC_ROOT;

/// Clock ticks per second used when sysconf is unavailable
const FALLBACK_CLOCK_TICKS: f64 = 100.0;

/// Fields of /proc/<pid>/stat the provider needs
#[derive(Debug, Clone, Copy, PartialEq)]
struct StatFields {
    utime_ticks: u64,
    stime_ticks: u64,
    num_threads: u32,
}

/// Parse /proc/<pid>/stat
///
/// The comm field may contain spaces and parentheses, so fields are counted
/// from the last `)`.
fn parse_stat(content: &str) -> Option<StatFields> {
    let rest = &content[content.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // fields[0] is field 3 (state)
    Some(StatFields {
        utime_ticks: fields.get(11)?.parse().ok()?,
        stime_ticks: fields.get(12)?.parse().ok()?,
        num_threads: fields.get(17)?.parse().ok()?,
    })
}

#[cfg(unix)]
fn clock_ticks() -> f64 {
    // SAFETY: sysconf has no preconditions
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        FALLBACK_CLOCK_TICKS
    }
}

#[cfg(not(unix))]
fn clock_ticks() -> f64 {
    FALLBACK_CLOCK_TICKS
}

/// Stats provider using sysinfo plus procfs
pub struct SysinfoStatsProvider {
    system: RwLock<System>,
    proc_root: PathBuf,
    clock_ticks: f64,
}

impl SysinfoStatsProvider {
    pub fn new() -> Self {
        Self::with_proc_root(DEFAULT_PROC_ROOT)
    }

    pub fn with_proc_root(root: impl Into<PathBuf>) -> Self {
        let mut system = System::new();
        system.refresh_memory();

        Self {
            system: RwLock::new(system),
            proc_root: root.into(),
            clock_ticks: clock_ticks(),
        }
    }

    fn read_stat(&self, pid: Pid) -> StatsResult<StatFields> {
        let path = self.proc_root.join(pid.to_string()).join("stat");
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StatsError::ProcessGone(pid),
            ErrorKind::PermissionDenied => StatsError::PermissionDenied(pid),
            _ => StatsError::Collection(format!("Failed to read {}: {}", path.display(), e)),
        })?;

        parse_stat(&content)
            .ok_or_else(|| StatsError::Collection(format!("Malformed {}", path.display())))
    }
}

impl Default for SysinfoStatsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessStatsProvider for SysinfoStatsProvider {
    fn sample(&self, pid: Pid) -> StatsResult<ProcessStats> {
        let sys_pid = SysPid::from_u32(pid);

        let (cpu_percent, rss_bytes, vms_bytes, total_memory) = {
            let mut system = self.system.write();
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[sys_pid]),
                true,
                ProcessRefreshKind::nothing().with_cpu().with_memory(),
            );

            let process = system.process(sys_pid).ok_or(StatsError::ProcessGone(pid))?;
            (
                process.cpu_usage() as f64,
                process.memory(),
                process.virtual_memory(),
                system.total_memory(),
            )
        };

        let stat = self.read_stat(pid)?;

        let memory_percent = if total_memory > 0 {
            (rss_bytes as f64 / total_memory as f64 * 100.0) as f32
        } else {
            0.0
        };

        Ok(ProcessStats {
            cpu_percent,
            cpu_user_seconds: stat.utime_ticks as f64 / self.clock_ticks,
            cpu_system_seconds: stat.stime_ticks as f64 / self.clock_ticks,
            memory_virtual_kb: vms_bytes / 1024,
            memory_resident_kb: rss_bytes / 1024,
            memory_percent,
            thread_count: stat.num_threads,
        })
    }

    fn exists(&self, pid: Pid) -> bool {
        self.proc_root.join(pid.to_string()).is_dir()
    }
}
