//! Linux /proc based process table scanner
//!
//! Reads /proc/<pid>/cmdline for every numeric entry under the proc root.

use std::fs;
use std::path::{Path, PathBuf};

use procwatch_common::{Pid, ProcessEntry, ProcessTableScanner, ScanError, ScanResult};
use tracing::trace;

use super::parse_cmdline;

/// Default mount point of procfs
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Process table scanner over a procfs-shaped directory
#[derive(Debug, Clone)]
pub struct ProcfsScanner {
    root: PathBuf,
}

impl ProcfsScanner {
    pub fn new() -> Self {
        Self::with_root(DEFAULT_PROC_ROOT)
    }

    /// Scan an alternative proc root (used by tests with a fake tree)
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cmdline_path(&self, pid: Pid) -> PathBuf {
        self.root.join(pid.to_string()).join("cmdline")
    }

    /// Read the argv of a process, `None` if it exited or has no arguments
    fn read_cmdline(&self, pid: Pid) -> Option<Vec<String>> {
        let content = match fs::read(self.cmdline_path(pid)) {
            Ok(c) => c,
            Err(e) => {
                // Process may have exited between readdir and read
                trace!(pid, error = %e, "Skipping unreadable cmdline");
                return None;
            }
        };

        let argv = parse_cmdline(&content);
        if argv.is_empty() {
            // Kernel threads and zombies have an empty cmdline
            return None;
        }
        Some(argv)
    }
}

impl Default for ProcfsScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTableScanner for ProcfsScanner {
    fn scan(&self) -> ScanResult<Vec<ProcessEntry>> {
        let proc_dir = fs::read_dir(&self.root).map_err(|e| {
            ScanError::OsAccess(format!("Failed to read {}: {}", self.root.display(), e))
        })?;

        let mut entries = Vec::new();

        for entry in proc_dir.flatten() {
            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            // Only numeric directories are processes
            if name_str.is_empty() || !name_str.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }

            let pid: Pid = match name_str.parse() {
                Ok(p) => p,
                Err(_) => continue,
            };

            if let Some(argv) = self.read_cmdline(pid) {
                entries.push(ProcessEntry::new(pid, argv));
            }
        }

        Ok(entries)
    }

    fn read_argv(&self, pid: Pid) -> Option<Vec<String>> {
        self.read_cmdline(pid)
    }
}
