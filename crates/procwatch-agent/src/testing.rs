//! Mock backends shared by the agent's unit tests
//!
//! Deterministic, in-memory stand-ins for the process table, the stats
//! provider and the pod resolver.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use procwatch_common::{
    Pid, PodResolver, ProcessEntry, ProcessStats, ProcessStatsProvider, ProcessTableScanner,
    ResolverError, ResolverResult, ScanError, ScanResult, StatsError, StatsResult, Target,
    TargetSet,
};

/// Build an argv from string literals
pub fn argv(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Compile a target set from (name, argv, stable) tuples
pub fn target_set(targets: &[(&str, &[&str], bool)]) -> TargetSet {
    TargetSet::compile(
        targets
            .iter()
            .map(|(name, pattern, stable)| Target::new(*name, argv(pattern), *stable))
            .collect(),
    )
    .unwrap()
}

/// Fixed stats used by the mock provider when none were set for a PID
pub fn stats_fixture(seed: u32) -> ProcessStats {
    ProcessStats {
        cpu_percent: 10.0 + seed as f64,
        cpu_user_seconds: 2.4,
        cpu_system_seconds: 0.6,
        memory_virtual_kb: 204_800,
        memory_resident_kb: 51_200,
        memory_percent: 1.25,
        thread_count: 4,
    }
}

// ============================================================================
// Report Output
// ============================================================================

/// Shared in-memory writer, for inspecting sink output
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, split into lines
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Mock Process Table
// ============================================================================

/// In-memory process table
#[derive(Default)]
pub struct MockProcessTable {
    processes: RwLock<HashMap<Pid, Vec<String>>>,
    fail_scans: AtomicBool,
    scan_count: AtomicU32,
}

impl MockProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_processes(processes: &[(Pid, &[&str])]) -> Self {
        let table = Self::new();
        for (pid, args) in processes {
            table.spawn(*pid, args);
        }
        table
    }

    /// Add (or replace, simulating PID reuse) a process
    pub fn spawn(&self, pid: Pid, args: &[&str]) {
        self.processes.write().insert(pid, argv(args));
    }

    pub fn exit(&self, pid: Pid) {
        self.processes.write().remove(&pid);
    }

    /// Make every subsequent scan fail with `OsAccess`
    pub fn set_failing(&self, failing: bool) {
        self.fail_scans.store(failing, Ordering::SeqCst);
    }

    pub fn scan_count(&self) -> u32 {
        self.scan_count.load(Ordering::SeqCst)
    }
}

impl ProcessTableScanner for MockProcessTable {
    fn scan(&self) -> ScanResult<Vec<ProcessEntry>> {
        self.scan_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_scans.load(Ordering::SeqCst) {
            return Err(ScanError::OsAccess("mock scan failure".to_string()));
        }
        Ok(self
            .processes
            .read()
            .iter()
            .filter(|(_, argv)| !argv.is_empty())
            .map(|(pid, argv)| ProcessEntry::new(*pid, argv.clone()))
            .collect())
    }

    fn read_argv(&self, pid: Pid) -> Option<Vec<String>> {
        self.processes
            .read()
            .get(&pid)
            .filter(|argv| !argv.is_empty())
            .cloned()
    }
}

// ============================================================================
// Mock Stats Provider
// ============================================================================

/// Stats provider backed by a map; PIDs absent from it are gone
#[derive(Default)]
pub struct MockStatsProvider {
    stats: RwLock<HashMap<Pid, ProcessStats>>,
    failing: RwLock<HashMap<Pid, StatsError>>,
    sample_count: AtomicU32,
}

impl MockStatsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pids(pids: &[Pid]) -> Arc<Self> {
        let provider = Self::new();
        for pid in pids {
            provider.set(*pid, stats_fixture(*pid));
        }
        Arc::new(provider)
    }

    pub fn set(&self, pid: Pid, stats: ProcessStats) {
        self.stats.write().insert(pid, stats);
    }

    pub fn remove(&self, pid: Pid) {
        self.stats.write().remove(&pid);
    }

    /// Make sampling of a PID fail while it still "exists"
    pub fn fail_with(&self, pid: Pid, error: StatsError) {
        self.failing.write().insert(pid, error);
    }

    pub fn clear_failure(&self, pid: Pid) {
        self.failing.write().remove(&pid);
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count.load(Ordering::SeqCst)
    }
}

impl ProcessStatsProvider for MockStatsProvider {
    fn sample(&self, pid: Pid) -> StatsResult<ProcessStats> {
        self.sample_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failing.read().get(&pid) {
            return Err(err.clone());
        }
        self.stats
            .read()
            .get(&pid)
            .copied()
            .ok_or(StatsError::ProcessGone(pid))
    }

    fn exists(&self, pid: Pid) -> bool {
        self.stats.read().contains_key(&pid)
    }
}

// ============================================================================
// Mock Pod Resolver
// ============================================================================

/// Pod resolver backed by a fixed map
#[derive(Default)]
pub struct MockPodResolver {
    pods: RwLock<HashMap<Pid, String>>,
    unavailable: AtomicBool,
    refresh_count: AtomicU32,
}

impl MockPodResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pod(self, pid: Pid, pod: &str) -> Self {
        self.pods.write().insert(pid, pod.to_string());
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PodResolver for MockPodResolver {
    async fn refresh(&self) -> ResolverResult<()> {
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ResolverError::Unavailable("mock resolver down".to_string()));
        }
        Ok(())
    }

    fn find_pod_by_pid(&self, pid: Pid) -> ResolverResult<String> {
        self.pods
            .read()
            .get(&pid)
            .cloned()
            .ok_or(ResolverError::NotFound(pid))
    }
}
