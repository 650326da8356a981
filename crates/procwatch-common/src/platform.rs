//! Collaborator contracts for process discovery, sampling and pod resolution
//!
//! These traits define the interface between the reconciliation core and the
//! operating system. Each has a Linux implementation in procwatch-agent and
//! a mock in the agent's tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::events::{Pid, ProcessEntry, ProcessStats};

/// Errors raised when the process table cannot be enumerated at all
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to access process table: {0}")]
    OsAccess(String),
}

/// Result type for process table scans
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors raised while reading resource usage for one process
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StatsError {
    #[error("Process {0} is gone")]
    ProcessGone(Pid),

    #[error("Permission denied reading stats for process {0}")]
    PermissionDenied(Pid),

    #[error("Stats collection failed: {0}")]
    Collection(String),
}

/// Result type for stats sampling
pub type StatsResult<T> = Result<T, StatsError>;

/// Errors returned by the per-process tracking API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TrackError {
    #[error("Pid {0} already tracked")]
    AlreadyTracked(Pid),

    #[error("Pid {0} not tracked")]
    NotTracked(Pid),

    #[error("Pid {0} doesn't exist")]
    ProcessNotFound(Pid),

    #[error("Sampler for pid {0} has terminated")]
    Terminated(Pid),

    #[error("Sampling failed: {0}")]
    Sample(#[from] StatsError),
}

/// Result type for tracking operations
pub type TrackResult<T> = Result<T, TrackError>;

/// Errors raised by a pod resolver
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("No pod found for pid {0}")]
    NotFound(Pid),

    #[error("Pod resolver unavailable: {0}")]
    Unavailable(String),
}

/// Result type for pod resolution
pub type ResolverResult<T> = Result<T, ResolverError>;

/// Enumerates live processes and their argument vectors
///
/// Implementations must skip entries that vanish between enumeration and
/// read, and entries with no parseable arguments.
pub trait ProcessTableScanner: Send + Sync {
    /// Read every live process. Enumeration order is unspecified.
    fn scan(&self) -> ScanResult<Vec<ProcessEntry>>;

    /// Re-read the current argument vector of a single process
    ///
    /// Returns `None` if the process no longer exists or has no arguments.
    fn read_argv(&self, pid: Pid) -> Option<Vec<String>>;
}

/// Reads raw resource usage for a process
pub trait ProcessStatsProvider: Send + Sync {
    /// Take one sample of the given process
    fn sample(&self, pid: Pid) -> StatsResult<ProcessStats>;

    /// Check whether the process currently exists
    fn exists(&self, pid: Pid) -> bool;
}

/// Resolves a process to the pod (or container) that runs it
#[async_trait]
pub trait PodResolver: Send + Sync {
    /// Rebuild the resolver's internal cache
    async fn refresh(&self) -> ResolverResult<()>;

    /// Look up the pod name for a process from the cache
    fn find_pod_by_pid(&self, pid: Pid) -> ResolverResult<String>;
}
