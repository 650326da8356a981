//! procwatch-agent library
//!
//! Discovers processes by argv pattern, keeps their identities current,
//! samples them through per-process workers and reports the samples as
//! collectd `PUTVAL` lines.

pub mod config;
pub mod observability;
pub mod reconcile;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod sampler;
pub mod scanner;

#[cfg(test)]
pub mod testing;

pub use config::{Config, ConfigError, Interval};
pub use observability::{LoopMetrics, LoopMetricsSnapshot};
pub use reconcile::{LoopSettings, ReconciliationLoop, RunSummary, TickOutcome};
pub use registry::{IdentityValidator, TargetRegistry};
pub use report::{Report, ReportSink};
pub use resolver::CgroupPodResolver;
pub use sampler::{HistorySummary, SamplerConfig, SamplerHandle, SysinfoStatsProvider, Watcher};
pub use scanner::ProcfsScanner;
