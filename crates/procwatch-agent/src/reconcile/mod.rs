//! Reconciliation loop
//!
//! The single driver task. Every tick it:
//!
//! 1. refreshes the pod resolver, if any
//! 2. re-validates every tracked identity
//! 3. rescans on staleness, or halts when autotrack is off
//! 4. aligns sampler membership with the tracked sets
//! 5. polls every sampler and writes one report line per metric and series
//!
//! PIDs that land on the same series (every PID of a stable-identity target,
//! or PIDs resolving to the same pod) are summed into one set of lines. All
//! report lines of a tick are flushed before the tick returns.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use procwatch_common::{Pid, PodResolver, ProcessTableScanner, TrackError, WatchPoint};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::observability::{LoopMetrics, LoopMetricsSnapshot};
use crate::registry::{IdentityValidator, TargetRegistry};
use crate::report::{build_reports, plugin_instance, Report, ReportContext, ReportSink};
use crate::sampler::{HistorySummary, Watcher};


/// Loop settings resolved from configuration
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub interval: Duration,
    pub autotrack: bool,
    pub hostname: String,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tick completed, with the number of report lines written
    Reported(usize),
    /// Rescan failed, nothing was sampled this tick
    Skipped,
    /// Identities went stale with autotrack disabled
    Halted,
}

/// What the loop hands back when it stops
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub metrics: LoopMetricsSnapshot,
    /// Sample histories of the PIDs still tracked at shutdown
    pub histories: BTreeMap<Pid, HistorySummary>,
}

/// Polled points sharing one plugin instance
struct Series {
    plugin_instance: String,
    points: Vec<WatchPoint>,
    /// Lowest backing PID, for stable-identity series
    backing_pid: Option<Pid>,
}

fn log_history(pid: Pid, summary: &HistorySummary) {
    if summary.samples == 0 {
        debug!(pid, "Stopped sampling");
        return;
    }
    info!(
        pid,
        samples = summary.samples,
        mean_cpu = summary.mean_cpu,
        peak_cpu = summary.peak_cpu,
        peak_resident_kb = summary.peak_resident_kb,
        peak_threads = summary.peak_threads,
        "Stopped sampling"
    );
}

/// Periodic discovery, validation and sampling driver
pub struct ReconciliationLoop {
    registry: TargetRegistry,
    scanner: Arc<dyn ProcessTableScanner>,
    watcher: Watcher,
    resolver: Option<Arc<dyn PodResolver>>,
    sink: ReportSink,
    settings: LoopSettings,
    metrics: Arc<LoopMetrics>,
}

impl ReconciliationLoop {
    pub fn new(
        registry: TargetRegistry,
        scanner: Arc<dyn ProcessTableScanner>,
        watcher: Watcher,
        sink: ReportSink,
        settings: LoopSettings,
    ) -> Self {
        Self {
            registry,
            scanner,
            watcher,
            resolver: None,
            sink,
            settings,
            metrics: Arc::new(LoopMetrics::new()),
        }
    }

    /// Tag per-process reports with resolved pod names
    pub fn with_resolver(mut self, resolver: Arc<dyn PodResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    pub fn metrics(&self) -> Arc<LoopMetrics> {
        self.metrics.clone()
    }

    fn interval_secs(&self) -> u64 {
        self.settings.interval.as_secs().max(1)
    }

    /// Initial scan, before the first tick
    ///
    /// A failure is logged; the first tick then sees empty sets and rescans.
    pub async fn bootstrap(&mut self) {
        match self.registry.scan(self.scanner.as_ref()) {
            Ok(matched) => debug!(matched, "Bootstrap scan complete"),
            Err(e) => {
                self.metrics.scan_failures.inc();
                warn!("error during the collection setup: {}", e);
            }
        }
        self.sync_watcher().await;
    }

    /// Run one reconciliation tick
    pub async fn tick(&mut self) -> TickOutcome {
        let started = Instant::now();
        self.metrics.ticks.inc();

        let outcome = self.run_tick().await;

        self.metrics.observe_tick(started.elapsed());
        outcome
    }

    async fn run_tick(&mut self) -> TickOutcome {
        if let Some(resolver) = &self.resolver {
            if let Err(e) = resolver.refresh().await {
                self.metrics.resolver_failures.inc();
                warn!("Pod resolver refresh failed, reporting raw pids: {}", e);
            }
        }

        let current = IdentityValidator::new(self.scanner.as_ref()).all_current(&self.registry);
        if !current {
            if !self.settings.autotrack {
                error!("stale pid(s) -- aborting!");
                return TickOutcome::Halted;
            }

            info!("stale pid(s) -- rescanning!");
            self.metrics.rescans.inc();
            if let Err(e) = self.registry.scan(self.scanner.as_ref()) {
                self.metrics.scan_failures.inc();
                self.metrics.skipped_ticks.inc();
                warn!("error collecting: {} - skipping cycle", e);
                return TickOutcome::Skipped;
            }
        }

        self.sync_watcher().await;

        let reports = self.collect_reports().await;
        let lines = reports.len();

        if let Err(e) = self.sink.emit(&reports).and_then(|()| self.sink.flush()) {
            warn!("Failed to write reports: {}", e);
        }
        self.metrics.reports_emitted.inc_by(lines as u64);

        TickOutcome::Reported(lines)
    }

    /// Untrack PIDs that left the tracked sets and track the new ones
    async fn sync_watcher(&mut self) {
        let wanted: BTreeSet<Pid> = self.registry.tracked_pids().map(|(_, pid)| pid).collect();
        let running: Vec<Pid> = self.watcher.tracked().collect();

        for pid in running.into_iter().filter(|pid| !wanted.contains(pid)) {
            match self.watcher.untrack(pid).await {
                Ok(history) => log_history(pid, &HistorySummary::from_points(&history)),
                Err(e) => warn!(pid, "Failed to untrack: {}", e),
            }
        }

        for pid in wanted {
            if self.watcher.is_tracked(pid) {
                continue;
            }
            match self.watcher.track(pid) {
                Ok(()) => {}
                // Exited between scan and track
                Err(TrackError::ProcessNotFound(_)) => debug!(pid, "Process gone before tracking"),
                Err(e) => warn!(pid, "Failed to track: {}", e),
            }
        }

        self.metrics.tracked_pids.set(self.watcher.len() as u64);
    }

    async fn collect_reports(&mut self) -> Vec<Report> {
        let polled = self.watcher.poll_all().await;

        let mut series: Vec<Series> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for (pid, result) in polled {
            let point = match result {
                Ok(point) => point,
                Err(e) => {
                    self.metrics.sample_failures.inc();
                    debug!(pid, "Skipping pid this tick: {}", e);
                    continue;
                }
            };
            let Some((plugin_instance, stable)) = self.series_of(pid) else {
                continue;
            };

            // Polled in ascending PID order, so the first PID is the lowest
            match index.get(&plugin_instance) {
                Some(&i) => series[i].points.push(point),
                None => {
                    index.insert(plugin_instance.clone(), series.len());
                    series.push(Series {
                        plugin_instance,
                        points: vec![point],
                        backing_pid: stable.then_some(pid),
                    });
                }
            }
        }

        let ctx = ReportContext {
            host: &self.settings.hostname,
            interval_secs: self.interval_secs(),
        };
        series
            .iter()
            .flat_map(|s| {
                WatchPoint::aggregate(&s.points)
                    .map(|total| build_reports(&ctx, &s.plugin_instance, &total, s.backing_pid))
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Plugin instance a PID reports under, and whether it is a stable identity
    fn series_of(&self, pid: Pid) -> Option<(String, bool)> {
        let target = self.registry.target_of(pid)?;

        if target.stable_identity() {
            return Some((plugin_instance(target.name(), None), true));
        }

        let instance = self
            .resolver
            .as_ref()
            .and_then(|r| r.find_pod_by_pid(pid).ok())
            .unwrap_or_else(|| pid.to_string());
        Some((plugin_instance(target.name(), Some(&instance)), false))
    }

    /// Stop every sampler, returning the loop counters and drained histories
    pub async fn shutdown(&mut self) -> RunSummary {
        let histories: BTreeMap<Pid, HistorySummary> = self
            .watcher
            .stop()
            .await
            .into_iter()
            .map(|(pid, points)| (pid, HistorySummary::from_points(&points)))
            .collect();
        for (pid, summary) in &histories {
            log_history(*pid, summary);
        }

        let snapshot = self.metrics.snapshot();
        info!(
            ticks = snapshot.ticks,
            rescans = snapshot.rescans,
            scan_failures = snapshot.scan_failures,
            reports = snapshot.reports_emitted,
            sample_failures = snapshot.sample_failures,
            "collection stopped"
        );

        RunSummary {
            metrics: snapshot,
            histories,
        }
    }

    /// Bootstrap, then tick until halted or `shutdown` resolves
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> RunSummary {
        info!(
            interval_secs = self.interval_secs(),
            autotrack = self.settings.autotrack,
            "collection started"
        );
        self.bootstrap().await;

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; ticks start one interval later
        ticker.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    if self.tick().await == TickOutcome::Halted {
                        break;
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Bootstrap and run exactly one tick
    pub async fn run_once(mut self) -> (TickOutcome, RunSummary) {
        self.bootstrap().await;
        let outcome = self.tick().await;
        (outcome, self.shutdown().await)
    }
}
