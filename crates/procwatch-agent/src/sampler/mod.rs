//! Per-process sampler workers
//!
//! Every tracked PID gets its own task that owns the PID's sample history.
//! The task is driven through a command channel and answers on a result
//! channel:
//!
//! - `SampleCommand::Async` takes a sample and appends it to the history
//! - `SampleCommand::Sync` takes a sample and sends it back alone, without
//!   touching the history
//!
//! Closing the command channel drains the worker: it sends the whole history
//! once, closes the result channel and exits.
//!
//! A worker may also sample on its own timer. Its history is then capped at
//! `SamplerConfig::history_limit` points, the oldest going first.

mod sysinfo_stats;

pub use sysinfo_stats::SysinfoStatsProvider;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use procwatch_common::{
    Pid, ProcessStatsProvider, StatsResult, TrackError, TrackResult, WatchPoint,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};


/// Default capacity of a sampler's command mailbox
pub const DEFAULT_MAILBOX_SIZE: usize = 16;

/// Command accepted by a sampler worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleCommand {
    /// Sample and append to history, no reply
    Async,
    /// Sample and reply with that single point, history untouched
    Sync,
}

/// Message sent back by a sampler worker
#[derive(Debug)]
pub enum SamplerOutput {
    /// Reply to `SampleCommand::Sync`
    Point(StatsResult<WatchPoint>),
    /// Full history, sent once when the worker drains
    History(Vec<WatchPoint>),
}

/// Sampler tuning
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Bounded mailbox size for commands and results
    pub mailbox_size: usize,
    /// Autonomous sampling period; `None` samples only on command
    pub history_interval: Option<Duration>,
    /// Most points kept per worker; `None` keeps every point
    pub history_limit: Option<usize>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            mailbox_size: DEFAULT_MAILBOX_SIZE,
            history_interval: None,
            history_limit: None,
        }
    }
}

/// Condensed view of a drained history
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySummary {
    pub samples: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub mean_cpu: f64,
    pub peak_cpu: f64,
    pub peak_resident_kb: u64,
    pub peak_threads: u32,
}

impl HistorySummary {
    pub fn from_points(points: &[WatchPoint]) -> Self {
        let samples = points.len();
        let total_cpu: f64 = points.iter().map(|p| p.cpu_total).sum();
        Self {
            samples,
            first: points.iter().map(|p| p.timestamp).min(),
            last: points.iter().map(|p| p.timestamp).max(),
            mean_cpu: if samples == 0 { 0.0 } else { total_cpu / samples as f64 },
            peak_cpu: points.iter().map(|p| p.cpu_total).fold(0.0, f64::max),
            peak_resident_kb: points.iter().map(|p| p.memory_resident_kb).max().unwrap_or(0),
            peak_threads: points.iter().map(|p| p.thread_count).max().unwrap_or(0),
        }
    }
}

fn take_sample(provider: &dyn ProcessStatsProvider, pid: Pid) -> StatsResult<WatchPoint> {
    provider.sample(pid).map(|stats| WatchPoint::from_stats(&stats))
}

async fn run_sampler(
    pid: Pid,
    provider: Arc<dyn ProcessStatsProvider>,
    mut cmd_rx: mpsc::Receiver<SampleCommand>,
    res_tx: mpsc::Sender<SamplerOutput>,
    history_interval: Option<Duration>,
    history_limit: Option<usize>,
) {
    let mut history = VecDeque::new();
    let mut ticker = history_interval.map(|period| {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });

    debug!(pid, "Sampler started");

    loop {
        let cmd = match ticker.as_mut() {
            Some(ticker) => tokio::select! {
                biased;
                cmd = cmd_rx.recv() => cmd,
                _ = ticker.tick() => Some(SampleCommand::Async),
            },
            None => cmd_rx.recv().await,
        };

        let Some(cmd) = cmd else {
            break;
        };

        match cmd {
            SampleCommand::Async => match take_sample(provider.as_ref(), pid) {
                Ok(point) => {
                    if history_limit.is_some_and(|limit| history.len() >= limit) {
                        history.pop_front();
                    }
                    history.push_back(point);
                }
                // A missed sample never stops the worker
                Err(e) => warn!(pid, "Skipping sample: {}", e),
            },
            SampleCommand::Sync => {
                let point = take_sample(provider.as_ref(), pid);
                if res_tx.send(SamplerOutput::Point(point)).await.is_err() {
                    debug!(pid, "Result channel closed, sampler exiting");
                    return;
                }
            }
        }
    }

    debug!(pid, samples = history.len(), "Sampler draining");
    let _ = res_tx.send(SamplerOutput::History(history.into())).await;
}

/// Handle to one running sampler worker
pub struct SamplerHandle {
    pid: Pid,
    cmd_tx: mpsc::Sender<SampleCommand>,
    res_rx: mpsc::Receiver<SamplerOutput>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Spawn a worker for `pid` on the current tokio runtime
    pub fn spawn(pid: Pid, provider: Arc<dyn ProcessStatsProvider>, config: &SamplerConfig) -> Self {
        let capacity = config.mailbox_size.max(1);
        let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
        let (res_tx, res_rx) = mpsc::channel(capacity);
        let task = tokio::spawn(run_sampler(
            pid,
            provider,
            cmd_rx,
            res_tx,
            config.history_interval,
            config.history_limit.map(|limit| limit.max(1)),
        ));

        Self {
            pid,
            cmd_tx,
            res_rx,
            task,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    async fn send(&self, cmd: SampleCommand) -> TrackResult<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| TrackError::Terminated(self.pid))
    }

    /// Queue a history sample
    pub async fn sample_async(&self) -> TrackResult<()> {
        self.send(SampleCommand::Async).await
    }

    /// Queue a synchronous sample; collect it with `recv_point`
    pub async fn request_sync(&self) -> TrackResult<()> {
        self.send(SampleCommand::Sync).await
    }

    /// Wait for the reply to a previous `request_sync`
    pub async fn recv_point(&mut self) -> TrackResult<WatchPoint> {
        match self.res_rx.recv().await {
            Some(SamplerOutput::Point(point)) => Ok(point?),
            Some(SamplerOutput::History(_)) | None => Err(TrackError::Terminated(self.pid)),
        }
    }

    /// Take one fresh sample, bypassing the history
    pub async fn poll(&mut self) -> TrackResult<WatchPoint> {
        self.request_sync().await?;
        self.recv_point().await
    }

    /// Close the worker and take its history
    ///
    /// Consumes the handle, so the history can only be taken once.
    pub async fn finish(self) -> TrackResult<Vec<WatchPoint>> {
        let Self {
            pid,
            cmd_tx,
            mut res_rx,
            task,
        } = self;
        drop(cmd_tx);

        let mut history = None;
        while let Some(output) = res_rx.recv().await {
            match output {
                // Unclaimed sync replies
                SamplerOutput::Point(_) => continue,
                SamplerOutput::History(points) => history = Some(points),
            }
        }

        if let Err(e) = task.await {
            warn!(pid, "Sampler task failed: {}", e);
        }

        history.ok_or(TrackError::Terminated(pid))
    }
}

/// Owner of every sampler worker, keyed by PID
pub struct Watcher {
    provider: Arc<dyn ProcessStatsProvider>,
    config: SamplerConfig,
    procs: BTreeMap<Pid, SamplerHandle>,
}

impl Watcher {
    pub fn new(provider: Arc<dyn ProcessStatsProvider>, config: SamplerConfig) -> Self {
        Self {
            provider,
            config,
            procs: BTreeMap::new(),
        }
    }

    /// Whether a PID currently has a sampler
    pub fn is_tracked(&self, pid: Pid) -> bool {
        self.procs.contains_key(&pid)
    }

    /// Tracked PIDs in ascending order
    pub fn tracked(&self) -> impl Iterator<Item = Pid> + '_ {
        self.procs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Start sampling a process
    ///
    /// Must be called from within a tokio runtime.
    pub fn track(&mut self, pid: Pid) -> TrackResult<()> {
        if self.is_tracked(pid) {
            return Err(TrackError::AlreadyTracked(pid));
        }
        if !self.provider.exists(pid) {
            return Err(TrackError::ProcessNotFound(pid));
        }

        let handle = SamplerHandle::spawn(pid, self.provider.clone(), &self.config);
        self.procs.insert(pid, handle);
        debug!(pid, "Tracking process");
        Ok(())
    }

    /// Stop sampling a process and return every sample it collected
    pub async fn untrack(&mut self, pid: Pid) -> TrackResult<Vec<WatchPoint>> {
        let handle = self.procs.remove(&pid).ok_or(TrackError::NotTracked(pid))?;
        let history = handle.finish().await?;
        debug!(pid, samples = history.len(), "Untracked process");
        Ok(history)
    }

    /// Take one fresh sample without touching the history
    pub async fn poll(&mut self, pid: Pid) -> TrackResult<WatchPoint> {
        let handle = self.procs.get_mut(&pid).ok_or(TrackError::NotTracked(pid))?;
        handle.poll().await
    }

    /// Append one sample to a process's history
    pub async fn sample(&self, pid: Pid) -> TrackResult<()> {
        let handle = self.procs.get(&pid).ok_or(TrackError::NotTracked(pid))?;
        handle.sample_async().await
    }

    /// Append one sample to every history
    pub async fn sample_all(&self) {
        for (pid, handle) in &self.procs {
            if let Err(e) = handle.sample_async().await {
                warn!(pid, "Failed to queue sample: {}", e);
            }
        }
    }

    /// Take one fresh sample of every tracked process
    ///
    /// Every worker is asked first and the replies collected afterwards, so
    /// the processes are sampled concurrently.
    pub async fn poll_all(&mut self) -> Vec<(Pid, TrackResult<WatchPoint>)> {
        let mut requested = Vec::with_capacity(self.procs.len());
        let mut results = Vec::with_capacity(self.procs.len());

        for (pid, handle) in &self.procs {
            match handle.request_sync().await {
                Ok(()) => requested.push(*pid),
                Err(e) => results.push((*pid, Err(e))),
            }
        }

        for pid in requested {
            if let Some(handle) = self.procs.get_mut(&pid) {
                results.push((pid, handle.recv_point().await));
            }
        }

        results.sort_by_key(|(pid, _)| *pid);
        results
    }

    /// Untrack every process, returning all histories
    pub async fn stop(&mut self) -> BTreeMap<Pid, Vec<WatchPoint>> {
        let mut histories = BTreeMap::new();
        let procs = std::mem::take(&mut self.procs);

        for (pid, handle) in procs {
            match handle.finish().await {
                Ok(history) => {
                    histories.insert(pid, history);
                }
                Err(e) => warn!(pid, "Failed to drain sampler: {}", e),
            }
        }

        histories
    }
}
