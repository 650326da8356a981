//! Target discovery and identity validation
//!
//! `TargetRegistry` maps every configured target to the PIDs currently
//! believed to run it. `IdentityValidator` re-derives that belief from the
//! live argv on every tick, which is what catches PID reuse.

use std::collections::BTreeSet;

use procwatch_common::{CompiledTarget, Pid, ProcessTableScanner, ScanResult, TargetSet};
use tracing::{debug, info, warn};


/// Configured targets and the PIDs tracked for each
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: TargetSet,
    /// Index-aligned with `targets`
    tracked: Vec<BTreeSet<Pid>>,
}

impl TargetRegistry {
    /// Create a registry with nothing tracked yet
    pub fn new(targets: TargetSet) -> Self {
        let tracked = vec![BTreeSet::new(); targets.len()];
        Self { targets, tracked }
    }

    pub fn targets(&self) -> &TargetSet {
        &self.targets
    }

    /// Re-derive every tracked set from one pass over the process table
    ///
    /// The previous assignment is fully replaced. Each process goes to the
    /// first target, in declaration order, whose pattern matches it. On
    /// failure the previous assignment is kept untouched.
    pub fn scan(&mut self, scanner: &dyn ProcessTableScanner) -> ScanResult<usize> {
        let entries = scanner.scan()?;
        let mut tracked = vec![BTreeSet::new(); self.targets.len()];
        let mut matched = 0;

        for entry in &entries {
            for (idx, target) in self.targets.iter().enumerate() {
                match target.matches(&entry.argv) {
                    Ok(true) => {
                        tracked[idx].insert(entry.pid);
                        matched += 1;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(
                            pid = entry.pid,
                            target_name = target.name(),
                            "Skipping process with unmatchable argv: {}",
                            e
                        );
                    }
                }
            }
        }

        for (target, pids) in self.targets.iter().zip(&tracked) {
            info!(target_name = target.name(), "Scanned process table and found pid(s) {:?}", pids);
        }

        self.tracked = tracked;
        Ok(matched)
    }

    /// PIDs tracked for a target, by name
    pub fn tracked(&self, name: &str) -> Option<&BTreeSet<Pid>> {
        self.targets
            .iter()
            .position(|t| t.name() == name)
            .map(|idx| &self.tracked[idx])
    }

    /// Every target paired with its tracked set, in declaration order
    pub fn assignments(&self) -> impl Iterator<Item = (&CompiledTarget, &BTreeSet<Pid>)> {
        self.targets.iter().zip(&self.tracked)
    }

    /// Every tracked PID with the target that owns it
    pub fn tracked_pids(&self) -> impl Iterator<Item = (&CompiledTarget, Pid)> {
        self.assignments()
            .flat_map(|(target, pids)| pids.iter().map(move |pid| (target, *pid)))
    }

    /// Target a PID is assigned to, if any
    pub fn target_of(&self, pid: Pid) -> Option<&CompiledTarget> {
        self.assignments()
            .find(|(_, pids)| pids.contains(&pid))
            .map(|(target, _)| target)
    }

    /// Total number of tracked PIDs across all targets
    pub fn tracked_count(&self) -> usize {
        self.tracked.iter().map(BTreeSet::len).sum()
    }
}

/// Re-checks tracked PIDs against their live argv
pub struct IdentityValidator<'a> {
    scanner: &'a dyn ProcessTableScanner,
}

impl<'a> IdentityValidator<'a> {
    pub fn new(scanner: &'a dyn ProcessTableScanner) -> Self {
        Self { scanner }
    }

    /// Whether every PID in `tracked` still runs `target`
    ///
    /// An empty set is never current. A PID whose argv can't be read any more
    /// counts as a mismatch.
    pub fn is_current(&self, target: &CompiledTarget, tracked: &BTreeSet<Pid>) -> bool {
        if tracked.is_empty() {
            debug!(target_name = target.name(), "No tracked pids");
            return false;
        }

        tracked.iter().all(|&pid| {
            let Some(argv) = self.scanner.read_argv(pid) else {
                debug!(pid, target_name = target.name(), "Tracked pid is gone");
                return false;
            };

            match target.matches(&argv) {
                Ok(true) => true,
                Ok(false) => {
                    debug!(pid, target_name = target.name(), ?argv, "Tracked pid no longer matches");
                    false
                }
                Err(e) => {
                    debug!(pid, target_name = target.name(), "Tracked pid unmatchable: {}", e);
                    false
                }
            }
        })
    }

    /// Whether every configured target is current
    pub fn all_current(&self, registry: &TargetRegistry) -> bool {
        !registry.targets().is_empty()
            && registry
                .assignments()
                .all(|(target, pids)| self.is_current(target, pids))
    }
}
