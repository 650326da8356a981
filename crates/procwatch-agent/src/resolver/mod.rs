//! Container identification from cgroup membership
//!
//! `CgroupPodResolver` maps PIDs to the container that runs them by reading
//! /proc/<pid>/cgroup. Handles the layouts produced by the common runtimes:
//!
//! - systemd driver: `.../cri-containerd-<id>.scope`, `.../crio-<id>.scope`,
//!   `.../docker-<id>.scope`
//! - cgroupfs driver: `/docker/<id>`, `/kubepods/<qos>/pod<uid>/<id>`
//!
//! Only the cgroup path is inspected; no container runtime is contacted.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use procwatch_common::{Pid, PodResolver, ResolverError, ResolverResult};
use tracing::debug;

use crate::scanner::DEFAULT_PROC_ROOT;

/// Length of the short container ID reported
pub const SHORT_ID_LEN: usize = 12;

/// Minimum length for a path segment to be taken as a container ID
const MIN_ID_LEN: usize = 32;

const SCOPE_PREFIXES: &[&str] = &["cri-containerd-", "crio-", "docker-"];

fn is_container_id(s: &str) -> bool {
    s.len() >= MIN_ID_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn short_id(id: &str) -> String {
    id[..SHORT_ID_LEN.min(id.len())].to_string()
}

/// Extract a container ID from one cgroup path
fn container_id_from_path(path: &str) -> Option<&str> {
    let mut in_container_tree = false;

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if let Some(scope) = segment.strip_suffix(".scope") {
            for prefix in SCOPE_PREFIXES {
                if let Some(id) = scope.strip_prefix(prefix) {
                    if is_container_id(id) {
                        return Some(id);
                    }
                }
            }
        }

        if segment == "docker" || segment.starts_with("kubepods") {
            in_container_tree = true;
        } else if in_container_tree && is_container_id(segment) {
            return Some(segment);
        }
    }

    None
}

/// Parse the content of /proc/<pid>/cgroup into a short container ID
///
/// Lines are `hierarchy-id:controllers:path`, v1 and v2 alike.
pub fn parse_cgroup(content: &str) -> Option<String> {
    content
        .lines()
        .filter_map(|line| line.splitn(3, ':').nth(2))
        .find_map(container_id_from_path)
        .map(short_id)
}

/// PID to container resolver over procfs
pub struct CgroupPodResolver {
    root: PathBuf,
    cache: RwLock<HashMap<Pid, String>>,
}

impl CgroupPodResolver {
    pub fn new() -> Self {
        Self::with_root(DEFAULT_PROC_ROOT)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Number of PIDs with a known container
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    fn build_cache(&self) -> ResolverResult<HashMap<Pid, String>> {
        let proc_dir = fs::read_dir(&self.root).map_err(|e| {
            ResolverError::Unavailable(format!("Failed to read {}: {}", self.root.display(), e))
        })?;

        let mut cache = HashMap::new();
        for entry in proc_dir.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<Pid>().ok()) else {
                continue;
            };

            // Process may have exited since readdir
            let Ok(content) = fs::read_to_string(entry.path().join("cgroup")) else {
                continue;
            };

            if let Some(id) = parse_cgroup(&content) {
                cache.insert(pid, id);
            }
        }

        Ok(cache)
    }
}

impl Default for CgroupPodResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PodResolver for CgroupPodResolver {
    async fn refresh(&self) -> ResolverResult<()> {
        let cache = self.build_cache()?;
        debug!(containers = cache.len(), "Refreshed cgroup container cache");
        *self.cache.write() = cache;
        Ok(())
    }

    fn find_pod_by_pid(&self, pid: Pid) -> ResolverResult<String> {
        self.cache
            .read()
            .get(&pid)
            .cloned()
            .ok_or(ResolverError::NotFound(pid))
    }
}
