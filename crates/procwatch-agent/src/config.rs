//! Agent configuration
//!
//! TOML file, environment overrides and interval selection.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use procwatch_common::{MatchError, Target, TargetSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sampler::{SamplerConfig, DEFAULT_MAILBOX_SIZE};
use crate::scanner::{which, ExeError};

/// Config file name looked up in every search directory
pub const CONFIG_FILE: &str = "procwatch.toml";

/// Default cap on per-process history points
pub const DEFAULT_HISTORY_LIMIT: usize = 600;

pub const ENV_CONFIG_DIR: &str = "PROCWATCH_CONFIG_DIR";
pub const ENV_UPDATE_EVERY: &str = "PROCWATCH_UPDATE_EVERY";
pub const ENV_HOSTNAME: &str = "PROCWATCH_HOSTNAME";
pub const ENV_COLLECTD_HOSTNAME: &str = "COLLECTD_HOSTNAME";
pub const ENV_LOG_LEVEL: &str = "PROCWATCH_LOG_LEVEL";
pub const ENV_AUTOTRACK: &str = "PROCWATCH_AUTOTRACK";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("No targets configured")]
    NoTargets,

    #[error("Target executable {exe:?}: {source}")]
    Executable { exe: String, source: ExeError },

    #[error(transparent)]
    Target(#[from] MatchError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Reconciliation interval in seconds
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,

    /// Rescan on stale identities instead of stopping
    #[serde(default = "default_true")]
    pub autotrack: bool,

    /// Host name used in reports
    #[serde(default)]
    pub hostname: Option<String>,

    /// Autonomous history sampling period, 0 disables it
    #[serde(default)]
    pub history_interval_ms: u64,

    /// Most history points kept per process
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Sampler mailbox capacity
    #[serde(default = "default_mailbox_size")]
    pub mailbox_size: usize,

    /// Tag per-process reports with the container ID when known
    #[serde(default)]
    pub resolve_pods: bool,

    #[serde(default)]
    pub targets: Vec<Target>,
}

fn default_interval() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_mailbox_size() -> usize {
    DEFAULT_MAILBOX_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            autotrack: true,
            hostname: None,
            history_interval_ms: 0,
            history_limit: DEFAULT_HISTORY_LIMIT,
            mailbox_size: DEFAULT_MAILBOX_SIZE,
            resolve_pods: false,
            targets: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration from a TOML string
    pub fn from_str(contents: &str) -> ConfigResult<Self> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Candidate config files, in lookup order
    pub fn search_paths(config_dir: Option<&str>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = config_dir.filter(|d| !d.is_empty()) {
            paths.push(Path::new(dir).join(CONFIG_FILE));
        }
        paths.push(Path::new("/etc").join(CONFIG_FILE));
        paths.push(Path::new(".").join(CONFIG_FILE));
        if let Some(dirs) = ProjectDirs::from("io", "procwatch", "procwatch") {
            paths.push(dirs.config_dir().join(CONFIG_FILE));
        }
        paths
    }

    /// Load the explicit file, or the first config found on the search path
    ///
    /// Returns the path that was used, `None` if running on defaults.
    pub fn load(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        let config_dir = env(ENV_CONFIG_DIR);
        for path in Self::search_paths(config_dir.as_deref()) {
            if path.is_file() {
                return Ok((Self::from_file(&path)?, Some(path)));
            }
        }

        Ok((Self::default(), None))
    }

    /// Apply environment overrides that replace file values
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(value) = env(ENV_AUTOTRACK) {
            self.autotrack = parse_bool(&value).ok_or(ConfigError::InvalidEnv {
                var: ENV_AUTOTRACK,
                value,
            })?;
        }

        if let Some(host) = env(ENV_HOSTNAME).filter(|h| !h.is_empty()) {
            self.hostname = Some(host);
        }

        Ok(())
    }

    /// Resolve `exe` targets through `PATH`
    ///
    /// The absolute path is prepended to the target's argv patterns.
    pub fn resolve_executables(&mut self, env: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        for target in &mut self.targets {
            let Some(exe) = target.exe.take() else {
                continue;
            };
            let path = which(&exe, &env).map_err(|source| ConfigError::Executable {
                exe: exe.clone(),
                source,
            })?;
            target.argv.insert(0, path.to_string_lossy().into_owned());
        }
        Ok(())
    }

    /// Validate and compile the target declarations
    pub fn compile_targets(&self) -> ConfigResult<TargetSet> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        Ok(TargetSet::compile(self.targets.clone())?)
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            mailbox_size: self.mailbox_size.max(1),
            history_interval: (self.history_interval_ms > 0)
                .then(|| Duration::from_millis(self.history_interval_ms)),
            history_limit: Some(self.history_limit.max(1)),
        }
    }

    /// Host name for reports: config/`PROCWATCH_HOSTNAME`, then
    /// `COLLECTD_HOSTNAME`, then the OS host name
    pub fn resolve_hostname(&self, env: impl Fn(&str) -> Option<String>) -> String {
        self.hostname
            .clone()
            .filter(|h| !h.is_empty())
            .or_else(|| env(ENV_COLLECTD_HOSTNAME).filter(|h| !h.is_empty()))
            .or_else(|| {
                hostname::get()
                    .ok()
                    .map(|h| h.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Generate example TOML config
    pub fn example_toml() -> &'static str {
        r##"# procwatch configuration
# =======================

# Seconds between reconciliation ticks. The effective interval is the
# largest of this value, the command line and PROCWATCH_UPDATE_EVERY.
interval_seconds = 10

# Rescan the process table when a tracked pid goes stale.
# When false, the first stale tick stops collection.
autotrack = true

# Host name used in reports (default: COLLECTD_HOSTNAME, then the OS host name)
# hostname = "node1"

# Autonomous history sampling period in milliseconds, 0 disables it.
# Each process keeps at most history_limit points; a summary is logged when
# the process exits or collection stops.
history_interval_ms = 0
history_limit = 600

# Per-process sampler mailbox capacity
mailbox_size = 16

# Tag per-process reports with the container id read from cgroups
resolve_pods = false

# ============================================================================
# Targets
# ============================================================================
# argv is compared element by element against each process's argv. The
# shorter of the two drives the comparison; its elements are glob patterns.
# `*` never matches `/`.

[[targets]]
name = "app"
argv = ["sh", "app.sh"]
stable_identity = false

# name defaults to the basename of argv[0]
# [[targets]]
# argv = ["/usr/sbin/nginx", "-g", "*"]
# stable_identity = true

# exe is looked up through PATH at startup and becomes the first argv pattern
# [[targets]]
# exe = "redis-server"
# argv = ["*:6379"]
"##
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Interval candidates from every source
///
/// The effective interval is the largest candidate and never less than one
/// second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub cmdline: Option<Duration>,
    pub environ: Option<Duration>,
    pub config: Option<Duration>,
}

impl Interval {
    pub const MIN: Duration = Duration::from_secs(1);

    /// Gather candidates; zero or unparseable values are rejected
    pub fn gather(
        config: &Config,
        cmdline: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<Self> {
        if config.interval_seconds == 0 {
            return Err(ConfigError::InvalidInterval(
                "interval_seconds must be positive".to_string(),
            ));
        }

        Ok(Self {
            cmdline: cmdline.map(parse_seconds).transpose()?,
            environ: env(ENV_UPDATE_EVERY)
                .filter(|v| !v.is_empty())
                .map(|v| parse_seconds(&v))
                .transpose()?,
            config: Some(Duration::from_secs(config.interval_seconds)),
        })
    }

    pub fn pick(&self) -> Duration {
        [self.cmdline, self.environ, self.config]
            .into_iter()
            .flatten()
            .fold(Self::MIN, Duration::max)
    }
}

fn parse_seconds(value: &str) -> ConfigResult<Duration> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidInterval(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn no_env() -> impl Fn(&str) -> Option<String> {
        env_from(&[])
    }

    #[test]
    fn test_example_config_parses_and_validates() {
        let config = Config::from_str(Config::example_toml()).unwrap();
        assert_eq!(config.interval_seconds, 10);
        assert!(config.autotrack);
        assert_eq!(config.mailbox_size, 16);

        let targets = config.compile_targets().unwrap();
        assert_eq!(targets.len(), 1);
        assert!(!targets.get("app").unwrap().stable_identity());
    }

    #[test]
    fn test_defaults_for_missing_keys() {
        let config = Config::from_str("[[targets]]\nargv = [\"/usr/bin/redis-server\", \"*\"]\n").unwrap();
        assert_eq!(config.interval_seconds, 1);
        assert!(config.autotrack);
        assert!(!config.resolve_pods);
        assert_eq!(config.sampler_config().history_interval, None);

        let targets = config.compile_targets().unwrap();
        assert!(targets.get("redis-server").is_some());
    }

    #[test]
    fn test_validation_errors() {
        let empty = Config::default();
        assert!(matches!(empty.compile_targets(), Err(ConfigError::NoTargets)));

        let bad_glob = Config::from_str("[[targets]]\nname = \"x\"\nargv = [\"[sh\"]\n").unwrap();
        assert!(matches!(
            bad_glob.compile_targets(),
            Err(ConfigError::Target(MatchError::PatternSyntax { .. }))
        ));

        let empty_argv = Config::from_str("[[targets]]\nname = \"x\"\nargv = []\n").unwrap();
        assert!(matches!(
            empty_argv.compile_targets(),
            Err(ConfigError::Target(MatchError::EmptyPattern(_)))
        ));

        let dup = Config::from_str(
            "[[targets]]\nname = \"a\"\nargv = [\"x\"]\n[[targets]]\nname = \"a\"\nargv = [\"y\"]\n",
        )
        .unwrap();
        assert!(matches!(
            dup.compile_targets(),
            Err(ConfigError::Target(MatchError::DuplicateTarget(_)))
        ));
    }

    #[test]
    fn test_parse_error_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(&path, "interval_seconds = \"soon\"").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn test_load_from_config_dir_env() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "interval_seconds = 3\n[[targets]]\nargv = [\"sleep\"]\n",
        )
        .unwrap();
        let dir = tmp.path().to_string_lossy().to_string();

        let (config, used) = Config::load(None, env_from(&[(ENV_CONFIG_DIR, &dir)])).unwrap();
        assert_eq!(config.interval_seconds, 3);
        assert_eq!(used, Some(tmp.path().join(CONFIG_FILE)));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope.toml");
        assert!(matches!(
            Config::load(Some(&missing), no_env()),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_search_path_order() {
        let paths = Config::search_paths(Some("/opt/pw"));
        assert_eq!(paths[0], PathBuf::from("/opt/pw/procwatch.toml"));
        assert_eq!(paths[1], PathBuf::from("/etc/procwatch.toml"));
        assert_eq!(paths[2], PathBuf::from("./procwatch.toml"));

        let without = Config::search_paths(Some(""));
        assert_eq!(without[0], PathBuf::from("/etc/procwatch.toml"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env_from(&[(ENV_AUTOTRACK, "false"), (ENV_HOSTNAME, "edge-7")]))
            .unwrap();
        assert!(!config.autotrack);
        assert_eq!(config.resolve_hostname(no_env()), "edge-7");

        let err = config.apply_env(env_from(&[(ENV_AUTOTRACK, "maybe")]));
        assert!(matches!(err, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_hostname_falls_back_to_collectd_env() {
        let config = Config::default();
        assert_eq!(
            config.resolve_hostname(env_from(&[(ENV_COLLECTD_HOSTNAME, "collectd-host")])),
            "collectd-host"
        );
        assert!(!config.resolve_hostname(no_env()).is_empty());
    }

    #[test]
    fn test_interval_pick_takes_largest() {
        let config = Config {
            interval_seconds: 5,
            ..Config::default()
        };

        let only_config = Interval::gather(&config, None, no_env()).unwrap();
        assert_eq!(only_config.pick(), Duration::from_secs(5));

        let cmdline = Interval::gather(&config, Some("8"), no_env()).unwrap();
        assert_eq!(cmdline.pick(), Duration::from_secs(8));

        let environ = Interval::gather(&config, Some("2"), env_from(&[(ENV_UPDATE_EVERY, "30")])).unwrap();
        assert_eq!(environ.pick(), Duration::from_secs(30));
    }

    #[test]
    fn test_interval_never_below_one_second() {
        let interval = Interval {
            cmdline: None,
            environ: None,
            config: None,
        };
        assert_eq!(interval.pick(), Interval::MIN);
    }

    #[test]
    fn test_invalid_intervals() {
        let config = Config::default();
        assert!(Interval::gather(&config, Some("0"), no_env()).is_err());
        assert!(Interval::gather(&config, Some("soon"), no_env()).is_err());
        assert!(Interval::gather(&config, None, env_from(&[(ENV_UPDATE_EVERY, "-3")])).is_err());

        let zero = Config {
            interval_seconds: 0,
            ..Config::default()
        };
        assert!(matches!(
            Interval::gather(&zero, None, no_env()),
            Err(ConfigError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_history_interval_enables_periodic_sampling() {
        let config = Config {
            history_interval_ms: 250,
            mailbox_size: 0,
            ..Config::default()
        };
        let sampler = config.sampler_config();
        assert_eq!(sampler.history_interval, Some(Duration::from_millis(250)));
        assert_eq!(sampler.history_limit, Some(DEFAULT_HISTORY_LIMIT));
        assert_eq!(sampler.mailbox_size, 1);

        let unbounded = Config {
            history_limit: 0,
            ..Config::default()
        };
        assert_eq!(unbounded.sampler_config().history_limit, Some(1));
    }

    #[cfg(unix)]
    #[test]
    fn test_exe_target_resolved_through_path() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let exe = bin.path().join("redis-server");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
        let path_list = bin.path().to_string_lossy().to_string();

        let mut config = Config::from_str("[[targets]]\nexe = \"redis-server\"\nargv = [\"*:6379\"]\n").unwrap();
        config.resolve_executables(env_from(&[("PATH", &path_list)])).unwrap();

        let target = &config.targets[0];
        assert_eq!(target.argv, vec![exe.to_string_lossy().to_string(), "*:6379".to_string()]);
        assert!(target.exe.is_none());

        let targets = config.compile_targets().unwrap();
        let compiled = targets.get("redis-server").unwrap();
        assert!(compiled.matches(&[exe.to_string_lossy().to_string(), "*:6379".to_string()]).unwrap());
        assert!(!compiled.matches(&["/usr/bin/redis-server".to_string()]).unwrap());
    }

    #[test]
    fn test_missing_exe_is_config_error() {
        let mut config = Config::from_str("[[targets]]\nexe = \"no-such-daemon\"\nargv = []\n").unwrap();
        let err = config
            .resolve_executables(env_from(&[("PATH", "/nonexistent-dir")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Executable {
                source: ExeError::NotFound(_),
                ..
            }
        ));
    }
}
