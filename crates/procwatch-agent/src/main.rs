//! procwatch - process discovery and sampling daemon
//!
//! Finds processes by argv pattern and prints their resource usage as
//! collectd exec plugin `PUTVAL` lines on stdout. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use procwatch_agent::config::{Config, Interval, ENV_LOG_LEVEL};
use procwatch_agent::observability::init_logging;
use procwatch_agent::{
    CgroupPodResolver, LoopSettings, ProcfsScanner, ReconciliationLoop, ReportSink,
    SysinfoStatsProvider, TargetRegistry, TickOutcome, Watcher,
};

/// Command line options
#[derive(Debug, Clone, Default, PartialEq)]
struct CliArgs {
    config: Option<PathBuf>,
    interval: Option<String>,
    no_autotrack: bool,
    once: bool,
    gen_config: bool,
    help: bool,
}

impl CliArgs {
    fn parse(args: &[String]) -> Result<Self> {
        let mut cli = Self::default();
        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--config" | "-c" => {
                    let Some(path) = args.get(i + 1) else {
                        bail!("{} requires a file argument", args[i]);
                    };
                    cli.config = Some(PathBuf::from(path));
                    i += 1;
                }
                "--no-autotrack" => {
                    cli.no_autotrack = true;
                }
                "--once" => {
                    cli.once = true;
                }
                "--gen-config" => {
                    cli.gen_config = true;
                }
                "--help" | "-h" => {
                    cli.help = true;
                }
                arg if arg.starts_with('-') => bail!("Unknown option: {}", arg),
                arg => {
                    if cli.interval.is_some() {
                        bail!("Unexpected argument: {}", arg);
                    }
                    cli.interval = Some(arg.to_string());
                }
            }
            i += 1;
        }
        Ok(cli)
    }
}

fn print_help() {
    println!("procwatch - watch processes by argv and report their resource usage");
    println!();
    println!("USAGE:");
    println!("    procwatch [OPTIONS] [INTERVAL]");
    println!();
    println!("ARGS:");
    println!("    [INTERVAL]                  Seconds between collections");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>         Path to config file (TOML)");
    println!("    --no-autotrack              Stop instead of rescanning when pids go stale");
    println!("    --once                      Collect once and exit");
    println!("    --gen-config                Generate example config and exit");
    println!("    -h, --help                  Print this help message");
    println!();
    println!("CONFIG SEARCH ORDER:");
    println!("    $PROCWATCH_CONFIG_DIR/procwatch.toml, /etc/procwatch.toml,");
    println!("    ./procwatch.toml, user config directory");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    PROCWATCH_CONFIG_DIR    Directory searched first for procwatch.toml");
    println!("    PROCWATCH_UPDATE_EVERY  Collection interval in seconds");
    println!("    PROCWATCH_HOSTNAME      Host name used in reports");
    println!("    COLLECTD_HOSTNAME       Host name fallback");
    println!("    PROCWATCH_AUTOTRACK     Rescan on stale pids (true/false)");
    println!("    PROCWATCH_LOG_LEVEL     Log level (trace, debug, info, warn, error)");
    println!();
    println!("EXAMPLES:");
    println!("    procwatch 10                        # Collect every 10 seconds");
    println!("    procwatch -c ./procwatch.toml --once");
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = CliArgs::parse(&args)?;

    if cli.help {
        print_help();
        return Ok(());
    }

    if cli.gen_config {
        println!("{}", Config::example_toml());
        return Ok(());
    }

    let log_level = env_var(ENV_LOG_LEVEL).unwrap_or_else(|| "info".to_string());
    init_logging(&log_level);

    let (mut config, path) = Config::load(cli.config.as_deref(), env_var)?;
    match &path {
        Some(path) => info!("Using configuration file {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }
    config.apply_env(env_var)?;
    if cli.no_autotrack {
        config.autotrack = false;
    }
    config.resolve_executables(env_var)?;

    let targets = config
        .compile_targets()
        .context("Invalid target configuration")?;
    let interval = Interval::gather(&config, cli.interval.as_deref(), env_var)?.pick();
    let hostname = config.resolve_hostname(env_var);

    info!(
        hostname = %hostname,
        interval_secs = interval.as_secs(),
        targets = targets.len(),
        "Starting procwatch"
    );

    let scanner = Arc::new(ProcfsScanner::new());
    let watcher = Watcher::new(Arc::new(SysinfoStatsProvider::new()), config.sampler_config());
    let settings = LoopSettings {
        interval,
        autotrack: config.autotrack,
        hostname,
    };

    let mut reconciler = ReconciliationLoop::new(
        TargetRegistry::new(targets),
        scanner,
        watcher,
        ReportSink::stdout(),
        settings,
    );
    if config.resolve_pods {
        reconciler = reconciler.with_resolver(Arc::new(CgroupPodResolver::new()));
    }

    if cli.once {
        let (outcome, _) = reconciler.run_once().await;
        if outcome == TickOutcome::Halted {
            bail!("stale pid(s) with autotrack disabled");
        }
        return Ok(());
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };
    reconciler.run(shutdown).await;

    Ok(())
}
