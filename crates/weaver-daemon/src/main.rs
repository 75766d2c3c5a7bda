//! `weaverd`, the Weaver engine daemon.
//!
//! Thin wiring over [`weaver_daemon::Daemon`]: parse flags, load layered
//! configuration, initialize observability, run until interrupted.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use weaver_config::{ConfigOverrides, WeaverConfig};
use weaver_daemon::Daemon;

#[derive(Debug, Parser)]
#[command(name = "weaverd", about = "Knowledge-graph weaver for markdown vaults")]
struct Args {
    /// Vault root to watch. Falls back to WEAVER_VAULT_PATH.
    #[arg(long)]
    vault: Option<PathBuf>,

    /// Log filter, e.g. `info` or `weaver_rules=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Disable the workflow runtime for this process.
    #[arg(long)]
    no_workflows: bool,

    /// Print the effective configuration (secrets masked) and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let overrides = ConfigOverrides {
        vault_path: args.vault.clone(),
        log_level: args.log_level.clone(),
        llm_api_key: None,
        workflows_enabled: args.no_workflows.then_some(false),
    };
    let config = match WeaverConfig::load(args.vault, overrides) {
        Ok(config) => config,
        Err(e) => {
            // CONFIG_INVALID is fatal at startup, before logging exists.
            eprintln!("weaverd: configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.print_config {
        match config.display_as_toml() {
            Ok(rendered) => {
                println!("{rendered}");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("weaverd: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let _log_guard = match weaver_observe::init_tracing(
        &config.logging.level,
        &config.log_dir(),
        config.logging.retention_days,
    ) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("weaverd: {e}");
            return ExitCode::FAILURE;
        }
    };

    let daemon = match Daemon::start(config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %format!("{e:#}"), "startup failed");
            return ExitCode::FAILURE;
        }
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }
    daemon.shutdown().await;
    ExitCode::SUCCESS
}
