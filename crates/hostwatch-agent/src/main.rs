// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The hostwatch agent binary.

use clap::{Parser, Subcommand};
use tracing::{error, info};

use hostwatch_agent::{lifecycle, logging, supervisor, updater};
use hostwatch_core::config::AgentConfig;
use hostwatch_core::error::Error;
use hostwatch_core::{lock, paths};

#[derive(Parser)]
#[command(name = "hostwatch", version = hostwatch_core::VERSION, about = "Hostwatch agent CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the agent with an optional credential and run discovery
    Init {
        credential: Option<String>,
        /// Don't communicate with the API
        #[arg(long)]
        dry_run: bool,
    },
    /// Start metrics and logs collection
    Start {
        /// Run a short collection cycle with output redirected to stdout
        #[arg(long)]
        dry_run: bool,
    },
    /// Check whether the agent is already running
    Status,
    /// Show or set configuration values (key=value)
    Config { pairs: Vec<String> },
    /// Self-update the agent binary
    Update,
    /// Display the agent version
    Version,
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Init { credential, dry_run } => {
            run_init(credential.as_deref().unwrap_or(""), dry_run).await
        }
        Commands::Start { dry_run } => run_start(dry_run).await,
        Commands::Status => run_status(),
        Commands::Config { pairs } => run_config(&pairs),
        Commands::Update => run_update().await,
        Commands::Version => {
            println!("hostwatch agent v{}", hostwatch_core::VERSION);
            0
        }
    };
    std::process::exit(code);
}

async fn run_init(credential: &str, dry_run: bool) -> i32 {
    let install_dir = match paths::install_dir() {
        Ok(dir) => dir,
        Err(e) => {
            error!(error = %e, "cannot determine install directory");
            return 1;
        }
    };
    match lifecycle::run_init(&install_dir, credential, dry_run).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "initialization failed");
            1
        }
    }
}

async fn run_start(dry_run: bool) -> i32 {
    info!("starting agent");
    let install_dir = match paths::install_dir() {
        Ok(dir) => dir,
        Err(e) => {
            error!(error = %e, "cannot determine install directory");
            return 1;
        }
    };

    match lock::acquire(&install_dir) {
        Ok(()) => {}
        Err(Error::AlreadyRunning) => {
            // Silent success keeps repeated service starts idempotent.
            info!("another instance of the agent is already running, exiting");
            return 0;
        }
        Err(e) => {
            error!(error = %e, "failed to acquire process lock");
            return 1;
        }
    }

    let code = supervisor::Agent::new(install_dir.clone(), dry_run).run().await;
    lock::release(&install_dir);
    code
}

fn run_status() -> i32 {
    const GREEN: &str = "\x1b[32m";
    const RED: &str = "\x1b[31m";
    const RESET: &str = "\x1b[0m";

    let install_dir = match paths::install_dir() {
        Ok(dir) => dir,
        Err(e) => {
            println!("Error checking agent status: {e}");
            return 1;
        }
    };

    match lock::is_held(&install_dir) {
        Ok(true) => println!("{GREEN}[ok]{RESET} hostwatch is running."),
        Ok(false) => println!("{RED}[--]{RESET} hostwatch is not running."),
        Err(e) => {
            println!("Error checking agent status: {e}");
            return 1;
        }
    }
    0
}

fn run_config(pairs: &[String]) -> i32 {
    let install_dir = match paths::install_dir() {
        Ok(dir) => dir,
        Err(e) => {
            error!(error = %e, "cannot determine install directory");
            return 1;
        }
    };

    if pairs.is_empty() {
        let cfg = AgentConfig::load(&install_dir).unwrap_or_else(|_| {
            println!("No existing config found, showing defaults:");
            AgentConfig::default()
        });
        println!("Current configuration:");
        println!("  api_key = {}", cfg.api_key);
        println!("  api_url = {}", cfg.api_url);
        return 0;
    }

    let mut cfg = AgentConfig::load(&install_dir).unwrap_or_default();
    let mut failed = false;
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            println!("Invalid format: {pair}. Use key=value");
            failed = true;
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "api_key" => cfg.set_api_key(value.trim()),
            "api_url" => cfg.set_api_url(value.trim()),
            other => {
                println!("Unknown config key: {other}");
                failed = true;
                continue;
            }
        }
        println!("Set {} = {}", key.trim(), value.trim());
    }

    if let Err(e) = cfg.save(&install_dir) {
        error!(error = %e, "failed to save config");
        return 1;
    }
    if failed {
        1
    } else {
        0
    }
}

async fn run_update() -> i32 {
    match updater::run().await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "update failed");
            1
        }
    }
}
