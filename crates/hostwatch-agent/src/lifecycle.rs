// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The init lifecycle: persist the credential, upload host info, run
//! collector discovery and publish the results to the control plane. Runs
//! standalone for `hostwatch init` and again at the front of `start`.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};

use hostwatch_core::api::Client;
use hostwatch_core::authguard::AuthGuard;
use hostwatch_core::config::AgentConfig;
use hostwatch_core::error::Error;
use hostwatch_core::hostinfo;

pub async fn run_init(install_dir: &Path, credential: &str, dry_run: bool) -> Result<(), Error> {
    info!("initializing agent");
    if dry_run {
        info!("dry run mode enabled, no data will be sent to the API");
    }

    let cfg = AgentConfig::assemble(install_dir, credential);
    cfg.save(install_dir)?;
    info!("credential saved to configuration");

    let client = if dry_run {
        None
    } else {
        let (guard, _key_check_rx) = AuthGuard::new();
        Some(Client::new(&cfg, Arc::new(guard))?)
    };

    // Host info upload is best-effort.
    let info = hostinfo::gather();
    if let Some(client) = &client {
        debug!("sending host info");
        if let Err(e) = client.post_host_info(&info).await {
            error!(error = %e, "failed to send host info, not critical");
        }
    }

    info!("detecting available metrics");
    let mut metric_collectors = hostwatch_metrics::registry::build_collectors(None);
    let discovered_metrics = hostwatch_metrics::scheduler::discover_available(&mut metric_collectors);
    info!(count = discovered_metrics.len(), "metrics discovered");

    if discovered_metrics.is_empty() {
        info!("No metrics found.");
    } else if let Some(client) = &client {
        // Discovery uploads are the point of init; failure is fatal.
        client.post_available_metrics(&discovered_metrics).await?;
        info!("sent discovered metrics to the API");
    }

    info!("detecting available log sources");
    let log_collectors = hostwatch_logs::registry::build_collectors(install_dir, None);
    let discovered_sources = hostwatch_logs::discover_available(&log_collectors);
    info!(count = discovered_sources.len(), "log sources discovered");

    if discovered_sources.is_empty() {
        info!("No log source found.");
    } else if let Some(client) = &client {
        client.post_available_log_sources(&discovered_sources).await?;
        info!("sent discovered log sources to the API");
    }

    info!("agent initialization completed");
    Ok(())
}
