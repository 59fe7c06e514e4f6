// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The agent supervisor: a control-event state machine owning every child
//! activity. Each cycle fetches the collection config, starts the watchers,
//! flushers and collectors under a fresh cancellation scope, and then waits
//! for the next control event. On any event the scope is cancelled and all
//! children are joined before the event is acted on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hostwatch_core::api::Client;
use hostwatch_core::authguard::AuthGuard;
use hostwatch_core::collection::CollectionConfig;
use hostwatch_core::config::AgentConfig;
use hostwatch_core::error::Error;
use hostwatch_core::exporter::Exporter;
use hostwatch_core::lock;

use crate::config_watcher::ConfigWatcher;
use crate::restart_watcher::RestartWatcher;

pub const HIBERNATION: Duration = Duration::from_secs(60 * 60);
pub const DRY_RUN_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Shutdown,
    Reload,
    Restart,
    Hibernate,
}

/// Handles shared by the supervisor's children.
struct Services {
    config: AgentConfig,
    auth: Arc<AuthGuard>,
    client: Client,
}

pub struct Agent {
    install_dir: PathBuf,
    dry_run: bool,
}

impl Agent {
    pub fn new(install_dir: PathBuf, dry_run: bool) -> Self {
        Self {
            install_dir,
            dry_run,
        }
    }

    /// Runs the supervisor loop to completion and returns the process exit
    /// code. The caller holds the single-instance lock; every exit path
    /// here releases it first.
    pub async fn run(self) -> i32 {
        // The init lifecycle re-registers this host on every start.
        if let Err(e) = crate::lifecycle::run_init(&self.install_dir, "", self.dry_run).await {
            error!(error = %e, "exiting due to error during initialization");
            return 1;
        }

        let config = match AgentConfig::load(&self.install_dir) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "failed to load config");
                return 1;
            }
        };

        let (auth, key_check_rx) = AuthGuard::new();
        let auth = Arc::new(auth);
        let client = match Client::new(&config, Arc::clone(&auth)) {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, "failed to build API client");
                return 1;
            }
        };
        let services = Services {
            config,
            auth,
            client,
        };

        if let Err(e) = services.client.check_key().await {
            error!(error = %e, "failed to check credential validity");
            return 1;
        }

        let (ctrl_tx, mut ctrl_rx) = mpsc::channel::<ControlEvent>(8);
        spawn_signal_listener(ctrl_tx.clone());
        spawn_key_check_probe(services.client.clone(), key_check_rx, ctrl_tx.clone());

        loop {
            let collection_cfg = match services.client.get_collection_config().await {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!(error = %e, "exiting due to error when fetching config");
                    return 1;
                }
            };

            let scope = CancellationToken::new();
            let children = match self.start_services(&services, &collection_cfg, &scope, &ctrl_tx)
            {
                Ok(children) => children,
                Err(e) => {
                    error!(error = %e, "cannot start services");
                    return 1;
                }
            };

            let event = if self.dry_run {
                tokio::select! {
                    evt = ctrl_rx.recv() => evt.unwrap_or(ControlEvent::Shutdown),
                    _ = tokio::time::sleep(DRY_RUN_TIMEOUT) => {
                        info!("dry run finished, exiting agent");
                        ControlEvent::Shutdown
                    }
                }
            } else {
                ctrl_rx.recv().await.unwrap_or(ControlEvent::Shutdown)
            };

            scope.cancel();
            join_all(children).await;

            match event {
                ControlEvent::Shutdown => {
                    info!("shutdown signal received, all services stopped");
                    lock::release(&self.install_dir);
                    return 0;
                }
                ControlEvent::Restart => {
                    lock::release(&self.install_dir);
                    info!("agent stopped for restart; automatic relaunch requires a service manager");
                    return 1;
                }
                ControlEvent::Reload => {
                    info!("reloading collectors");
                    continue;
                }
                ControlEvent::Hibernate => match hibernate(&mut ctrl_rx).await {
                    HibernateOutcome::Resume => continue,
                    HibernateOutcome::Exit(code) => {
                        lock::release(&self.install_dir);
                        return code;
                    }
                },
            }
        }
    }

    fn start_services(
        &self,
        services: &Services,
        collection_cfg: &CollectionConfig,
        scope: &CancellationToken,
        ctrl_tx: &mpsc::Sender<ControlEvent>,
    ) -> Result<Vec<JoinHandle<()>>, Error> {
        let mut children = Vec::new();

        // Dry runs exit on the scope timeout, never on drift.
        if !self.dry_run {
            let watcher = ConfigWatcher::new(services.client.clone(), collection_cfg)?;
            children.push(tokio::spawn(watcher.run(
                collection_cfg.clone(),
                scope.clone(),
                ctrl_tx.clone(),
            )));
        }

        let restart_watcher = RestartWatcher::new(self.install_dir.clone());
        children.push(tokio::spawn(
            restart_watcher.run(scope.clone(), ctrl_tx.clone()),
        ));

        let exporter = if self.dry_run {
            Exporter::dry_run(&self.install_dir)?
        } else {
            Exporter::new(
                &self.install_dir,
                &services.config,
                Arc::clone(&services.auth),
            )?
        };
        children.extend(exporter.start_flushers(scope));

        let log_collectors =
            hostwatch_logs::registry::build_collectors(&self.install_dir, Some(collection_cfg));
        info!(count = log_collectors.len(), "starting log collectors");
        children.push(tokio::spawn(hostwatch_logs::run_collection(
            log_collectors,
            scope.clone(),
            exporter.clone(),
        )));

        let metric_collectors =
            hostwatch_metrics::registry::build_collectors(Some(collection_cfg));
        let interval = if self.dry_run {
            hostwatch_metrics::scheduler::DRY_RUN_INTERVAL
        } else {
            hostwatch_metrics::scheduler::DEFAULT_INTERVAL
        };
        info!(count = metric_collectors.len(), "starting metric collectors");
        children.push(tokio::spawn(hostwatch_metrics::scheduler::run_collection(
            metric_collectors,
            interval,
            scope.clone(),
            exporter,
        )));

        Ok(children)
    }
}

enum HibernateOutcome {
    Resume,
    Exit(i32),
}

/// Sleeps out the hibernation window while still honoring control events.
async fn hibernate(ctrl_rx: &mut mpsc::Receiver<ControlEvent>) -> HibernateOutcome {
    warn!("hibernating for 1h");
    let deadline = tokio::time::Instant::now() + HIBERNATION;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                info!("hibernation finished");
                return HibernateOutcome::Resume;
            }
            evt = ctrl_rx.recv() => match evt {
                Some(ControlEvent::Shutdown) | None => {
                    info!("shutdown received during hibernation");
                    return HibernateOutcome::Exit(0);
                }
                Some(ControlEvent::Restart) => {
                    info!("restart received during hibernation");
                    return HibernateOutcome::Exit(1);
                }
                Some(ControlEvent::Reload) => {
                    info!("reload received during hibernation");
                    return HibernateOutcome::Resume;
                }
                Some(ControlEvent::Hibernate) => continue,
            }
        }
    }
}

async fn join_all(children: Vec<JoinHandle<()>>) {
    for child in children {
        if let Err(e) = child.await {
            error!(error = %e, "child task panicked");
        }
    }
}

fn spawn_signal_listener(ctrl_tx: mpsc::Sender<ControlEvent>) {
    tokio::spawn(async move {
        wait_for_terminate_signal().await;
        let _ = ctrl_tx.send(ControlEvent::Shutdown).await;
    });
}

#[cfg(unix)]
async fn wait_for_terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "cannot install SIGINT handler");
            return std::future::pending().await;
        }
    };
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "cannot install SIGTERM handler");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = interrupt.recv() => info!("termination signal received: SIGINT"),
        _ = terminate.recv() => info!("termination signal received: SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_terminate_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("termination signal received: ctrl-c");
    }
}

/// Forwards AuthGuard key-check requests: probe the control plane, and
/// hibernate the agent only if the credential is really gone.
fn spawn_key_check_probe(
    client: Client,
    mut key_check_rx: mpsc::Receiver<()>,
    ctrl_tx: mpsc::Sender<ControlEvent>,
) {
    tokio::spawn(async move {
        while key_check_rx.recv().await.is_some() {
            match client.check_key().await {
                Err(Error::AuthInvalid) => {
                    warn!("credential is no longer valid");
                    let _ = ctrl_tx.send(ControlEvent::Hibernate).await;
                }
                Err(e) => warn!(error = %e, "key check probe failed, not hibernating"),
                Ok(()) => info!("credential still valid, continuing"),
            }
        }
    });
}
