// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Polls for the `restart` marker file the self-updater drops next to the
//! binary. A file poll is used instead of OS signals so any administrator
//! with write access to the install directory can request a restart without
//! being allowed to signal a foreign-uid process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hostwatch_core::paths;

use crate::supervisor::ControlEvent;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct RestartWatcher {
    install_dir: PathBuf,
}

impl RestartWatcher {
    pub fn new(install_dir: PathBuf) -> Self {
        Self { install_dir }
    }

    pub async fn run(self, cancel: CancellationToken, ctrl: mpsc::Sender<ControlEvent>) {
        self.run_with_period(POLL_INTERVAL, cancel, ctrl).await
    }

    pub async fn run_with_period(
        self,
        period: Duration,
        cancel: CancellationToken,
        ctrl: mpsc::Sender<ControlEvent>,
    ) {
        // A marker left over from a previous run must not trigger anything.
        delete_stale_marker(&self.install_dir);

        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        info!("running restart watcher");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("restart watcher received shutdown signal");
                    return;
                }
                _ = ticker.tick() => {
                    debug!("checking for restart signal");
                    if restart_requested(&self.install_dir) {
                        info!("restart signal detected, triggering restart");
                        let _ = ctrl.send(ControlEvent::Restart).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Consumes the marker file if present.
fn restart_requested(install_dir: &Path) -> bool {
    let marker = paths::restart_marker_path(install_dir);
    if marker.exists() {
        let _ = std::fs::remove_file(&marker);
        return true;
    }
    false
}

fn delete_stale_marker(install_dir: &Path) {
    let marker = paths::restart_marker_path(install_dir);
    if marker.exists() {
        info!(file = %marker.display(), "deleting stale restart marker");
        let _ = std::fs::remove_file(&marker);
    }
}
