// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Polls the control plane for collection-config drift. The canonical hash
//! of each fetched document is compared against the hash captured when the
//! watcher started; a difference raises `Reload` at the supervisor.
//!
//! An unassigned agent (empty config) polls fast so it picks up its first
//! assignment quickly; once assigned, the cadence drops to once per five
//! minutes.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hostwatch_core::api::Client;
use hostwatch_core::collection::CollectionConfig;
use hostwatch_core::error::Error;

use crate::supervisor::ControlEvent;

pub const FAST_PERIOD: Duration = Duration::from_secs(5);
pub const SLOW_PERIOD: Duration = Duration::from_secs(5 * 60);

pub fn period_for(cfg: &CollectionConfig) -> Duration {
    if cfg.is_empty() {
        FAST_PERIOD
    } else {
        SLOW_PERIOD
    }
}

pub struct ConfigWatcher {
    client: Client,
    initial_hash: String,
}

impl ConfigWatcher {
    pub fn new(client: Client, initial: &CollectionConfig) -> Result<Self, Error> {
        Ok(Self {
            client,
            initial_hash: initial.content_hash()?,
        })
    }

    pub async fn run(
        self,
        initial: CollectionConfig,
        cancel: CancellationToken,
        ctrl: mpsc::Sender<ControlEvent>,
    ) {
        let mut current_period = period_for(&initial);
        let mut ticker = tokio::time::interval(current_period);
        ticker.tick().await;
        info!(period = ?current_period, "running config watcher");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("config watcher received shutdown signal");
                    return;
                }
                _ = ticker.tick() => {
                    let Some(new_cfg) = self.check_for_drift(&ctrl).await else {
                        continue;
                    };
                    let Some(new_cfg) = new_cfg else {
                        // Drift reported; this watcher's job is done.
                        return;
                    };

                    let next_period = period_for(&new_cfg);
                    if next_period != current_period {
                        debug!(old = ?current_period, new = ?next_period, "changing config watcher period");
                        ticker = tokio::time::interval(next_period);
                        ticker.tick().await;
                        current_period = next_period;
                    }
                }
            }
        }
    }

    /// One poll cycle. `None` means the cycle was skipped on a fetch/hash
    /// failure; `Some(None)` means drift was detected and reported;
    /// `Some(Some(cfg))` is an unchanged config for period adjustment.
    pub async fn check_for_drift(
        &self,
        ctrl: &mpsc::Sender<ControlEvent>,
    ) -> Option<Option<CollectionConfig>> {
        let new_cfg = match self.client.get_collection_config().await {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(error = %e, "failed to fetch config for change detection");
                return None;
            }
        };
        let new_hash = match new_cfg.content_hash() {
            Ok(hash) => hash,
            Err(e) => {
                warn!(error = %e, "failed to hash new config, skipping this cycle");
                return None;
            }
        };

        if new_hash != self.initial_hash {
            info!("configuration has changed, reloading collectors");
            let _ = ctrl.send(ControlEvent::Reload).await;
            return Some(None);
        }
        Some(Some(new_cfg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostwatch_core::collection::{LogSourceSpec, MetricKind, MetricSpec};

    fn non_empty() -> CollectionConfig {
        CollectionConfig {
            metrics: vec![MetricSpec {
                name: "cpu_user_ratio".into(),
                kind: MetricKind::Gauge,
                unit: "%".into(),
                labels: Default::default(),
            }],
            log_sources: vec![LogSourceSpec {
                name: "nginx".into(),
                path: "/var/log/nginx/*.log".into(),
            }],
        }
    }

    #[test]
    fn test_period_selection() {
        assert_eq!(period_for(&CollectionConfig::default()), FAST_PERIOD);
        assert_eq!(period_for(&non_empty()), SLOW_PERIOD);
    }
}
