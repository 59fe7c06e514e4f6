// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Drives periodic metric collection. One timer fires all collectors
//! sequentially; a collector failure is logged and never aborts the
//! others. Results are converted to wire payloads and appended to the
//! metric spool.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use hostwatch_core::collection::MetricSpec;
use hostwatch_core::exporter::{Exporter, MetricPayload};

use crate::{DataPoint, MetricCollector};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DRY_RUN_INTERVAL: Duration = Duration::from_secs(3);

/// Collection loop; runs until the supervisor cancels the scope.
pub async fn run_collection(
    mut collectors: Vec<Box<dyn MetricCollector>>,
    interval: Duration,
    cancel: CancellationToken,
    exporter: Exporter,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // the first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("metrics collection received stop signal");
                return;
            }
            _ = ticker.tick() => {
                let points = perform_collection(&mut collectors);
                debug!(count = points.len(), "metrics collected");
                let payloads = to_payloads(points);
                if let Err(e) = exporter.export_metrics(&payloads) {
                    error!(error = %e, "failed to export metrics payload");
                }
            }
        }
    }
}

/// Runs `collect` across all collectors, isolating failures per collector.
pub fn perform_collection(collectors: &mut [Box<dyn MetricCollector>]) -> Vec<DataPoint> {
    let mut collected = Vec::new();
    for collector in collectors.iter_mut() {
        match collector.collect() {
            Ok(points) => collected.extend(points),
            Err(e) => error!(collector = collector.name(), error = %e, "failed to collect metrics"),
        }
    }
    collected
}

/// Runs discovery across all collectors; a failing collector is logged and
/// contributes nothing.
pub fn discover_available(collectors: &mut [Box<dyn MetricCollector>]) -> Vec<MetricSpec> {
    let mut discovered = Vec::new();
    for collector in collectors.iter_mut() {
        match collector.discover() {
            Ok(specs) => discovered.extend(specs),
            Err(e) => {
                error!(collector = collector.name(), error = %e, "failed to discover available metrics")
            }
        }
    }
    discovered
}

pub fn to_payloads(points: Vec<DataPoint>) -> Vec<MetricPayload> {
    points
        .into_iter()
        .map(|dp| MetricPayload {
            timestamp: dp.timestamp.to_string(),
            labels: dp.labels,
            name: dp.name,
            value: dp.value,
        })
        .collect()
}
