// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Builds the collector set for a collection cycle. With no config, every
//! collector runs unfiltered (discovery mode). With a config, a collector
//! runs iff some configured metric name matches its family prefix, and it
//! receives the matching specs as its inclusion filter. The heartbeat
//! collector always runs.

use hostwatch_core::collection::CollectionConfig;
use tracing::debug;

use crate::cpu::CpuCollector;
use crate::disk::DiskCollector;
use crate::diskio::DiskIoCollector;
use crate::heartbeat::HeartbeatCollector;
use crate::memory::MemoryCollector;
use crate::network::NetworkCollector;
use crate::MetricCollector;

fn family_collectors() -> Vec<(&'static str, Box<dyn MetricCollector>)> {
    vec![
        ("cpu", Box::new(CpuCollector::new()) as Box<dyn MetricCollector>),
        ("mem", Box::new(MemoryCollector::new())),
        ("disk", Box::new(DiskCollector::new())),
        ("diskio", Box::new(DiskIoCollector::new())),
        ("net", Box::new(NetworkCollector::new())),
    ]
}

pub fn build_collectors(cfg: Option<&CollectionConfig>) -> Vec<Box<dyn MetricCollector>> {
    let mut collectors: Vec<Box<dyn MetricCollector>> = vec![Box::new(HeartbeatCollector::new())];

    let Some(cfg) = cfg else {
        for (prefix, collector) in family_collectors() {
            debug!(collector = prefix, "including collector (no config)");
            collectors.push(collector);
        }
        return collectors;
    };

    for (prefix, mut collector) in family_collectors() {
        let matching: Vec<_> = cfg
            .metrics
            .iter()
            .filter(|m| m.name.starts_with(prefix))
            .cloned()
            .collect();

        if matching.is_empty() {
            debug!(collector = prefix, "skipping collector with no included metrics");
            continue;
        }

        debug!(collector = prefix, count = matching.len(), "assigned metrics to collector");
        collector.set_included(matching);
        collectors.push(collector);
    }
    collectors
}
