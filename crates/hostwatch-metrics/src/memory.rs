// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Point-in-time memory gauges from a virtual-memory snapshot. No state is
//! kept between collections.

use sysinfo::{MemoryRefreshKind, RefreshKind, System};

use hostwatch_core::collection::{MetricKind, MetricSpec};
use hostwatch_core::error::Error;
use hostwatch_core::exporter::unix_ms_now;

use crate::{filter_points, DataPoint, MetricCollector};

struct Snapshot {
    total: u64,
    available: u64,
    used: u64,
    free: u64,
    swap_total: u64,
    swap_used: u64,
    swap_free: u64,
}

const MEM_METRICS: [(&'static str, &'static str, fn(&Snapshot) -> f64); 9] = [
    ("mem_total_bytes", "bytes", |s| s.total as f64),
    ("mem_available_bytes", "bytes", |s| s.available as f64),
    ("mem_used_bytes", "bytes", |s| s.used as f64),
    ("mem_free_bytes", "bytes", |s| s.free as f64),
    ("mem_used_ratio", "%", |s| ratio(s.used, s.total)),
    ("mem_swap_total_bytes", "bytes", |s| s.swap_total as f64),
    ("mem_swap_used_bytes", "bytes", |s| s.swap_used as f64),
    ("mem_swap_free_bytes", "bytes", |s| s.swap_free as f64),
    ("mem_swap_used_ratio", "%", |s| {
        ratio(s.swap_used, s.swap_total)
    }),
];

fn ratio(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64
    }
}

pub struct MemoryCollector {
    system: System,
    included: Option<Vec<MetricSpec>>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
            ),
            included: None,
        }
    }

    fn snapshot(&mut self) -> Snapshot {
        self.system.refresh_memory();
        Snapshot {
            total: self.system.total_memory(),
            available: self.system.available_memory(),
            used: self.system.used_memory(),
            free: self.system.free_memory(),
            swap_total: self.system.total_swap(),
            swap_used: self.system.used_swap(),
            swap_free: self.system.free_swap(),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricCollector for MemoryCollector {
    fn name(&self) -> &'static str {
        "mem"
    }

    fn discover(&mut self) -> Result<Vec<MetricSpec>, Error> {
        Ok(MEM_METRICS
            .iter()
            .map(|(name, unit, _)| MetricSpec {
                name: name.to_string(),
                kind: MetricKind::Gauge,
                unit: unit.to_string(),
                labels: Default::default(),
            })
            .collect())
    }

    fn collect(&mut self) -> Result<Vec<DataPoint>, Error> {
        let timestamp = unix_ms_now();
        let snapshot = self.snapshot();

        let points = MEM_METRICS
            .iter()
            .map(|(name, _unit, value)| DataPoint {
                name: name.to_string(),
                timestamp,
                value: value(&snapshot),
                labels: Default::default(),
            })
            .collect();
        Ok(filter_points(points, self.included.as_deref()))
    }

    fn set_included(&mut self, specs: Vec<MetricSpec>) {
        self.included = Some(specs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_guards_division_by_zero() {
        assert_eq!(ratio(10, 0), 0.0);
        assert_eq!(ratio(1, 4), 0.25);
    }

    #[test]
    fn test_collect_emits_all_gauges() {
        let mut collector = MemoryCollector::new();
        let points = collector.collect().unwrap();
        assert_eq!(points.len(), MEM_METRICS.len());

        let used_ratio = points
            .iter()
            .find(|dp| dp.name == "mem_used_ratio")
            .unwrap();
        assert!(used_ratio.value >= 0.0 && used_ratio.value <= 1.0);
    }

    #[test]
    fn test_discover_matches_collect_names() {
        let mut collector = MemoryCollector::new();
        let discovered = collector.discover().unwrap();
        let collected = collector.collect().unwrap();

        let discovered_names: Vec<_> = discovered.iter().map(|m| &m.name).collect();
        let collected_names: Vec<_> = collected.iter().map(|dp| &dp.name).collect();
        assert_eq!(discovered_names, collected_names);
    }
}
