// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-device I/O rates derived from cumulative block-layer counters, using
//! the same delta-over-interval pattern as the CPU collector.

use std::collections::BTreeMap;

use hostwatch_core::collection::{MetricKind, MetricSpec};
use hostwatch_core::error::Error;
use hostwatch_core::exporter::unix_ms_now;

use crate::{filter_points, DataPoint, MetricCollector};

/// Cumulative counters for one block device.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiskIoCounters {
    pub read_count: u64,
    pub write_count: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_time_ms: u64,
    pub write_time_ms: u64,
    pub io_time_ms: u64,
}

pub trait DiskIoReader: Send {
    fn read(&self) -> Result<BTreeMap<String, DiskIoCounters>, Error>;
}

struct Derived;

impl Derived {
    const NAMES: [(&'static str, &'static str); 6] = [
        ("diskio_read_rate", "rate"),
        ("diskio_write_rate", "rate"),
        ("diskio_read_bps", "bps"),
        ("diskio_write_bps", "bps"),
        ("diskio_used_ratio", "%"),
        ("diskio_avg_request_ms", "ms"),
    ];

    /// All six derived values for one device over `delta_ms` milliseconds.
    fn compute(prev: &DiskIoCounters, curr: &DiskIoCounters, delta_ms: f64) -> [f64; 6] {
        let d_reads = curr.read_count.saturating_sub(prev.read_count) as f64;
        let d_writes = curr.write_count.saturating_sub(prev.write_count) as f64;
        let d_read_bytes = curr.read_bytes.saturating_sub(prev.read_bytes) as f64;
        let d_write_bytes = curr.write_bytes.saturating_sub(prev.write_bytes) as f64;
        let d_read_time = curr.read_time_ms.saturating_sub(prev.read_time_ms) as f64;
        let d_write_time = curr.write_time_ms.saturating_sub(prev.write_time_ms) as f64;
        let d_io_time = curr.io_time_ms.saturating_sub(prev.io_time_ms) as f64;

        let ops = d_reads + d_writes;
        let avg_request_ms = if ops == 0.0 {
            0.0
        } else {
            (d_read_time + d_write_time) / ops
        };

        [
            d_reads / delta_ms * 1000.0,
            d_writes / delta_ms * 1000.0,
            d_read_bytes / delta_ms * 1000.0,
            d_write_bytes / delta_ms * 1000.0,
            (d_io_time / delta_ms).min(1.0),
            avg_request_ms,
        ]
    }
}

pub struct DiskIoCollector {
    reader: Box<dyn DiskIoReader>,
    last: Option<BTreeMap<String, DiskIoCounters>>,
    last_time: i64,
    included: Option<Vec<MetricSpec>>,
}

impl DiskIoCollector {
    pub fn new() -> Self {
        Self::with_reader(crate::platform_disk_io_reader())
    }

    pub fn with_reader(reader: Box<dyn DiskIoReader>) -> Self {
        Self {
            reader,
            last: None,
            last_time: 0,
            included: None,
        }
    }
}

impl Default for DiskIoCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricCollector for DiskIoCollector {
    fn name(&self) -> &'static str {
        "diskio"
    }

    fn discover(&mut self) -> Result<Vec<MetricSpec>, Error> {
        let devices = self.reader.read()?;

        let mut discovered = Vec::new();
        for device in devices.keys() {
            for (name, unit) in Derived::NAMES {
                discovered.push(MetricSpec {
                    name: name.to_string(),
                    kind: MetricKind::Gauge,
                    unit: unit.to_string(),
                    labels: crate::labels_of(&[("device", device)]),
                });
            }
        }
        Ok(discovered)
    }

    fn collect(&mut self) -> Result<Vec<DataPoint>, Error> {
        let timestamp = unix_ms_now();
        let current = self.reader.read()?;

        let Some(previous) = self.last.take() else {
            self.last = Some(current);
            self.last_time = timestamp;
            return Ok(Vec::new());
        };

        let delta_ms = (timestamp - self.last_time) as f64;
        if delta_ms <= 0.0 {
            self.last = Some(previous);
            return Ok(Vec::new());
        }

        let mut points = Vec::new();
        for (device, curr) in &current {
            // Devices that appeared since the last sample prime silently.
            let Some(prev) = previous.get(device) else {
                continue;
            };

            let labels = crate::labels_of(&[("device", device)]);
            let values = Derived::compute(prev, curr, delta_ms);
            for ((name, _unit), value) in Derived::NAMES.iter().zip(values) {
                points.push(DataPoint {
                    name: name.to_string(),
                    timestamp,
                    value,
                    labels: labels.clone(),
                });
            }
        }

        self.last = Some(current);
        self.last_time = timestamp;
        Ok(filter_points(points, self.included.as_deref()))
    }

    fn set_included(&mut self, specs: Vec<MetricSpec>) {
        self.included = Some(specs);
    }
}
