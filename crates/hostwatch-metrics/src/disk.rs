// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Filesystem usage gauges per partition. Partitions are sorted by
//! mountpoint before a first-wins de-duplication of the underlying device,
//! so bind mounts and multi-mount devices contribute once, deterministically.

use std::collections::BTreeSet;
use std::path::Path;

use sysinfo::Disks;
use tracing::error;

use hostwatch_core::collection::{MetricKind, MetricSpec};
use hostwatch_core::error::Error;
use hostwatch_core::exporter::unix_ms_now;

use crate::{filter_points, DataPoint, MetricCollector};

#[derive(Debug, Clone)]
struct Partition {
    device: String,
    mountpoint: String,
    total: u64,
    available: u64,
}

#[derive(Debug, Clone, Copy)]
struct InodeStats {
    total: u64,
    free: u64,
}

const BYTE_METRICS: [(&'static str, &'static str); 4] = [
    ("disk_total_bytes", "bytes"),
    ("disk_free_bytes", "bytes"),
    ("disk_used_bytes", "bytes"),
    ("disk_used_ratio", "%"),
];

const INODE_METRICS: [(&'static str, &'static str); 4] = [
    ("disk_inodes_total_total", "no"),
    ("disk_inodes_free_total", "no"),
    ("disk_inodes_used_total", "no"),
    ("disk_inodes_used_ratio", "%"),
];

pub struct DiskCollector {
    included: Option<Vec<MetricSpec>>,
}

impl DiskCollector {
    pub fn new() -> Self {
        Self { included: None }
    }

    fn partitions(&self) -> Vec<Partition> {
        let disks = Disks::new_with_refreshed_list();
        let mut partitions: Vec<Partition> = disks
            .iter()
            .map(|disk| Partition {
                device: disk.name().to_string_lossy().into_owned(),
                mountpoint: disk.mount_point().to_string_lossy().into_owned(),
                total: disk.total_space(),
                available: disk.available_space(),
            })
            .collect();

        partitions.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));
        dedupe_devices(partitions)
    }
}

/// Each underlying device contributes once; the first mountpoint (in sorted
/// order) wins.
fn dedupe_devices(partitions: Vec<Partition>) -> Vec<Partition> {
    let mut seen = BTreeSet::new();
    partitions
        .into_iter()
        .filter(|p| seen.insert(normalize_device(&p.device)))
        .collect()
}

fn normalize_device(device: &str) -> String {
    device.strip_prefix("/dev/").unwrap_or(device).to_string()
}

#[cfg(unix)]
fn inode_stats(mountpoint: &str) -> Result<InodeStats, Error> {
    let stats = nix::sys::statvfs::statvfs(Path::new(mountpoint))
        .map_err(|e| Error::Collector("disk".into(), format!("statvfs {mountpoint}: {e}")))?;
    Ok(InodeStats {
        total: stats.files() as u64,
        free: stats.files_free() as u64,
    })
}

#[cfg(not(unix))]
fn inode_stats(_mountpoint: &str) -> Result<InodeStats, Error> {
    Err(Error::PlatformUnsupported("inode statistics"))
}

fn partition_points(p: &Partition, timestamp: i64) -> Vec<DataPoint> {
    let labels = crate::labels_of(&[("device", &p.device), ("mountpoint", &p.mountpoint)]);
    let used = p.total.saturating_sub(p.available);
    let used_ratio = if p.total == 0 {
        0.0
    } else {
        used as f64 / p.total as f64
    };

    let mut values = vec![
        ("disk_total_bytes", p.total as f64),
        ("disk_free_bytes", p.available as f64),
        ("disk_used_bytes", used as f64),
        ("disk_used_ratio", used_ratio),
    ];

    match inode_stats(&p.mountpoint) {
        Ok(inodes) => {
            let inodes_used = inodes.total.saturating_sub(inodes.free);
            let inodes_ratio = if inodes.total == 0 {
                0.0
            } else {
                inodes_used as f64 / inodes.total as f64
            };
            values.push(("disk_inodes_total_total", inodes.total as f64));
            values.push(("disk_inodes_free_total", inodes.free as f64));
            values.push(("disk_inodes_used_total", inodes_used as f64));
            values.push(("disk_inodes_used_ratio", inodes_ratio));
        }
        Err(e) => {
            error!(mountpoint = p.mountpoint.as_str(), error = %e, "failed to read inode stats");
        }
    }

    values
        .into_iter()
        .map(|(name, value)| DataPoint {
            name: name.to_string(),
            timestamp,
            value,
            labels: labels.clone(),
        })
        .collect()
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricCollector for DiskCollector {
    fn name(&self) -> &'static str {
        "disk"
    }

    fn discover(&mut self) -> Result<Vec<MetricSpec>, Error> {
        let mut discovered = Vec::new();
        for p in self.partitions() {
            let labels =
                crate::labels_of(&[("device", &p.device), ("mountpoint", &p.mountpoint)]);
            for (name, unit) in BYTE_METRICS.iter().chain(INODE_METRICS.iter()) {
                discovered.push(MetricSpec {
                    name: name.to_string(),
                    kind: MetricKind::Gauge,
                    unit: unit.to_string(),
                    labels: labels.clone(),
                });
            }
        }
        Ok(discovered)
    }

    fn collect(&mut self) -> Result<Vec<DataPoint>, Error> {
        let timestamp = unix_ms_now();
        let mut points = Vec::new();
        // A partition that fails to stat is skipped; the others proceed.
        for p in self.partitions() {
            points.extend(partition_points(&p, timestamp));
        }
        Ok(filter_points(points, self.included.as_deref()))
    }

    fn set_included(&mut self, specs: Vec<MetricSpec>) {
        self.included = Some(specs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(device: &str, mountpoint: &str) -> Partition {
        Partition {
            device: device.into(),
            mountpoint: mountpoint.into(),
            total: 100,
            available: 25,
        }
    }

    #[test]
    fn test_device_normalization() {
        assert_eq!(normalize_device("/dev/sda1"), "sda1");
        assert_eq!(normalize_device("tmpfs"), "tmpfs");
    }

    #[test]
    fn test_first_mountpoint_wins_after_sorting() {
        let partitions = vec![
            part("/dev/sda1", "/var/lib/docker"),
            part("/dev/sda1", "/"),
            part("/dev/sdb1", "/data"),
        ];
        // Caller sorts by mountpoint before deduping; emulate that here.
        let mut sorted = partitions;
        sorted.sort_by(|a, b| a.mountpoint.cmp(&b.mountpoint));
        let kept = dedupe_devices(sorted);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].mountpoint, "/");
        assert_eq!(kept[1].mountpoint, "/data");
    }

    #[test]
    fn test_partition_points_byte_gauges() {
        let points = partition_points(&part("/dev/sda1", "/"), 42);
        let used = points.iter().find(|dp| dp.name == "disk_used_bytes").unwrap();
        assert_eq!(used.value, 75.0);
        let ratio = points.iter().find(|dp| dp.name == "disk_used_ratio").unwrap();
        assert_eq!(ratio.value, 0.75);
        assert_eq!(used.labels["device"], "/dev/sda1");
        assert_eq!(used.labels["mountpoint"], "/");
    }

    #[cfg(unix)]
    #[test]
    fn test_inode_stats_on_real_mount() {
        let stats = inode_stats("/").unwrap();
        assert!(stats.total >= stats.free);
    }
}
