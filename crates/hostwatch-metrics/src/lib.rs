// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Host metric collectors.
//!
//! Each collector knows how to enumerate the metric families it can produce
//! (`discover`), take a point-in-time or rate-derived sample (`collect`),
//! and restrict its output to the series the control plane asked for
//! (`set_included`). The scheduler in [`scheduler`] drives them on a shared
//! timer and feeds the results into the metric spool.

use std::collections::BTreeMap;

use hostwatch_core::collection::MetricSpec;
use hostwatch_core::error::Error;

pub mod cpu;
pub mod disk;
pub mod diskio;
pub mod heartbeat;
pub mod memory;
pub mod network;
pub mod registry;
pub mod scheduler;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(not(target_os = "linux"))]
pub mod stub;

/// A single measurement of a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub name: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
}

pub trait MetricCollector: Send {
    /// The collector's identifier, which is also its metric-family prefix
    /// (e.g. "cpu", "mem").
    fn name(&self) -> &'static str;

    /// Reports every metric this collector can produce on this host. Called
    /// during `init` to seed the control plane.
    fn discover(&mut self) -> Result<Vec<MetricSpec>, Error>;

    /// Takes a sample. Rate-derived collectors return nothing on their
    /// first call; it only captures the baseline.
    fn collect(&mut self) -> Result<Vec<DataPoint>, Error>;

    /// Restricts `collect` output to the given series.
    fn set_included(&mut self, specs: Vec<MetricSpec>);
}

/// A produced data point is included iff some spec has the same name and an
/// equal label map. With no filter configured, everything is included.
pub fn is_included(
    name: &str,
    labels: &BTreeMap<String, String>,
    included: Option<&[MetricSpec]>,
) -> bool {
    match included {
        None => true,
        Some(specs) => specs
            .iter()
            .any(|spec| spec.name == name && spec.labels == *labels),
    }
}

/// Applies [`is_included`] over a batch.
pub fn filter_points(
    points: Vec<DataPoint>,
    included: Option<&[MetricSpec]>,
) -> Vec<DataPoint> {
    if included.is_none() {
        return points;
    }
    points
        .into_iter()
        .filter(|dp| is_included(&dp.name, &dp.labels, included))
        .collect()
}

#[cfg(target_os = "linux")]
fn platform_cpu_times_reader() -> Box<dyn cpu::CpuTimesReader> {
    Box::new(linux::ProcStatReader)
}

#[cfg(not(target_os = "linux"))]
fn platform_cpu_times_reader() -> Box<dyn cpu::CpuTimesReader> {
    Box::new(stub::UnsupportedReader)
}

#[cfg(target_os = "linux")]
fn platform_disk_io_reader() -> Box<dyn diskio::DiskIoReader> {
    Box::new(linux::ProcDiskstatsReader)
}

#[cfg(not(target_os = "linux"))]
fn platform_disk_io_reader() -> Box<dyn diskio::DiskIoReader> {
    Box::new(stub::UnsupportedReader)
}

#[cfg(target_os = "linux")]
fn platform_net_dev_reader() -> Box<dyn network::NetDevReader> {
    Box::new(linux::ProcNetDevReader)
}

#[cfg(not(target_os = "linux"))]
fn platform_net_dev_reader() -> Box<dyn network::NetDevReader> {
    Box::new(stub::UnsupportedReader)
}

pub(crate) fn labels_of(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostwatch_core::collection::MetricKind;

    fn spec(name: &str, labels: &[(&str, &str)]) -> MetricSpec {
        MetricSpec {
            name: name.into(),
            kind: MetricKind::Gauge,
            unit: String::new(),
            labels: labels_of(labels),
        }
    }

    #[test]
    fn test_no_filter_includes_everything() {
        assert!(is_included("anything", &BTreeMap::new(), None));
    }

    #[test]
    fn test_filter_matches_name_and_full_label_map() {
        let specs = vec![spec("cpu_user_ratio", &[("cpu", "0")])];

        assert!(is_included(
            "cpu_user_ratio",
            &labels_of(&[("cpu", "0")]),
            Some(&specs)
        ));
        // Same name, different label value.
        assert!(!is_included(
            "cpu_user_ratio",
            &labels_of(&[("cpu", "1")]),
            Some(&specs)
        ));
        // Same labels, different name.
        assert!(!is_included(
            "cpu_idle_ratio",
            &labels_of(&[("cpu", "0")]),
            Some(&specs)
        ));
        // Extra label key breaks map equality.
        assert!(!is_included(
            "cpu_user_ratio",
            &labels_of(&[("cpu", "0"), ("host", "a")]),
            Some(&specs)
        ));
    }

    #[test]
    fn test_empty_filter_excludes_everything() {
        assert!(!is_included("cpu_user_ratio", &BTreeMap::new(), Some(&[])));
    }
}
