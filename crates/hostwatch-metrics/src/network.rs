// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-interface traffic rates. Interfaces with virtual/loopback name
//! prefixes are filtered out at both discovery and collection.

use std::collections::BTreeMap;

use hostwatch_core::collection::{MetricKind, MetricSpec};
use hostwatch_core::error::Error;
use hostwatch_core::exporter::unix_ms_now;

use crate::{filter_points, DataPoint, MetricCollector};

/// Cumulative counters for one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetCounters {
    pub bytes_recv: u64,
    pub packets_recv: u64,
    pub errin: u64,
    pub dropin: u64,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub errout: u64,
    pub dropout: u64,
}

pub trait NetDevReader: Send {
    fn read(&self) -> Result<BTreeMap<String, NetCounters>, Error>;
}

/// Loopback, bridges, tunnels and container veth pairs carry duplicated or
/// purely local traffic.
const DENY_PREFIXES: [&str; 9] = [
    "lo", "docker", "veth", "br-", "virbr", "tun", "tap", "wg", "flannel",
];

pub fn is_denied(interface: &str) -> bool {
    DENY_PREFIXES
        .iter()
        .any(|prefix| interface.starts_with(prefix))
}

const NET_METRICS: [(&'static str, &'static str, fn(&NetCounters) -> u64); 8] = [
    ("net_bytes_sent_bps", "bps", |c| c.bytes_sent),
    ("net_bytes_recv_bps", "bps", |c| c.bytes_recv),
    ("net_packets_sent_rate", "rate", |c| c.packets_sent),
    ("net_packets_recv_rate", "rate", |c| c.packets_recv),
    ("net_errin_rate", "rate", |c| c.errin),
    ("net_errout_rate", "rate", |c| c.errout),
    ("net_dropin_rate", "rate", |c| c.dropin),
    ("net_dropout_rate", "rate", |c| c.dropout),
];

pub struct NetworkCollector {
    reader: Box<dyn NetDevReader>,
    last: Option<BTreeMap<String, NetCounters>>,
    last_time: i64,
    included: Option<Vec<MetricSpec>>,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self::with_reader(crate::platform_net_dev_reader())
    }

    pub fn with_reader(reader: Box<dyn NetDevReader>) -> Self {
        Self {
            reader,
            last: None,
            last_time: 0,
            included: None,
        }
    }

    fn read_allowed(&self) -> Result<BTreeMap<String, NetCounters>, Error> {
        let mut interfaces = self.reader.read()?;
        interfaces.retain(|name, _| !is_denied(name));
        Ok(interfaces)
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricCollector for NetworkCollector {
    fn name(&self) -> &'static str {
        "net"
    }

    fn discover(&mut self) -> Result<Vec<MetricSpec>, Error> {
        let interfaces = self.read_allowed()?;

        let mut discovered = Vec::new();
        for interface in interfaces.keys() {
            for (name, unit, _) in NET_METRICS {
                discovered.push(MetricSpec {
                    name: name.to_string(),
                    kind: MetricKind::Gauge,
                    unit: unit.to_string(),
                    labels: crate::labels_of(&[("interface", interface)]),
                });
            }
        }
        Ok(discovered)
    }

    fn collect(&mut self) -> Result<Vec<DataPoint>, Error> {
        let timestamp = unix_ms_now();
        let current = self.read_allowed()?;

        let Some(previous) = self.last.take() else {
            self.last = Some(current);
            self.last_time = timestamp;
            return Ok(Vec::new());
        };

        let delta_secs = (timestamp - self.last_time) as f64 / 1000.0;
        if delta_secs <= 0.0 {
            self.last = Some(previous);
            return Ok(Vec::new());
        }

        let mut points = Vec::new();
        for (interface, curr) in &current {
            let Some(prev) = previous.get(interface) else {
                continue;
            };

            let labels = crate::labels_of(&[("interface", interface)]);
            for (name, _unit, counter) in NET_METRICS {
                let delta = counter(curr).saturating_sub(counter(prev)) as f64;
                points.push(DataPoint {
                    name: name.to_string(),
                    timestamp,
                    value: delta / delta_secs,
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

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeReader {
        samples: std::sync::Mutex<Vec<BTreeMap<String, NetCounters>>>,
    }

    impl NetDevReader for FakeReader {
        fn read(&self) -> Result<BTreeMap<String, NetCounters>, Error> {
            Ok(self.samples.lock().unwrap().remove(0))
        }
    }

    fn sample(interfaces: &[(&str, u64)]) -> BTreeMap<String, NetCounters> {
        interfaces
            .iter()
            .map(|(name, bytes)| {
                (
                    name.to_string(),
                    NetCounters {
                        bytes_recv: *bytes,
                        ..NetCounters::default()
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_deny_prefixes() {
        assert!(is_denied("lo"));
        assert!(is_denied("docker0"));
        assert!(is_denied("veth12ab"));
        assert!(is_denied("br-4f2a"));
        assert!(!is_denied("eth0"));
        assert!(!is_denied("enp3s0"));
        assert!(!is_denied("wlan0"));
    }

    #[test]
    fn test_denied_interfaces_are_excluded_everywhere() {
        let reader = FakeReader {
            samples: std::sync::Mutex::new(vec![sample(&[("eth0", 0), ("lo", 0)])]),
        };
        let mut collector = NetworkCollector::with_reader(Box::new(reader));

        let discovered = collector.discover().unwrap();
        assert!(discovered
            .iter()
            .all(|m| m.labels["interface"] == "eth0"));
    }

    #[test]
    fn test_rates_are_per_second() {
        let reader = FakeReader {
            samples: std::sync::Mutex::new(vec![
                sample(&[("eth0", 1000)]),
                sample(&[("eth0", 3000)]),
            ]),
        };
        let mut collector = NetworkCollector::with_reader(Box::new(reader));

        assert!(collector.collect().unwrap().is_empty());
        collector.last_time -= 2000; // pretend two seconds elapsed
        let points = collector.collect().unwrap();

        let recv = points
            .iter()
            .find(|dp| dp.name == "net_bytes_recv_bps")
            .unwrap();
        assert_eq!(recv.value, 1000.0);
    }
}
