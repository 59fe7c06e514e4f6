// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! CPU time ratios, derived from the delta between consecutive samples of
//! the kernel's cumulative per-core counters. The first collection only
//! captures the baseline and produces no points.

use hostwatch_core::collection::{MetricKind, MetricSpec};
use hostwatch_core::error::Error;
use hostwatch_core::exporter::unix_ms_now;

use crate::{filter_points, DataPoint, MetricCollector};

/// Cumulative times (in clock ticks) one core has spent in each state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuTimes {
    pub id: String,
    pub user: f64,
    pub nice: f64,
    pub system: f64,
    pub idle: f64,
    pub iowait: f64,
    pub irq: f64,
    pub softirq: f64,
    pub steal: f64,
    pub guest: f64,
    pub guest_nice: f64,
}

/// Platform access to per-core CPU times; implemented per-OS.
pub trait CpuTimesReader: Send {
    fn read(&self) -> Result<Vec<CpuTimes>, Error>;
}

const CPU_FIELDS: [&str; 10] = [
    "user", "system", "idle", "nice", "iowait", "irq", "softirq", "steal", "guest", "guest_nice",
];

pub struct CpuCollector {
    reader: Box<dyn CpuTimesReader>,
    last: Option<Vec<CpuTimes>>,
    included: Option<Vec<MetricSpec>>,
}

impl CpuCollector {
    pub fn new() -> Self {
        Self::with_reader(crate::platform_cpu_times_reader())
    }

    pub fn with_reader(reader: Box<dyn CpuTimesReader>) -> Self {
        Self {
            reader,
            last: None,
            included: None,
        }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricCollector for CpuCollector {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn discover(&mut self) -> Result<Vec<MetricSpec>, Error> {
        let cores = self.reader.read()?;

        let mut discovered = Vec::new();
        for core in &cores {
            push_specs(&mut discovered, &core.id);
        }
        push_specs(&mut discovered, "all");
        Ok(discovered)
    }

    fn collect(&mut self) -> Result<Vec<DataPoint>, Error> {
        let timestamp = unix_ms_now();
        let current = self.reader.read()?;

        let Some(previous) = self.last.take() else {
            self.last = Some(current);
            return Ok(Vec::new());
        };

        // A changed core set (hotplug) invalidates the whole cycle; the new
        // sample becomes the next baseline.
        if current.len() != previous.len() {
            let (prev_n, curr_n) = (previous.len(), current.len());
            self.last = Some(current);
            return Err(Error::Collector(
                "cpu".into(),
                format!("core count changed: previous={prev_n} current={curr_n}"),
            ));
        }

        let points = derive_ratios(&previous, &current, timestamp);
        self.last = Some(current);
        Ok(filter_points(points, self.included.as_deref()))
    }

    fn set_included(&mut self, specs: Vec<MetricSpec>) {
        self.included = Some(specs);
    }
}

fn push_specs(out: &mut Vec<MetricSpec>, core_id: &str) {
    for field in CPU_FIELDS {
        out.push(MetricSpec {
            name: format!("cpu_{field}_ratio"),
            kind: MetricKind::Gauge,
            unit: "%".to_string(),
            labels: crate::labels_of(&[("cpu", core_id)]),
        });
    }
}

/// State deltas for one core over a collection interval.
#[derive(Debug, Default, Clone, Copy)]
struct Deltas {
    user: f64,
    nice: f64,
    system: f64,
    idle: f64,
    iowait: f64,
    irq: f64,
    softirq: f64,
    steal: f64,
    guest: f64,
    guest_nice: f64,
}

impl Deltas {
    fn between(prev: &CpuTimes, curr: &CpuTimes) -> Self {
        Self {
            user: curr.user - prev.user,
            nice: curr.nice - prev.nice,
            system: curr.system - prev.system,
            idle: curr.idle - prev.idle,
            iowait: curr.iowait - prev.iowait,
            irq: curr.irq - prev.irq,
            softirq: curr.softirq - prev.softirq,
            steal: curr.steal - prev.steal,
            guest: curr.guest - prev.guest,
            guest_nice: curr.guest_nice - prev.guest_nice,
        }
    }

    /// Total time elapsed on this core. Guest time is carved out of user and
    /// nice so it is not counted twice.
    fn total(&self) -> f64 {
        (self.user - self.guest)
            + (self.nice - self.guest_nice)
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
            + self.guest
            + self.guest_nice
    }

    fn accumulate(&mut self, other: &Deltas) {
        self.user += other.user;
        self.nice += other.nice;
        self.system += other.system;
        self.idle += other.idle;
        self.iowait += other.iowait;
        self.irq += other.irq;
        self.softirq += other.softirq;
        self.steal += other.steal;
        self.guest += other.guest;
        self.guest_nice += other.guest_nice;
    }

    fn ratios(&self, total: f64) -> [(&'static str, f64); 10] {
        [
            ("cpu_user_ratio", (self.user - self.guest) / total),
            ("cpu_system_ratio", self.system / total),
            ("cpu_idle_ratio", self.idle / total),
            ("cpu_nice_ratio", (self.nice - self.guest_nice) / total),
            ("cpu_iowait_ratio", self.iowait / total),
            ("cpu_irq_ratio", self.irq / total),
            ("cpu_softirq_ratio", self.softirq / total),
            ("cpu_steal_ratio", self.steal / total),
            ("cpu_guest_ratio", self.guest / total),
            ("cpu_guest_nice_ratio", self.guest_nice / total),
        ]
    }
}

fn derive_ratios(previous: &[CpuTimes], current: &[CpuTimes], timestamp: i64) -> Vec<DataPoint> {
    let mut points = Vec::new();
    let mut all = Deltas::default();
    let mut all_total = 0.0;

    for (prev, curr) in previous.iter().zip(current) {
        let deltas = Deltas::between(prev, curr);
        let total = deltas.total();
        if total <= 0.0 {
            continue;
        }

        all.accumulate(&deltas);
        all_total += total;

        let labels = crate::labels_of(&[("cpu", &curr.id)]);
        for (name, value) in deltas.ratios(total) {
            points.push(DataPoint {
                name: name.to_string(),
                timestamp,
                value,
                labels: labels.clone(),
            });
        }
    }

    if all_total > 0.0 {
        let labels = crate::labels_of(&[("cpu", "all")]);
        for (name, value) in all.ratios(all_total) {
            points.push(DataPoint {
                name: name.to_string(),
                timestamp,
                value,
                labels: labels.clone(),
            });
        }
    }

    points
}
