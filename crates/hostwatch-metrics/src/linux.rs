// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Linux counter sources: the CPU, disk-I/O and network readers parse the
//! kernel's `/proc` text interfaces directly.

use std::collections::BTreeMap;
use std::fs;

use hostwatch_core::error::Error;

use crate::cpu::{CpuTimes, CpuTimesReader};
use crate::diskio::{DiskIoCounters, DiskIoReader};
use crate::network::{NetCounters, NetDevReader};

const PROC_STAT_PATH: &str = "/proc/stat";
const PROC_DISKSTATS_PATH: &str = "/proc/diskstats";
const PROC_NET_DEV_PATH: &str = "/proc/net/dev";

const SECTOR_SIZE: u64 = 512;

fn read_proc(path: &str, collector: &str) -> Result<String, Error> {
    fs::read_to_string(path)
        .map_err(|e| Error::Collector(collector.to_string(), format!("read {path}: {e}")))
}

pub struct ProcStatReader;

impl CpuTimesReader for ProcStatReader {
    fn read(&self) -> Result<Vec<CpuTimes>, Error> {
        Ok(parse_proc_stat(&read_proc(PROC_STAT_PATH, "cpu")?))
    }
}

/// Parses the per-core `cpuN` lines of /proc/stat. The aggregate `cpu` line
/// is skipped; the collector derives its own "all" series.
pub fn parse_proc_stat(content: &str) -> Vec<CpuTimes> {
    let mut cores = Vec::new();
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else { continue };
        if !label.starts_with("cpu") || label == "cpu" {
            continue;
        }

        let mut values = fields.map(|v| v.parse::<f64>().unwrap_or(0.0));
        let mut next = || values.next().unwrap_or(0.0);
        cores.push(CpuTimes {
            id: label.trim_start_matches("cpu").to_string(),
            user: next(),
            nice: next(),
            system: next(),
            idle: next(),
            iowait: next(),
            irq: next(),
            softirq: next(),
            steal: next(),
            guest: next(),
            guest_nice: next(),
        });
    }
    cores
}

pub struct ProcDiskstatsReader;

impl DiskIoReader for ProcDiskstatsReader {
    fn read(&self) -> Result<BTreeMap<String, DiskIoCounters>, Error> {
        Ok(parse_proc_diskstats(&read_proc(
            PROC_DISKSTATS_PATH,
            "diskio",
        )?))
    }
}

/// Parses /proc/diskstats. Field layout (after major/minor/name):
/// reads, reads merged, sectors read, ms reading, writes, writes merged,
/// sectors written, ms writing, in-flight, ms doing io, weighted ms.
pub fn parse_proc_diskstats(content: &str) -> BTreeMap<String, DiskIoCounters> {
    let mut devices = BTreeMap::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 14 {
            continue;
        }
        let name = fields[2].to_string();
        let at = |i: usize| fields[i].parse::<u64>().unwrap_or(0);

        devices.insert(
            name,
            DiskIoCounters {
                read_count: at(3),
                read_bytes: at(5) * SECTOR_SIZE,
                read_time_ms: at(6),
                write_count: at(7),
                write_bytes: at(9) * SECTOR_SIZE,
                write_time_ms: at(10),
                io_time_ms: at(12),
            },
        );
    }
    devices
}

pub struct ProcNetDevReader;

impl NetDevReader for ProcNetDevReader {
    fn read(&self) -> Result<BTreeMap<String, NetCounters>, Error> {
        Ok(parse_proc_net_dev(&read_proc(PROC_NET_DEV_PATH, "net")?))
    }
}

/// Parses /proc/net/dev: two header lines, then
/// `iface: rx_bytes rx_packets rx_errs rx_drop ... tx_bytes tx_packets tx_errs tx_drop ...`.
pub fn parse_proc_net_dev(content: &str) -> BTreeMap<String, NetCounters> {
    let mut interfaces = BTreeMap::new();
    for line in content.lines().skip(2) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<u64> = counters
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        if fields.len() < 12 {
            continue;
        }

        interfaces.insert(
            name.trim().to_string(),
            NetCounters {
                bytes_recv: fields[0],
                packets_recv: fields[1],
                errin: fields[2],
                dropin: fields[3],
                bytes_sent: fields[8],
                packets_sent: fields[9],
                errout: fields[10],
                dropout: fields[11],
            },
        );
    }
    interfaces
}
