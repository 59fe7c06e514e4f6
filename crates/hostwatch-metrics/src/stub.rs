// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Counter-source stubs for platforms without /proc. The affected
//! collectors surface `PlatformUnsupported` and are skipped by the
//! scheduler's per-collector error isolation.

use std::collections::BTreeMap;

use hostwatch_core::error::Error;

use crate::cpu::{CpuTimes, CpuTimesReader};
use crate::diskio::{DiskIoCounters, DiskIoReader};
use crate::network::{NetCounters, NetDevReader};

pub struct UnsupportedReader;

impl CpuTimesReader for UnsupportedReader {
    fn read(&self) -> Result<Vec<CpuTimes>, Error> {
        Err(Error::PlatformUnsupported("per-state cpu times"))
    }
}

impl DiskIoReader for UnsupportedReader {
    fn read(&self) -> Result<BTreeMap<String, DiskIoCounters>, Error> {
        Err(Error::PlatformUnsupported("block device counters"))
    }
}

impl NetDevReader for UnsupportedReader {
    fn read(&self) -> Result<BTreeMap<String, NetCounters>, Error> {
        Err(Error::PlatformUnsupported("network interface counters"))
    }
}
