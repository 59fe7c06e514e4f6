// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Emits `heartbeat = 1` on every tick so the backend can detect a silent
//! host. Always enabled, never filtered.

use hostwatch_core::collection::MetricSpec;
use hostwatch_core::error::Error;
use hostwatch_core::exporter::unix_ms_now;

use crate::{DataPoint, MetricCollector};

pub struct HeartbeatCollector;

impl HeartbeatCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HeartbeatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricCollector for HeartbeatCollector {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    fn discover(&mut self) -> Result<Vec<MetricSpec>, Error> {
        // Not advertised: the backend assumes every agent heartbeats.
        Ok(Vec::new())
    }

    fn collect(&mut self) -> Result<Vec<DataPoint>, Error> {
        Ok(vec![DataPoint {
            name: "heartbeat".to_string(),
            timestamp: unix_ms_now(),
            value: 1.0,
            labels: Default::default(),
        }])
    }

    fn set_included(&mut self, _specs: Vec<MetricSpec>) {}
}
