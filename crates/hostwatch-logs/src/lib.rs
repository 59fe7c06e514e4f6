// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Log collection: file tailing with rotation-safe position tracking, plus
//! the structured journald reader on Linux. Collectors fan their entries
//! into a shared bounded channel; a single consumer converts them to wire
//! payloads and appends them to the log spool.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use hostwatch_core::collection::LogSourceSpec;
use hostwatch_core::error::Error;
use hostwatch_core::exporter::{Exporter, LogPayload};

pub mod fingerprint;
#[cfg(target_os = "linux")]
pub mod journald;
pub mod nginx;
pub mod positions;
pub mod registry;
pub mod tail;

/// Channel capacity between collectors and the spool consumer.
pub const LOG_CHANNEL_CAPACITY: usize = 1000;

/// A single collected log line with extracted labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    /// Collector the line came from (e.g. "nginx").
    pub source: String,
    /// Raw log message.
    pub text: String,
    pub labels: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
}

impl LogEntry {
    pub fn new(source: &str) -> Self {
        Self {
            timestamp: 0,
            source: source.to_string(),
            text: String::new(),
            labels: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Turns a raw line into a structured entry; `None` drops the line.
pub type Processor = dyn Fn(&str) -> Option<LogEntry> + Send + Sync;

#[async_trait]
pub trait LogCollector: Send {
    /// The collector's identifier (e.g. "nginx", "journald").
    fn name(&self) -> &'static str;

    /// Reports the log sources this collector can currently serve. Called
    /// during agent initialization to seed the control plane.
    fn discover(&self) -> Vec<LogSourceSpec>;

    /// Begins collection, emitting entries on `out` until `cancel` fires.
    async fn start(
        &mut self,
        cancel: CancellationToken,
        out: mpsc::Sender<LogEntry>,
    ) -> Result<(), Error>;

    /// Joins background work and flushes any persistent state.
    async fn stop(&mut self);
}

/// Orchestrates all log collectors for one supervisor cycle: starts them on
/// a shared channel, drains entries into the log spool, and stops them when
/// the scope is cancelled.
pub async fn run_collection(
    mut collectors: Vec<Box<dyn LogCollector>>,
    cancel: CancellationToken,
    exporter: Exporter,
) {
    let (tx, mut rx) = mpsc::channel::<LogEntry>(LOG_CHANNEL_CAPACITY);

    for collector in &mut collectors {
        if let Err(e) = collector.start(cancel.clone(), tx.clone()).await {
            error!(name = collector.name(), error = %e, "failed to start log collector");
        }
    }
    drop(tx);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            entry = rx.recv() => {
                let Some(entry) = entry else { break };
                let payload = to_payload(entry);
                if let Err(e) = exporter.export_logs(std::slice::from_ref(&payload)) {
                    error!(error = %e, "failed to export logs payload");
                }
            }
        }
    }

    info!("logs collection received stop signal");
    for collector in &mut collectors {
        collector.stop().await;
    }
}

pub fn discover_available(collectors: &[Box<dyn LogCollector>]) -> Vec<LogSourceSpec> {
    collectors.iter().flat_map(|c| c.discover()).collect()
}

/// Converts an entry to the wire payload, folding the source into labels.
pub fn to_payload(entry: LogEntry) -> LogPayload {
    let mut labels = entry.labels;
    labels.insert("source".to_string(), entry.source);

    LogPayload {
        timestamp: entry.timestamp.to_string(),
        labels,
        metadata: entry.metadata,
        message: entry.text,
    }
}
