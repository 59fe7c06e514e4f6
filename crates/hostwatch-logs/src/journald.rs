// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Structured system-journal collector (Linux only). Follows the journal
//! from its tail through `journalctl --output=json`, mapping syslog
//! priorities to severity labels.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use hostwatch_core::collection::LogSourceSpec;
use hostwatch_core::error::Error;

use crate::{LogCollector, LogEntry};

const SEVERITIES: [&str; 8] = [
    "emergency",
    "alert",
    "critical",
    "error",
    "warning",
    "notice",
    "info",
    "debug",
];

const DEFAULT_PRIORITY: usize = 6; // info

pub struct JournaldCollector {
    child: Option<Child>,
    task: Option<JoinHandle<()>>,
}

impl JournaldCollector {
    pub fn new() -> Self {
        Self {
            child: None,
            task: None,
        }
    }
}

impl Default for JournaldCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps one journal export record to a log entry. The realtime timestamp is
/// microseconds since the epoch; invalid or absent priorities default to
/// info.
pub fn parse_journal_record(raw: &str) -> Option<LogEntry> {
    let record: serde_json::Value = serde_json::from_str(raw).ok()?;

    let mut entry = LogEntry::new("journald");
    entry.text = record
        .get("MESSAGE")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let micros: i64 = record
        .get("__REALTIME_TIMESTAMP")
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    entry.timestamp = micros / 1000;

    let priority = record
        .get("PRIORITY")
        .and_then(|v| v.as_str())
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|p| *p < SEVERITIES.len())
        .unwrap_or(DEFAULT_PRIORITY);
    entry
        .labels
        .insert("priority".to_string(), SEVERITIES[priority].to_string());

    Some(entry)
}

#[async_trait]
impl LogCollector for JournaldCollector {
    fn name(&self) -> &'static str {
        "journald"
    }

    fn discover(&self) -> Vec<LogSourceSpec> {
        let available = std::process::Command::new("journalctl")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        if !available {
            return Vec::new();
        }
        vec![LogSourceSpec {
            name: self.name().to_string(),
            path: String::new(),
        }]
    }

    async fn start(
        &mut self,
        cancel: CancellationToken,
        out: mpsc::Sender<LogEntry>,
    ) -> Result<(), Error> {
        if self.child.is_some() {
            return Err(Error::Collector(
                "journald".into(),
                "collector already running".into(),
            ));
        }

        // --lines=0 seeks to the tail before following.
        let mut child = Command::new("journalctl")
            .args(["--follow", "--lines=0", "--output=json"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Collector("journald".into(), format!("spawn journalctl: {e}")))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Collector("journald".into(), "journalctl stdout unavailable".into())
        })?;

        self.child = Some(child);
        self.task = Some(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(raw)) => {
                                if let Some(entry) = parse_journal_record(&raw) {
                                    if out.send(entry).await.is_err() {
                                        return;
                                    }
                                } else {
                                    debug!("skipping unparsable journal record");
                                }
                            }
                            Ok(None) => return,
                            Err(e) => {
                                error!(error = %e, "journal read failed");
                                return;
                            }
                        }
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        if let Some(mut child) = self.child.take() {
            let _ = child.kill().await;
        }
    }
}
