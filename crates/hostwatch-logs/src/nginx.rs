// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Nginx access-log collector: tails `/var/log/nginx/*.log`, extracting the
//! request timestamp from the standard access-log format.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hostwatch_core::collection::LogSourceSpec;
use hostwatch_core::error::Error;

use crate::tail::TailRunner;
use crate::{LogCollector, LogEntry, Processor};

const DEFAULT_PATTERN: &str = "/var/log/nginx/*.log";
const TIMESTAMP_REGEX: &str =
    r"\[(?P<timestamp>\d{2}/\w{3}/\d{4}:\d{2}:\d{2}:\d{2} [+-]\d{4})\]";
const TIMESTAMP_LAYOUT: &str = "%d/%b/%Y:%H:%M:%S %z";

pub struct NginxLogCollector {
    pattern: String,
    positions_path: PathBuf,
    runner: Option<TailRunner>,
}

impl NginxLogCollector {
    pub fn new(positions_path: PathBuf) -> Self {
        Self::with_pattern(DEFAULT_PATTERN, positions_path)
    }

    pub fn with_pattern(pattern: &str, positions_path: PathBuf) -> Self {
        Self {
            pattern: pattern.to_string(),
            positions_path,
            runner: None,
        }
    }
}

/// Parses one access-log line. Lines without the bracketed timestamp are
/// dropped; named capture groups become labels, with the timestamp group
/// consumed into the entry's timestamp field.
pub fn process_line(regex: &Regex, source: &str, line: &str) -> Option<LogEntry> {
    let captures = regex.captures(line)?;

    let mut entry = LogEntry::new(source);
    entry.text = line.to_string();
    for name in regex.capture_names().flatten() {
        if let Some(value) = captures.name(name) {
            entry
                .labels
                .insert(name.to_string(), value.as_str().to_string());
        }
    }

    if let Some(raw) = entry.labels.remove("timestamp") {
        let parsed = DateTime::parse_from_str(&raw, TIMESTAMP_LAYOUT).ok()?;
        entry.timestamp = parsed.timestamp_millis();
    }

    Some(entry)
}

#[async_trait]
impl LogCollector for NginxLogCollector {
    fn name(&self) -> &'static str {
        "nginx"
    }

    fn discover(&self) -> Vec<LogSourceSpec> {
        let matched = glob::glob(&self.pattern)
            .map(|paths| paths.filter_map(Result::ok).count())
            .unwrap_or(0);
        if matched == 0 {
            return Vec::new();
        }
        vec![LogSourceSpec {
            name: self.name().to_string(),
            path: self.pattern.clone(),
        }]
    }

    async fn start(
        &mut self,
        cancel: CancellationToken,
        out: mpsc::Sender<LogEntry>,
    ) -> Result<(), Error> {
        if self.runner.is_none() {
            let regex = Regex::new(TIMESTAMP_REGEX)
                .map_err(|e| Error::Collector("nginx".into(), e.to_string()))?;
            let name = self.name();
            let processor: Arc<Processor> =
                Arc::new(move |line: &str| process_line(&regex, name, line));
            self.runner = Some(TailRunner::new(
                &self.pattern,
                self.positions_path.clone(),
                processor,
            )?);
        }
        match self.runner.as_mut() {
            Some(runner) => runner.start(cancel, out),
            None => Ok(()),
        }
    }

    async fn stop(&mut self) {
        if let Some(runner) = self.runner.as_mut() {
            runner.stop().await;
        }
    }
}
