// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable delivery pipeline: producers append payloads to a per-stream
//! spool, and one flusher per stream drains it in bounded batches to the
//! remote sink. Delivery is at-least-once; a crash between a sink ack and
//! the spool rewrite replays the last batch.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::api::HTTP_TIMEOUT;
use crate::authguard::AuthGuard;
use crate::config::AgentConfig;
use crate::error::Error;
use crate::paths;
use crate::spool::Spool;

pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_BATCH_SIZE: usize = 100;
pub const MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

pub const METRICS_SPOOL_FILENAME: &str = "metrics.jsonl";
pub const LOGS_SPOOL_FILENAME: &str = "logs.jsonl";

/// Wire format for one metric sample. The timestamp is unix milliseconds
/// rendered as a string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPayload {
    pub timestamp: String,
    pub labels: BTreeMap<String, String>,
    pub name: String,
    pub value: f64,
}

/// Wire format for one log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPayload {
    pub timestamp: String,
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub message: String,
}

/// A spoolable record: anything carrying a millisecond timestamp the
/// staleness cutoff can read.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn timestamp_ms(&self) -> Option<i64>;
}

impl Payload for MetricPayload {
    fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp.parse().ok()
    }
}

impl Payload for LogPayload {
    fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp.parse().ok()
    }
}

/// Where a flusher delivers its batches.
#[derive(Debug, Clone)]
enum Sink {
    Remote {
        http: reqwest::Client,
        url: String,
        api_key: String,
        auth: Arc<AuthGuard>,
    },
    /// Dry-run shim: batches are pretty-printed to stdout instead of posted.
    Stdout,
}

/// Owns the two spools and hands producers an append-only interface.
#[derive(Debug, Clone)]
pub struct Exporter {
    metrics_spool: Spool,
    logs_spool: Spool,
    metrics_sink: Sink,
    logs_sink: Sink,
}

impl Exporter {
    pub fn new(
        install_dir: &Path,
        cfg: &AgentConfig,
        auth: Arc<AuthGuard>,
    ) -> Result<Self, Error> {
        let spool_dir = Self::ensure_spool_dir(install_dir)?;
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(Error::HttpTransport)?;

        Ok(Self {
            metrics_spool: Spool::new(spool_dir.join(METRICS_SPOOL_FILENAME)),
            logs_spool: Spool::new(spool_dir.join(LOGS_SPOOL_FILENAME)),
            metrics_sink: Sink::Remote {
                http: http.clone(),
                url: cfg.metrics_export_url.clone(),
                api_key: cfg.api_key.clone(),
                auth: Arc::clone(&auth),
            },
            logs_sink: Sink::Remote {
                http,
                url: cfg.logs_export_url.clone(),
                api_key: cfg.api_key.clone(),
                auth,
            },
        })
    }

    /// Dry-run exporter: spools normally, flushes to stdout.
    pub fn dry_run(install_dir: &Path) -> Result<Self, Error> {
        let spool_dir = Self::ensure_spool_dir(install_dir)?;
        Ok(Self {
            metrics_spool: Spool::new(spool_dir.join(METRICS_SPOOL_FILENAME)),
            logs_spool: Spool::new(spool_dir.join(LOGS_SPOOL_FILENAME)),
            metrics_sink: Sink::Stdout,
            logs_sink: Sink::Stdout,
        })
    }

    fn ensure_spool_dir(install_dir: &Path) -> Result<std::path::PathBuf, Error> {
        let spool_dir = paths::spool_dir(install_dir);
        std::fs::create_dir_all(&spool_dir).map_err(Error::SpoolIo)?;
        Ok(spool_dir)
    }

    pub fn export_metrics(&self, metrics: &[MetricPayload]) -> Result<(), Error> {
        for metric in metrics {
            self.metrics_spool.append(metric)?;
        }
        if !metrics.is_empty() {
            debug!(count = metrics.len(), "appended metrics to spool");
        }
        Ok(())
    }

    pub fn export_logs(&self, logs: &[LogPayload]) -> Result<(), Error> {
        for log in logs {
            self.logs_spool.append(log)?;
        }
        Ok(())
    }

    /// Spawns the two stream flushers under the given cancellation scope.
    pub fn start_flushers(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let metrics = Flusher::<MetricPayload>::new(
            self.metrics_spool.clone(),
            self.metrics_sink.clone(),
        );
        let logs = Flusher::<LogPayload>::new(self.logs_spool.clone(), self.logs_sink.clone());

        let metrics_cancel = cancel.clone();
        let logs_cancel = cancel.clone();
        vec![
            tokio::spawn(async move { metrics.run(metrics_cancel).await }),
            tokio::spawn(async move { logs.run(logs_cancel).await }),
        ]
    }
}

/// Periodic batched reader of one spool.
pub struct Flusher<P: Payload> {
    spool: Spool,
    sink: Sink,
    _payload: std::marker::PhantomData<fn() -> P>,
}

impl<P: Payload> Flusher<P> {
    fn new(spool: Spool, sink: Sink) -> Self {
        Self {
            spool,
            sink,
            _payload: std::marker::PhantomData,
        }
    }

    /// Builds a flusher posting `spool` batches to `url` with the opaque
    /// sink credential. Exposed for the delivery tests.
    pub fn for_sink(spool: Spool, url: String, api_key: String, auth: Arc<AuthGuard>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("http client construction cannot fail with static config");
        Self::new(
            spool,
            Sink::Remote {
                http,
                url,
                api_key,
                auth,
            },
        )
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        ticker.tick().await; // discard the immediate first tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // One last batch attempt so a clean shutdown drains what
                    // it can without blocking on a dead sink.
                    if let Err(e) = self.flush_once().await {
                        debug!(error = %e, "final flush failed");
                    }
                    return;
                }
                _ = ticker.tick() => {
                    self.flush_all(&cancel).await;
                }
            }
        }
    }

    /// Drains the spool batch by batch until it is empty, a batch fails, or
    /// the supervisor cancels.
    pub async fn flush_all(&self, cancel: &CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.flush_once().await {
                Ok(true) => tokio::time::sleep(Duration::from_millis(10)).await,
                Ok(false) => return,
                Err(e) => {
                    error!(spool = %self.spool.path().display(), error = %e, "flush failed");
                    return;
                }
            }
        }
    }

    /// Sends at most one batch. Returns `true` iff records remain after a
    /// successful send. A failed send leaves the spool untouched so the
    /// same prefix is retried next cycle, preserving order.
    pub async fn flush_once(&self) -> Result<bool, Error> {
        let lines = self.spool.read_lines()?;
        if lines.is_empty() {
            return Ok(false);
        }

        let batch_size = lines.len().min(MAX_BATCH_SIZE);
        let cutoff = unix_ms_now() - MAX_AGE.as_millis() as i64;

        let mut to_send: Vec<P> = Vec::new();
        for raw in &lines[..batch_size] {
            if raw.trim().is_empty() {
                continue;
            }
            let payload: P = match serde_json::from_str(raw) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(line = raw.as_str(), error = %e, "dropping corrupt spool entry");
                    continue;
                }
            };
            if let Some(ts) = payload.timestamp_ms() {
                if ts < cutoff {
                    warn!(timestamp = ts, "dropping stale spool entry");
                    continue;
                }
            }
            to_send.push(payload);
        }

        if !to_send.is_empty() {
            self.send(&to_send).await?;
            debug!(count = to_send.len(), "sent batch");
        }

        let keep = &lines[batch_size..];
        self.spool.rewrite(keep)?;
        Ok(!keep.is_empty())
    }

    async fn send(&self, batch: &[P]) -> Result<(), Error> {
        match &self.sink {
            Sink::Stdout => {
                let pretty = serde_json::to_string_pretty(batch)
                    .unwrap_or_else(|e| format!("<unprintable batch: {e}>"));
                println!("[dry-run] would send payload: {pretty}");
                Ok(())
            }
            Sink::Remote {
                http,
                url,
                api_key,
                auth,
            } => {
                let response = http
                    .post(url)
                    .header("Authorization", api_key)
                    .header("Content-Type", "application/json")
                    .json(batch)
                    .send()
                    .await?;

                let status = response.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    auth.on_unauthorized();
                }
                if status != StatusCode::NO_CONTENT {
                    return Err(Error::HttpStatus(status.as_u16()));
                }
                Ok(())
            }
        }
    }
}

pub fn unix_ms_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
