// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Glob-matched file tailer. Each matched file gets its own task that
//! follows the file by polling (no inotify dependence), reopens it when it
//! is rotated or truncated, and records its read position in a shared map
//! that is persisted every ten minutes and on stop.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use hostwatch_core::error::Error;

use crate::fingerprint::file_fingerprint;
use crate::positions::{self, PositionEntry};
use crate::{LogEntry, Processor};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const POSITIONS_SAVE_INTERVAL: Duration = Duration::from_secs(10 * 60);
const READ_CHUNK: usize = 8192;

type PositionMap = Arc<Mutex<BTreeMap<String, PositionEntry>>>;

pub struct TailRunner {
    pattern: String,
    processor: Arc<Processor>,
    positions: PositionMap,
    positions_path: PathBuf,
    tasks: Vec<JoinHandle<()>>,
}

impl TailRunner {
    /// Verifies the matched files are readable and loads the persisted
    /// position map. A corrupt or unreadable position file degrades to an
    /// empty map rather than blocking collection.
    pub fn new(
        pattern: &str,
        positions_path: PathBuf,
        processor: Arc<Processor>,
    ) -> Result<Self, Error> {
        for path in expand(pattern)? {
            std::fs::File::open(&path).map_err(|e| {
                Error::Collector("tail".into(), format!("cannot read {}: {e}", path.display()))
            })?;
        }

        let positions = match positions::load(&positions_path) {
            Ok(map) => map,
            Err(e) => {
                error!(error = %e, "cannot load positions file, starting with an empty map");
                BTreeMap::new()
            }
        };

        Ok(Self {
            pattern: pattern.to_string(),
            processor,
            positions: Arc::new(Mutex::new(positions)),
            positions_path,
            tasks: Vec::new(),
        })
    }

    pub fn start(
        &mut self,
        cancel: CancellationToken,
        out: mpsc::Sender<LogEntry>,
    ) -> Result<(), Error> {
        let files = expand(&self.pattern)?;

        // Periodic position persistence.
        {
            let positions = Arc::clone(&self.positions);
            let path = self.positions_path.clone();
            let cancel = cancel.clone();
            self.tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(POSITIONS_SAVE_INTERVAL);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = ticker.tick() => save_positions(&path, &positions),
                    }
                }
            }));
        }

        for path in files {
            let offset = {
                let map = self.positions.lock().expect("position map poisoned");
                positions::resume_offset(&map, &path)
            };
            debug!(file = %path.display(), offset, "tailing file");

            let tailer = FileTailer {
                path,
                positions: Arc::clone(&self.positions),
                processor: Arc::clone(&self.processor),
            };
            let cancel = cancel.clone();
            let out = out.clone();
            self.tasks
                .push(tokio::spawn(async move { tailer.run(offset, cancel, out).await }));
        }
        Ok(())
    }

    /// Joins the per-file tasks (they exit once the cancellation token used
    /// in `start` has fired) and flushes positions.
    pub async fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        save_positions(&self.positions_path, &self.positions);
    }
}

fn expand(pattern: &str) -> Result<Vec<PathBuf>, Error> {
    let paths = glob::glob(pattern)
        .map_err(|e| Error::Collector("tail".into(), format!("bad glob {pattern}: {e}")))?;
    Ok(paths.filter_map(Result::ok).collect())
}

fn save_positions(path: &Path, positions: &PositionMap) {
    let map = positions.lock().expect("position map poisoned");
    if let Err(e) = positions::save(path, &map) {
        error!(error = %e, "cannot save positions to disk");
    }
}

struct FileTailer {
    path: PathBuf,
    positions: PositionMap,
    processor: Arc<Processor>,
}

impl FileTailer {
    async fn run(&self, start_offset: u64, cancel: CancellationToken, out: mpsc::Sender<LogEntry>) {
        let mut state = TailState {
            file: None,
            device_id: 0,
            read_pos: start_offset,
            pending: Vec::new(),
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(file = %self.path.display(), "stopping tailer");
                    return;
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    if self.poll(&mut state, &out).await.is_err() {
                        // Receiver closed: collection is shutting down.
                        return;
                    }
                }
            }
        }
    }

    /// One poll cycle: handle rotation, then drain whatever the file grew.
    async fn poll(&self, state: &mut TailState, out: &mpsc::Sender<LogEntry>) -> Result<(), ()> {
        if state.file.is_none() {
            self.open(state).await;
        } else if self.rotated(state) {
            // Finish the renamed/truncated file through the old handle
            // before switching to its replacement.
            self.drain(state, out).await?;
            if !state.pending.is_empty() {
                debug!(file = %self.path.display(), "discarding partial line at rotation");
            }
            info!(file = %self.path.display(), "file rotated, reopening");
            *state = TailState {
                file: None,
                device_id: 0,
                read_pos: 0,
                pending: Vec::new(),
            };
            self.open(state).await;
        }

        if state.file.is_some() {
            self.drain(state, out).await?;
        }
        Ok(())
    }

    async fn open(&self, state: &mut TailState) {
        match File::open(&self.path).await {
            Ok(mut file) => {
                if state.read_pos > 0
                    && file.seek(SeekFrom::Start(state.read_pos)).await.is_err()
                {
                    state.read_pos = 0;
                }
                state.device_id = file_fingerprint(&self.path)
                    .map(|fp| fp.device_id)
                    .unwrap_or(0);
                state.file = Some(file);
            }
            Err(e) => {
                debug!(file = %self.path.display(), error = %e, "waiting for file");
            }
        }
    }

    /// The file was replaced (new inode) or shrank below our position.
    fn rotated(&self, state: &TailState) -> bool {
        match std::fs::metadata(&self.path) {
            Ok(meta) => {
                let current_id = file_fingerprint(&self.path)
                    .map(|fp| fp.device_id)
                    .unwrap_or(state.device_id);
                current_id != state.device_id || meta.len() < state.committed()
            }
            // Mid-rotation window: the path is gone but the old handle is
            // still valid, keep draining it.
            Err(_) => false,
        }
    }

    /// Reads to EOF, emits every complete line, and commits the position.
    async fn drain(&self, state: &mut TailState, out: &mpsc::Sender<LogEntry>) -> Result<(), ()> {
        let Some(file) = state.file.as_mut() else {
            return Ok(());
        };

        let mut buf = [0u8; READ_CHUNK];
        let mut got_data = false;
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    state.pending.extend_from_slice(&buf[..n]);
                    state.read_pos += n as u64;
                    got_data = true;
                }
                Err(e) => {
                    debug!(file = %self.path.display(), error = %e, "read failed");
                    break;
                }
            }
        }

        if !got_data {
            return Ok(());
        }

        while let Some(idx) = state.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = state.pending.drain(..=idx).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            if let Some(entry) = (self.processor)(&line) {
                if out.send(entry).await.is_err() {
                    return Err(());
                }
            }
        }

        self.commit(state.committed());
        Ok(())
    }

    fn commit(&self, offset: u64) {
        let Ok(fp) = file_fingerprint(&self.path) else {
            return;
        };
        let key = self.path.to_string_lossy().into_owned();
        let mut map = self.positions.lock().expect("position map poisoned");
        map.insert(
            key.clone(),
            PositionEntry {
                path: key,
                fingerprint: fp,
                offset,
            },
        );
    }
}

struct TailState {
    file: Option<File>,
    device_id: u64,
    /// Absolute file position after the last read.
    read_pos: u64,
    /// Bytes read but not yet terminated by a newline.
    pending: Vec<u8>,
}

impl TailState {
    /// Position up to and including the last emitted newline; this is what
    /// gets persisted, so a restart re-reads at most a partial line.
    fn committed(&self) -> u64 {
        self.read_pos - self.pending.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn passthrough(source: &'static str) -> Arc<Processor> {
        Arc::new(move |line: &str| {
            let mut entry = LogEntry::new(source);
            entry.text = line.to_string();
            Some(entry)
        })
    }

    async fn recv_line(rx: &mut mpsc::Receiver<LogEntry>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for log entry")
            .expect("channel closed")
            .text
    }

    fn append(path: &Path, data: &str) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn log_path(&self) -> PathBuf {
            self.dir.path().join("app.log")
        }

        fn pattern(&self) -> String {
            self.dir.path().join("*.log").to_string_lossy().into_owned()
        }

        fn positions_path(&self) -> PathBuf {
            self.dir.path().join("positions.json")
        }

        fn runner(&self) -> TailRunner {
            TailRunner::new(&self.pattern(), self.positions_path(), passthrough("test")).unwrap()
        }
    }

    #[tokio::test]
    async fn test_tails_existing_and_new_lines() {
        let fx = Fixture::new();
        append(&fx.log_path(), "one\ntwo\n");

        let mut runner = fx.runner();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        runner.start(cancel.clone(), tx).unwrap();

        assert_eq!(recv_line(&mut rx).await, "one");
        assert_eq!(recv_line(&mut rx).await, "two");

        append(&fx.log_path(), "three\n");
        assert_eq!(recv_line(&mut rx).await, "three");

        cancel.cancel();
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_partial_lines_wait_for_newline() {
        let fx = Fixture::new();
        append(&fx.log_path(), "complete\npart");

        let mut runner = fx.runner();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        runner.start(cancel.clone(), tx).unwrap();

        assert_eq!(recv_line(&mut rx).await, "complete");

        append(&fx.log_path(), "ial\n");
        assert_eq!(recv_line(&mut rx).await, "partial");

        cancel.cancel();
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_restart_resumes_without_duplicates() {
        let fx = Fixture::new();
        append(&fx.log_path(), "a\nb\n");

        {
            let mut runner = fx.runner();
            let cancel = CancellationToken::new();
            let (tx, mut rx) = mpsc::channel(16);
            runner.start(cancel.clone(), tx).unwrap();
            assert_eq!(recv_line(&mut rx).await, "a");
            assert_eq!(recv_line(&mut rx).await, "b");
            cancel.cancel();
            runner.stop().await;
        }

        append(&fx.log_path(), "c\n");

        let mut runner = fx.runner();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        runner.start(cancel.clone(), tx).unwrap();

        // Only the line appended while stopped shows up.
        assert_eq!(recv_line(&mut rx).await, "c");
        cancel.cancel();
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_truncated_file_restarts_from_zero() {
        let fx = Fixture::new();
        append(&fx.log_path(), "old-1\nold-2\n");

        let mut runner = fx.runner();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        runner.start(cancel.clone(), tx).unwrap();
        assert_eq!(recv_line(&mut rx).await, "old-1");
        assert_eq!(recv_line(&mut rx).await, "old-2");

        // Truncate-and-replace, as copytruncate rotation does.
        std::fs::write(fx.log_path(), "new-1\n").unwrap();
        assert_eq!(recv_line(&mut rx).await, "new-1");

        cancel.cancel();
        runner.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rename_rotation_reads_old_then_new() {
        let fx = Fixture::new();
        append(&fx.log_path(), "before\n");

        let mut runner = fx.runner();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        runner.start(cancel.clone(), tx).unwrap();
        assert_eq!(recv_line(&mut rx).await, "before");

        // Move the file aside, write a final line to the renamed file, and
        // create its empty replacement.
        let rotated = fx.dir.path().join("app.log.1");
        std::fs::rename(fx.log_path(), &rotated).unwrap();
        append(&rotated, "last-of-old\n");
        append(&fx.log_path(), "");

        assert_eq!(recv_line(&mut rx).await, "last-of-old");

        append(&fx.log_path(), "first-of-new\n");
        assert_eq!(recv_line(&mut rx).await, "first-of-new");

        cancel.cancel();
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_stop_persists_positions() {
        let fx = Fixture::new();
        append(&fx.log_path(), "a\n");

        let mut runner = fx.runner();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        runner.start(cancel.clone(), tx).unwrap();
        assert_eq!(recv_line(&mut rx).await, "a");
        cancel.cancel();
        runner.stop().await;

        let saved = positions::load(&fx.positions_path()).unwrap();
        let entry = saved
            .get(&fx.log_path().to_string_lossy().into_owned())
            .expect("position entry for tailed file");
        assert_eq!(entry.offset, 2);
    }

    #[tokio::test]
    async fn test_processor_can_drop_lines() {
        let fx = Fixture::new();
        append(&fx.log_path(), "keep\ndrop\nkeep\n");

        let processor: Arc<Processor> = Arc::new(|line: &str| {
            if line == "drop" {
                return None;
            }
            let mut entry = LogEntry::new("test");
            entry.text = line.to_string();
            Some(entry)
        });
        let mut runner =
            TailRunner::new(&fx.pattern(), fx.positions_path(), processor).unwrap();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        runner.start(cancel.clone(), tx).unwrap();

        assert_eq!(recv_line(&mut rx).await, "keep");
        assert_eq!(recv_line(&mut rx).await, "keep");

        cancel.cancel();
        runner.stop().await;
    }
}
