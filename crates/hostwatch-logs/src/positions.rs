// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Persisted tail positions: one entry per tailed file, rewritten as a
//! whole JSON document via temp file + rename.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use hostwatch_core::error::Error;

use crate::fingerprint::{file_fingerprint, Fingerprint};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub path: String,
    pub fingerprint: Fingerprint,
    pub offset: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PositionState {
    positions: Vec<PositionEntry>,
}

/// Loads the position map. A missing file is an empty map.
pub fn load(path: &Path) -> Result<BTreeMap<String, PositionEntry>, Error> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "positions file not found, starting empty");
            return Ok(BTreeMap::new());
        }
        Err(e) => return Err(Error::PositionIo(e)),
    };

    let state: PositionState = serde_json::from_slice(&data)?;
    Ok(state
        .positions
        .into_iter()
        .map(|entry| (entry.path.clone(), entry))
        .collect())
}

/// Atomically rewrites the position document.
pub fn save(path: &Path, positions: &BTreeMap<String, PositionEntry>) -> Result<(), Error> {
    let state = PositionState {
        positions: positions.values().cloned().collect(),
    };
    let data = serde_json::to_vec(&state)?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data).map_err(Error::PositionIo)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::PositionIo(e));
    }
    Ok(())
}

/// Resolves where tailing of `path` should resume.
///
/// A stored entry applies iff its inode still matches and its size has not
/// shrunk below the current file (a shrink means truncation or a fresh file
/// reusing the inode). The path entry is preferred; otherwise any entry
/// with a matching fingerprint is accepted, which finds files that were
/// renamed while the agent was down.
pub fn resume_offset(positions: &BTreeMap<String, PositionEntry>, path: &Path) -> u64 {
    let Ok(current) = file_fingerprint(path) else {
        return 0;
    };

    let matches = |entry: &PositionEntry| {
        entry.fingerprint.device_id == current.device_id && entry.fingerprint.size <= current.size
    };

    if let Some(entry) = positions.get(&path.to_string_lossy().into_owned()) {
        if matches(entry) {
            return entry.offset;
        }
    }
    positions
        .values()
        .find(|entry| matches(entry))
        .map(|entry| entry.offset)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, device_id: u64, size: u64, offset: u64) -> PositionEntry {
        PositionEntry {
            path: path.to_string(),
            fingerprint: Fingerprint { device_id, size },
            offset,
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");

        let mut positions = BTreeMap::new();
        positions.insert("/var/log/a.log".to_string(), entry("/var/log/a.log", 7, 100, 42));
        save(&path, &positions).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded, positions);

        // No temp file left behind.
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("positions.json")).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_resume_prefers_path_match() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.log");
        std::fs::write(&file, "0123456789").unwrap();
        let fp = file_fingerprint(&file).unwrap();

        let mut positions = BTreeMap::new();
        positions.insert(
            file.to_string_lossy().into_owned(),
            entry(&file.to_string_lossy(), fp.device_id, fp.size, 4),
        );

        assert_eq!(resume_offset(&positions, &file), 4);
    }

    #[cfg(unix)]
    #[test]
    fn test_resume_by_fingerprint_after_rename() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("a.log");
        std::fs::write(&old, "0123456789").unwrap();
        let fp = file_fingerprint(&old).unwrap();

        // The map still points at the old path, but the file was renamed.
        let mut positions = BTreeMap::new();
        positions.insert(
            old.to_string_lossy().into_owned(),
            entry(&old.to_string_lossy(), fp.device_id, fp.size, 7),
        );
        let renamed = dir.path().join("a.log.1");
        std::fs::rename(&old, &renamed).unwrap();

        assert_eq!(resume_offset(&positions, &renamed), 7);
    }

    #[cfg(unix)]
    #[test]
    fn test_resume_rejects_shrunken_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.log");
        std::fs::write(&file, "0123456789").unwrap();
        let fp = file_fingerprint(&file).unwrap();

        // Stored size exceeds the current file: it was truncated/replaced.
        let mut positions = BTreeMap::new();
        positions.insert(
            file.to_string_lossy().into_owned(),
            entry(&file.to_string_lossy(), fp.device_id, fp.size + 100, 9999),
        );

        assert_eq!(resume_offset(&positions, &file), 0);
    }

    #[test]
    fn test_resume_unknown_file_starts_at_zero() {
        let positions = BTreeMap::new();
        assert_eq!(resume_offset(&positions, Path::new("/no/such/file")), 0);
    }
}
