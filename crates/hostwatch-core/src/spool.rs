// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Append-only durable queue: one serialized payload per line, newline
//! terminated. Appends go through a single `O_APPEND` write so readers only
//! ever observe whole lines; rewrites go through a temp file + rename so a
//! crash never leaves a half-written spool behind.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct Spool {
    path: PathBuf,
}

impl Spool {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Appends one record. The record and its trailing newline are written
    /// in a single call so concurrent readers never see a partial line.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<(), Error> {
        let mut line = serde_json::to_vec(record).map_err(Error::ConfigParse)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(Error::SpoolIo)?;
        file.write_all(&line).map_err(Error::SpoolIo)?;
        Ok(())
    }

    /// Reads every complete line currently in the spool. A missing file is
    /// an empty spool.
    pub fn read_lines(&self) -> Result<Vec<String>, Error> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::SpoolIo(e)),
        };

        let trimmed = data.trim_end_matches('\n');
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        Ok(trimmed.split('\n').map(str::to_string).collect())
    }

    /// Atomically replaces the spool content with `lines`. Writes a `.tmp`
    /// sibling and renames it over the spool; the temp file is removed if
    /// the rename fails.
    pub fn rewrite(&self, lines: &[String]) -> Result<(), Error> {
        let tmp = self.path.with_extension("jsonl.tmp");

        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        fs::write(&tmp, content).map_err(Error::SpoolIo)?;

        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::SpoolIo(e));
        }
        Ok(())
    }
}
