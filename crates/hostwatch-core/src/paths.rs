// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Install-directory layout.
//!
//! All persistent agent state lives next to the binary: `config.json`, the
//! `pid` lock, the `spool/` directory, `positions.json` and the `restart`
//! marker. Components take the directory as a parameter so tests can point
//! them at a scratch directory.

use std::io;
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "config.json";
pub const PID_FILENAME: &str = "pid";
pub const SPOOL_DIRNAME: &str = "spool";
pub const POSITIONS_FILENAME: &str = "positions.json";
pub const RESTART_FILENAME: &str = "restart";

/// Directory containing the running executable, symlinks resolved.
pub fn install_dir() -> io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let exe = exe.canonicalize()?;
    match exe.parent() {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Err(io::Error::new(
            io::ErrorKind::NotFound,
            "executable has no parent directory",
        )),
    }
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILENAME)
}

pub fn pid_path(dir: &Path) -> PathBuf {
    dir.join(PID_FILENAME)
}

pub fn spool_dir(dir: &Path) -> PathBuf {
    dir.join(SPOOL_DIRNAME)
}

pub fn positions_path(dir: &Path) -> PathBuf {
    dir.join(POSITIONS_FILENAME)
}

pub fn restart_marker_path(dir: &Path) -> PathBuf {
    dir.join(RESTART_FILENAME)
}
