// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Single-instance lock: a `pid` file in the install directory whose content
//! is the owner's decimal process id. A lock is stale iff no live process
//! has that id, so crashes resolve themselves on the next acquire.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use tracing::debug;

use crate::error::Error;
use crate::paths;

/// Claims the lock for the current process. Fails with `AlreadyRunning` if
/// another live process holds it; stale or corrupt lock files are taken
/// over.
pub fn acquire(dir: &Path) -> Result<(), Error> {
    let path = paths::pid_path(dir);
    let pid = std::process::id();

    match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(mut file) => {
            file.write_all(pid.to_string().as_bytes())
                .map_err(Error::LockIo)?;
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            match read_pid(dir) {
                Some(old_pid) if process_alive(old_pid) => {
                    debug!(pid = old_pid, "live process holds the lock");
                    Err(Error::AlreadyRunning)
                }
                _ => {
                    // Stale or unreadable: truncate and claim.
                    debug!(path = %path.display(), "taking over stale lock file");
                    fs::write(&path, pid.to_string()).map_err(Error::LockIo)?;
                    Ok(())
                }
            }
        }
        Err(e) => Err(Error::LockIo(e)),
    }
}

/// Removes the lock file. Idempotent: a missing file is not an error.
pub fn release(dir: &Path) {
    let path = paths::pid_path(dir);
    if let Err(e) = fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(error = %e, "failed to remove pid file");
        }
    }
}

/// True iff the lock file exists and names a live process.
pub fn is_held(dir: &Path) -> Result<bool, Error> {
    let path = paths::pid_path(dir);
    if !path.exists() {
        return Ok(false);
    }
    match read_pid(dir) {
        Some(pid) => Ok(process_alive(pid)),
        None => Ok(false),
    }
}

fn read_pid(dir: &Path) -> Option<i32> {
    let data = fs::read_to_string(paths::pid_path(dir)).ok()?;
    data.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}

/// Probes liveness with a no-op signal. Permission denied means the pid
/// belongs to a foreign uid's live process, so it counts as alive rather
/// than letting us steal its lock.
#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    false
}
