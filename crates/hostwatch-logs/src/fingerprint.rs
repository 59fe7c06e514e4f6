// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! File identity across renames: `(device_id, size)` where `device_id` is
//! the inode on Unix. Rotation moves a file without changing its inode, so
//! a stored fingerprint still matches the renamed file; a shrunken size
//! means the offset can no longer be trusted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use hostwatch_core::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub device_id: u64,
    pub size: u64,
}

#[cfg(unix)]
pub fn file_fingerprint(path: &Path) -> Result<Fingerprint, Error> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::metadata(path).map_err(Error::PositionIo)?;
    Ok(Fingerprint {
        device_id: meta.ino(),
        size: meta.len(),
    })
}

#[cfg(not(unix))]
pub fn file_fingerprint(_path: &Path) -> Result<Fingerprint, Error> {
    Err(Error::PlatformUnsupported("file fingerprinting"))
}
