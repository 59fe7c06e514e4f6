// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Errors surfaced by the agent runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("agent already running")]
    AlreadyRunning,

    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    #[error("failed to fetch collection config: {0}")]
    ConfigFetch(String),

    #[error("failed to parse collection config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("failed to hash collection config: {0}")]
    Hashing(String),

    #[error("credential rejected by the control plane")]
    AuthInvalid,

    #[error("http transport error: {0}")]
    HttpTransport(#[from] reqwest::Error),

    #[error("unexpected status code: {0}")]
    HttpStatus(u16),

    #[error("spool i/o error: {0}")]
    SpoolIo(#[source] std::io::Error),

    #[error("position file i/o error: {0}")]
    PositionIo(#[source] std::io::Error),

    #[error("lock file i/o error: {0}")]
    LockIo(#[source] std::io::Error),

    #[error("collector {0} failed: {1}")]
    Collector(String, String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    UpdateChecksumMismatch { expected: String, actual: String },

    #[error("invalid version string: {0}")]
    UpdateVersionParse(String),

    #[error("update download failed: {0}")]
    UpdateDownload(String),

    #[error("unsupported on this platform: {0}")]
    PlatformUnsupported(&'static str),
}
