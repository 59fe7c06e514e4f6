// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Checksum-verified in-place binary swap. The release manifest names the
//! latest version; the binary is streamed to a `.new` sibling, its SHA-256
//! verified against the expected digest, and the file renamed over the
//! running executable. A `restart` marker tells the running supervisor to
//! exit so the service manager relaunches the new build.
//!
//! The previous binary is not retained; there is no rollback artifact.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use hostwatch_core::api::HTTP_TIMEOUT;
use hostwatch_core::config::AgentConfig;
use hostwatch_core::error::Error;
use hostwatch_core::paths;

const TEMP_SUFFIX: &str = ".new";

#[derive(Debug, Deserialize)]
struct ReleaseManifest {
    version: String,
    #[serde(default)]
    checksum: String,
    url: String,
}

#[derive(Debug, PartialEq)]
pub enum UpdateOutcome {
    Updated { from: String, to: String },
    AlreadyCurrent,
}

pub async fn run() -> Result<(), Error> {
    info!(version = hostwatch_core::VERSION, "starting update process");

    let install_dir = paths::install_dir()
        .map_err(|e| Error::UpdateDownload(format!("cannot locate install dir: {e}")))?;
    let base_url = match std::env::var("API_URL") {
        Ok(url) if !url.is_empty() => url,
        _ => AgentConfig::load(&install_dir).unwrap_or_default().api_url,
    };

    let target = std::env::current_exe()
        .and_then(|exe| exe.canonicalize())
        .map_err(|e| Error::UpdateDownload(format!("cannot resolve executable path: {e}")))?;

    match perform(&base_url, hostwatch_core::VERSION, &target).await? {
        UpdateOutcome::Updated { from, to } => {
            info!(from = from.as_str(), to = to.as_str(), "update completed successfully");
            info!("under systemd the agent restarts automatically; otherwise restart it manually");
            Ok(())
        }
        UpdateOutcome::AlreadyCurrent => {
            info!("agent is already running the latest version");
            Ok(())
        }
    }
}

/// Runs the whole update flow against `base_url`, swapping `target` on
/// success. Split out from [`run`] so tests can point it at a scratch
/// binary and a mock control plane.
pub async fn perform(
    base_url: &str,
    current_version: &str,
    target: &Path,
) -> Result<UpdateOutcome, Error> {
    let http = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(Error::HttpTransport)?;

    let manifest = fetch_manifest(&http, base_url).await?;
    if !target_is_newer(current_version, &manifest.version)? {
        return Ok(UpdateOutcome::AlreadyCurrent);
    }
    info!(version = manifest.version.as_str(), "upgrading");

    let binary = binary_name();
    let expected = resolve_checksum(&http, &manifest, &binary).await?;
    let download_url = format!("{}/{}", manifest.url.trim_end_matches('/'), binary);

    let staged = PathBuf::from(format!("{}{}", target.display(), TEMP_SUFFIX));
    let result = download_verify_swap(&http, &download_url, &expected, &staged, target).await;
    if result.is_err() {
        let _ = std::fs::remove_file(&staged);
    }
    result?;

    create_restart_marker(target)?;
    Ok(UpdateOutcome::Updated {
        from: current_version.to_string(),
        to: manifest.version,
    })
}

/// Release artifacts are named `hostwatch-<os>-<arch>`; `OS`/`ARCH` env
/// vars override the compiled defaults.
fn binary_name() -> String {
    let os = std::env::var("OS").unwrap_or_else(|_| std::env::consts::OS.to_string());
    let arch = std::env::var("ARCH").unwrap_or_else(|_| std::env::consts::ARCH.to_string());
    format!("hostwatch-{os}-{arch}")
}

async fn fetch_manifest(http: &reqwest::Client, base_url: &str) -> Result<ReleaseManifest, Error> {
    let url = format!("{}/updates/", base_url.trim_end_matches('/'));
    let response = http.get(&url).send().await?;
    if response.status().as_u16() != 200 {
        return Err(Error::HttpStatus(response.status().as_u16()));
    }
    let manifest = response
        .json::<ReleaseManifest>()
        .await
        .map_err(|e| Error::UpdateDownload(format!("invalid manifest: {e}")))?;
    Ok(manifest)
}

/// Prefers the checksums-manifest file published next to the binaries over
/// the inline manifest checksum. Having neither is fatal.
async fn resolve_checksum(
    http: &reqwest::Client,
    manifest: &ReleaseManifest,
    binary: &str,
) -> Result<String, Error> {
    match fetch_checksums_manifest(http, &manifest.url, binary).await {
        Ok(checksum) => return Ok(checksum),
        Err(e) => warn!(error = %e, "could not fetch checksums manifest"),
    }

    let inline = manifest.checksum.trim();
    if inline.is_empty() {
        return Err(Error::UpdateDownload(format!(
            "no checksum available for {binary} (version {})",
            manifest.version
        )));
    }
    Ok(inline.to_string())
}

/// Parses `<hex>  <filename>` lines from `<url>/checksums`.
async fn fetch_checksums_manifest(
    http: &reqwest::Client,
    base_url: &str,
    binary: &str,
) -> Result<String, Error> {
    let url = format!("{}/checksums", base_url.trim_end_matches('/'));
    let response = http.get(&url).send().await?;
    if response.status().as_u16() != 200 {
        return Err(Error::HttpStatus(response.status().as_u16()));
    }
    let body = response
        .text()
        .await
        .map_err(|e| Error::UpdateDownload(e.to_string()))?;

    parse_checksums_manifest(&body, binary).ok_or_else(|| {
        Error::UpdateDownload(format!("binary {binary} not listed in checksums manifest"))
    })
}

fn parse_checksums_manifest(body: &str, binary: &str) -> Option<String> {
    for line in body.lines() {
        let mut fields = line.split_whitespace();
        let (Some(checksum), Some(name)) = (fields.next(), fields.next()) else {
            continue;
        };
        if name == binary {
            return Some(checksum.to_string());
        }
    }
    None
}

/// Compares `MAJOR.MINOR.PATCH` triples. A current version of "dev" is
/// always considered older.
fn target_is_newer(current: &str, target: &str) -> Result<bool, Error> {
    if current == "dev" {
        return Ok(true);
    }
    let current = parse_version(current)?;
    let target = parse_version(target)?;
    Ok(target > current)
}

fn parse_version(version: &str) -> Result<[u64; 3], Error> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::UpdateVersionParse(version.to_string()));
    }
    let mut triple = [0u64; 3];
    for (slot, part) in triple.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| Error::UpdateVersionParse(version.to_string()))?;
    }
    Ok(triple)
}

async fn download_verify_swap(
    http: &reqwest::Client,
    url: &str,
    expected_hex: &str,
    staged: &Path,
    target: &Path,
) -> Result<(), Error> {
    info!(url, "downloading update");
    let mut response = http.get(url).send().await?;
    if response.status().as_u16() != 200 {
        return Err(Error::UpdateDownload(format!(
            "bad status {} from {url}",
            response.status()
        )));
    }

    let mut file = std::fs::File::create(staged)
        .map_err(|e| Error::UpdateDownload(format!("cannot create {}: {e}", staged.display())))?;
    let mut hasher = Sha256::new();
    let mut total = 0usize;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::UpdateDownload(e.to_string()))?
    {
        hasher.update(&chunk);
        file.write_all(&chunk)
            .map_err(|e| Error::UpdateDownload(e.to_string()))?;
        total += chunk.len();
    }
    drop(file);
    info!(bytes = total, "download complete, verifying checksum");

    let actual = hasher.finalize();
    let expected = hex::decode(expected_hex.trim())
        .map_err(|_| Error::UpdateDownload(format!("invalid checksum encoding: {expected_hex}")))?;
    if !constant_time_eq(&actual, &expected) {
        return Err(Error::UpdateChecksumMismatch {
            expected: expected_hex.trim().to_string(),
            actual: hex::encode(actual),
        });
    }

    make_executable(staged)?;
    std::fs::rename(staged, target).map_err(|e| {
        Error::UpdateDownload(format!(
            "cannot rename {} over {}: {e}",
            staged.display(),
            target.display()
        ))
    })?;
    Ok(())
}

/// Always compares all bytes so a mismatch position leaks no timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

fn make_executable(path: &Path) -> Result<(), Error> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| Error::UpdateDownload(format!("chmod failed: {e}")))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn create_restart_marker(target: &Path) -> Result<(), Error> {
    let dir = target.parent().ok_or_else(|| {
        Error::UpdateDownload("target binary has no parent directory".to_string())
    })?;
    let marker = paths::restart_marker_path(dir);
    std::fs::File::create(&marker)
        .map_err(|e| Error::UpdateDownload(format!("cannot create restart marker: {e}")))?;
    info!(file = %marker.display(), "created restart marker");
    Ok(())
}
