// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Local agent configuration: the credential plus the three endpoint URLs.
//! Persisted as `config.json` in the install directory; rewritten whole on
//! save, with missing fields falling back to defaults on load.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::paths;

const DEFAULT_API_URL: &str = "https://api.hostwatch.io";
const DEFAULT_LOGS_EXPORT_URL: &str = "https://logs.hostwatch.io";
const DEFAULT_METRICS_EXPORT_URL: &str = "https://metrics.hostwatch.io";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_logs_export_url")]
    pub logs_export_url: String,
    #[serde(default = "default_metrics_export_url")]
    pub metrics_export_url: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_logs_export_url() -> String {
    DEFAULT_LOGS_EXPORT_URL.to_string()
}

fn default_metrics_export_url() -> String {
    DEFAULT_METRICS_EXPORT_URL.to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: default_api_url(),
            logs_export_url: default_logs_export_url(),
            metrics_export_url: default_metrics_export_url(),
        }
    }
}

impl AgentConfig {
    /// Builds the config for `init`: defaults, overridden by whatever the
    /// existing file already holds, overridden by a non-empty `api_key`
    /// argument.
    pub fn assemble(dir: &Path, api_key: &str) -> Self {
        let mut cfg = match Self::load(dir) {
            Ok(existing) => existing,
            Err(_) => {
                debug!("no existing config file, starting from defaults");
                Self::default()
            }
        };
        if !api_key.is_empty() {
            cfg.api_key = api_key.to_string();
        }
        cfg
    }

    pub fn load(dir: &Path) -> Result<Self, Error> {
        let path = paths::config_path(dir);
        let data = fs::read(&path).map_err(|e| Error::ConfigLoad(e.to_string()))?;
        serde_json::from_slice(&data).map_err(|e| Error::ConfigLoad(e.to_string()))
    }

    pub fn save(&self, dir: &Path) -> Result<(), Error> {
        let path = paths::config_path(dir);
        create_private_dir(dir).map_err(|e| Error::ConfigLoad(e.to_string()))?;

        let data =
            serde_json::to_vec_pretty(self).map_err(|e| Error::ConfigLoad(e.to_string()))?;
        fs::write(&path, data).map_err(|e| Error::ConfigLoad(e.to_string()))?;
        restrict_file_mode(&path);
        debug!(path = %path.display(), "saved agent config");
        Ok(())
    }

    pub fn set_api_key(&mut self, value: &str) {
        self.api_key = value.to_string();
    }

    pub fn set_api_url(&mut self, value: &str) {
        self.api_url = value.to_string();
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        if !dir.exists() {
            fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)?;
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(dir)
    }
}

// The config holds the credential; keep it owner-readable only.
fn restrict_file_mode(path: &PathBuf) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            debug!(error = %e, "failed to restrict config file mode");
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
