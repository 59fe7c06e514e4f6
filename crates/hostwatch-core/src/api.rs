// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Control-plane HTTP client: credential validation, collection-config
//! fetch, and the discovery/host-info uploads performed during `init`.
//!
//! The control endpoints authenticate with `Authorization: Api-Key <value>`;
//! the sink endpoints (handled by the exporter) take the opaque token
//! verbatim. Every 401/403 observed here is reported to the [`AuthGuard`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

use crate::authguard::AuthGuard;
use crate::collection::{CollectionConfig, LogSourceSpec, MetricSpec};
use crate::config::AgentConfig;
use crate::error::Error;
use crate::hostinfo::HostInfo;

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    auth: Arc<AuthGuard>,
}

impl Client {
    pub fn new(cfg: &AgentConfig, auth: Arc<AuthGuard>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(Error::HttpTransport)?;
        Ok(Self {
            http,
            base_url: cfg.api_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            auth,
        })
    }

    /// Validates the credential. Any 2xx means valid; 401/403 means the key
    /// was revoked or never existed.
    pub async fn check_key(&self) -> Result<(), Error> {
        match self.post("/check-key/", &serde_json::json!({})).await {
            Ok(_) => Ok(()),
            Err(Error::HttpStatus(code)) if code == 401 || code == 403 => Err(Error::AuthInvalid),
            Err(e) => Err(e),
        }
    }

    /// Fetches the collection config with a cache-busting query parameter so
    /// intermediate caches never serve a stale document.
    pub async fn get_collection_config(&self) -> Result<CollectionConfig, Error> {
        let cb = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let path = format!("/configs/?cb={cb}");

        let response = self
            .get(&path)
            .await
            .map_err(|e| Error::ConfigFetch(e.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::ConfigFetch(e.to_string()))?;
        let cfg = serde_json::from_slice(&body)?;
        Ok(cfg)
    }

    pub async fn post_available_metrics(&self, metrics: &[MetricSpec]) -> Result<(), Error> {
        let response = self.post("/metrics/", &metrics).await?;
        expect_status(response.status(), &[StatusCode::CREATED])
    }

    pub async fn post_available_log_sources(
        &self,
        sources: &[LogSourceSpec],
    ) -> Result<(), Error> {
        let response = self.post("/logs/", &sources).await?;
        expect_status(response.status(), &[StatusCode::CREATED])
    }

    pub async fn post_host_info(&self, info: &HostInfo) -> Result<(), Error> {
        let response = self.post("/servers/info/", info).await?;
        expect_status(response.status(), &[StatusCode::OK, StatusCode::CREATED])
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, Error> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .header("Content-Type", "application/json")
            .send()
            .await?;
        self.screen(path, response)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<reqwest::Response, Error> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .json(payload)
            .send()
            .await?;
        self.screen(path, response)
    }

    /// Reports auth failures to the guard and rejects non-2xx responses.
    fn screen(&self, path: &str, response: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.auth.on_unauthorized();
        }
        if !status.is_success() {
            return Err(Error::HttpStatus(status.as_u16()));
        }
        debug!(path, status = status.as_u16(), "control-plane call succeeded");
        Ok(response)
    }
}

fn expect_status(status: StatusCode, accepted: &[StatusCode]) -> Result<(), Error> {
    if accepted.contains(&status) {
        Ok(())
    } else {
        Err(Error::HttpStatus(status.as_u16()))
    }
}
