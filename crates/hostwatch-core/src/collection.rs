// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The remote-owned collection config: which metrics and log sources this
//! host should collect. Fetched from the control plane each reconciliation
//! cycle and never persisted locally.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// One metric family member the backend wants collected. Two specs denote
/// the same series iff name and the full label map are equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSourceSpec {
    pub name: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub log_sources: Vec<LogSourceSpec>,
}

impl CollectionConfig {
    /// True when the backend has not assigned anything to this host yet.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.log_sources.is_empty()
    }

    /// SHA-256 over a canonical JSON encoding. The hash depends only on the
    /// value content: both sequences are sorted before encoding, and label
    /// maps are `BTreeMap`s, so retrieval order never changes the digest.
    pub fn content_hash(&self) -> Result<String, Error> {
        let mut canonical = self.clone();
        canonical
            .metrics
            .sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));
        canonical
            .log_sources
            .sort_by(|a, b| (&a.name, &a.path).cmp(&(&b.name, &b.path)));

        let encoded =
            serde_json::to_vec(&canonical).map_err(|e| Error::Hashing(e.to_string()))?;
        let digest = Sha256::digest(&encoded);
        Ok(hex::encode(digest))
    }
}
