// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Builds the log collector set for a collection cycle. With no config,
//! every collector is enabled (discovery mode); with a config, only the
//! named log sources run.

use std::path::Path;

use tracing::debug;

use hostwatch_core::collection::CollectionConfig;
use hostwatch_core::paths;

use crate::nginx::NginxLogCollector;
use crate::LogCollector;

fn all_collectors(install_dir: &Path) -> Vec<Box<dyn LogCollector>> {
    let positions_path = paths::positions_path(install_dir);

    let mut collectors: Vec<Box<dyn LogCollector>> =
        vec![Box::new(NginxLogCollector::new(positions_path))];

    #[cfg(target_os = "linux")]
    collectors.push(Box::new(crate::journald::JournaldCollector::new()));

    collectors
}

pub fn build_collectors(
    install_dir: &Path,
    cfg: Option<&CollectionConfig>,
) -> Vec<Box<dyn LogCollector>> {
    let collectors = all_collectors(install_dir);

    let Some(cfg) = cfg else {
        return collectors;
    };

    collectors
        .into_iter()
        .filter(|collector| {
            let enabled = cfg
                .log_sources
                .iter()
                .any(|source| source.name == collector.name());
            if !enabled {
                debug!(name = collector.name(), "skipping log collector");
            }
            enabled
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostwatch_core::collection::LogSourceSpec;

    #[test]
    fn test_no_config_enables_all() {
        let dir = tempfile::tempdir().unwrap();
        let collectors = build_collectors(dir.path(), None);
        assert!(collectors.iter().any(|c| c.name() == "nginx"));
    }

    #[test]
    fn test_config_filters_by_source_name() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CollectionConfig {
            metrics: Vec::new(),
            log_sources: vec![LogSourceSpec {
                name: "nginx".into(),
                path: "/var/log/nginx/*.log".into(),
            }],
        };

        let collectors = build_collectors(dir.path(), Some(&cfg));
        let names: Vec<_> = collectors.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["nginx"]);
    }

    #[test]
    fn test_empty_config_disables_all() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CollectionConfig::default();
        assert!(build_collectors(dir.path(), Some(&cfg)).is_empty());
    }
}
