// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber. `DEBUG=1` raises the default level;
/// `RUST_LOG` still wins when set.
pub fn init() {
    let default_level = if std::env::var("DEBUG").as_deref() == Ok("1") {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
