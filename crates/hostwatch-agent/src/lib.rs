// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Agent runtime: supervisor state machine, control-plane watchers, the
//! init lifecycle and the self-updater. The `hostwatch` binary is a thin
//! clap dispatcher over this crate.

pub mod config_watcher;
pub mod lifecycle;
pub mod logging;
pub mod restart_watcher;
pub mod supervisor;
pub mod updater;
