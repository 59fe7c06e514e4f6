// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared runtime for the hostwatch agent.
//!
//! This crate owns everything the collection crates and the binary have in
//! common: the install-directory layout, the credential/endpoint config
//! store, the remote collection-config document and its canonical hash, the
//! control-plane HTTP client, the auth-failure guard, the single-instance
//! lock, and the spool + flusher delivery pipeline.

pub mod api;
pub mod authguard;
pub mod collection;
pub mod config;
pub mod error;
pub mod exporter;
pub mod hostinfo;
pub mod lock;
pub mod paths;
pub mod spool;

pub use error::Error;

/// Version string compiled into the agent. Release builds are stamped by CI;
/// local builds report the manifest version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
