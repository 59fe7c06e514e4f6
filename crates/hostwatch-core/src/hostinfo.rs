// Copyright 2024-Present Hostwatch, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Static host facts uploaded once during `init`. Failure to deliver them
//! is never fatal.

use serde::Serialize;
use sysinfo::System;

#[derive(Debug, Clone, Serialize)]
pub struct HostInfo {
    pub hostname: String,
    pub os: String,
    pub platform: String,
    pub platform_family: String,
    pub platform_version: String,
    pub kernel_version: String,
    pub architecture: String,
    pub agent_version: String,
}

pub fn gather() -> HostInfo {
    HostInfo {
        hostname: System::host_name().unwrap_or_default(),
        os: std::env::consts::OS.to_string(),
        platform: System::name().unwrap_or_default(),
        platform_family: System::distribution_id(),
        platform_version: System::os_version().unwrap_or_default(),
        kernel_version: System::kernel_version().unwrap_or_default(),
        architecture: System::cpu_arch(),
        agent_version: crate::VERSION.to_string(),
    }
}
