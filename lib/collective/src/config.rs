// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Executor configuration.
//!
//! Defaults can be overridden from the environment with the
//! `CASCADE_COLLECTIVE_` prefix, e.g. `CASCADE_COLLECTIVE_NCCL_NUM_STREAMS=4`.

use std::path::PathBuf;

use anyhow::Result;
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Environment prefix for configuration overrides.
const ENV_PREFIX: &str = "CASCADE_COLLECTIVE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectiveConfig {
    /// This process's machine id within the cluster.
    pub machine_id: i64,
    /// Parallel communication streams per device.
    pub nccl_num_streams: i64,
    /// Fusion cap per group, in megabytes. Zero disables size-based fusion
    /// entirely (every candidate overflows the group).
    pub nccl_fusion_threshold_mb: i64,
    /// When false, rough grouping treats each request in isolation.
    pub enable_fusion: bool,
    /// Toggles the group summary dump.
    pub enable_debug_mode: bool,
    /// Root directory for debug dumps.
    pub debug_dump_root: PathBuf,
}

impl Default for CollectiveConfig {
    fn default() -> Self {
        Self {
            machine_id: 0,
            nccl_num_streams: 1,
            nccl_fusion_threshold_mb: 16,
            enable_fusion: true,
            enable_debug_mode: false,
            debug_dump_root: PathBuf::from("log"),
        }
    }
}

impl CollectiveConfig {
    /// Defaults overlaid with `CASCADE_COLLECTIVE_*` environment variables.
    pub fn from_settings() -> Result<Self> {
        let config = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;
        Ok(config)
    }

    pub fn fusion_threshold_bytes(&self) -> i64 {
        self.nccl_fusion_threshold_mb * 1024 * 1024
    }
}
