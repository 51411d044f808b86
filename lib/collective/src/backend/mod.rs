// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Executor backends: the engines that actually launch fused collective
//! groups.

pub mod nccl;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::plan::{CollectivePlan, RequestDesc};

/// Completion callback of one rank of one request. Invoked exactly once.
/// Device errors are fatal before completion is reported, so today the
/// status is always `Ok`; the signature carries it for future extension.
pub type RequestCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// What a rank brings to a request at enqueue time.
pub struct RuntimeRequestInfo {
    pub send_buff: usize,
    pub recv_buff: usize,
    pub callback: RequestCallback,
}

impl fmt::Debug for RuntimeRequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeRequestInfo")
            .field("send_buff", &(self.send_buff as *const ()))
            .field("recv_buff", &(self.recv_buff as *const ()))
            .finish_non_exhaustive()
    }
}

/// A collective execution engine.
pub trait ExecutorBackend: Send {
    /// Builds communicators and streams for every request the plan places on
    /// this backend. Called once, before any group executes.
    fn init(&mut self, plan: &CollectivePlan) -> Result<()>;

    /// Splits a rough group into the groups this backend launches together.
    /// The default keeps each request in its own group.
    fn group_requests(&self, requests: &[Arc<RequestDesc>]) -> Vec<Vec<Arc<RequestDesc>>> {
        requests.iter().map(|request| vec![request.clone()]).collect()
    }

    /// Launches one fused group. `ranks[i]` holds the per-rank runtime info
    /// of `group[i]`, keyed by rank. Completion is reported asynchronously
    /// through each info's callback.
    fn execute_group(
        &mut self,
        group: &[Arc<RequestDesc>],
        ranks: Vec<BTreeMap<i64, RuntimeRequestInfo>>,
    );
}
