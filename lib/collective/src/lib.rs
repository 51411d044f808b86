// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cascade collective boxing executor.
//!
//! A multi-rank collective-communication engine: a pre-planned set of
//! collective requests is ingested once, fused into groups under a size
//! threshold, and executed across multiple communication streams with
//! asynchronous, callback-based completion.
//!
//! The flow is: build a [`plan::CollectivePlan`], construct a
//! [`CollectiveExecutor`] with one [`backend::ExecutorBackend`] per
//! [`plan::BackendKind`] (the provided [`backend::nccl::NcclBackend`] works
//! against any [`device::CommDevice`] provider), then have each local rank
//! call [`CollectiveExecutor::enqueue`] with its buffers and completion
//! callback. Groups launch as soon as every member request has all of its
//! local ranks, strictly in plan order within a job.

pub use anyhow::{Error, Result};

pub mod backend;
pub mod config;
pub mod control;
pub mod device;
pub mod executor;
pub mod plan;

pub use backend::{ExecutorBackend, RequestCallback, RuntimeRequestInfo};
pub use config::CollectiveConfig;
pub use executor::CollectiveExecutor;
