// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Cascade runtime: the virtual-machine scheduler at the core of the
//! distributed deep-learning execution engine.
//!
//! The [`vm`] module implements a cooperative instruction scheduler: callers
//! push instruction messages into a pending queue, and each [`vm::Scheduler`]
//! tick builds a dependency DAG over shared mirrored objects, groups
//! instructions into chains, and dispatches ready chains to per-stream
//! executors — either inline on the scheduler thread or onto worker threads.
//!
//! Ambient pieces shared with the rest of the workspace live at the crate
//! root: [`logging`] for the tracing subscriber bootstrap and [`utils`] for
//! small helpers such as the balanced splitter used when partitioning streams
//! across worker threads.

pub use anyhow::{Error, Result};

pub mod logging;
pub mod utils;
pub mod vm;

pub use vm::Scheduler;
