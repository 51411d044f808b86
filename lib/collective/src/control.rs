// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The control-plane key-value interface consumed for cross-machine
//! rendezvous.
//!
//! The real transport lives outside this crate; communicator construction
//! only needs a named-barrier `push`/`pull` pair where `pull` blocks until
//! the key is published.

use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};

/// Process-global, thread-safe key-value control plane.
pub trait ControlPlane: Send + Sync {
    fn push_kv(&self, key: &str, value: String);

    /// Blocks until `key` is published, then returns its value.
    fn pull_kv(&self, key: &str) -> String;
}

/// In-process control plane for tests and single-machine runs.
#[derive(Default)]
pub struct InMemoryControlPlane {
    state: Mutex<HashMap<String, String>>,
    published: Condvar,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ControlPlane for InMemoryControlPlane {
    fn push_kv(&self, key: &str, value: String) {
        tracing::trace!(key, "push_kv");
        self.state.lock().insert(key.to_string(), value);
        self.published.notify_all();
    }

    fn pull_kv(&self, key: &str) -> String {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.get(key) {
                return value.clone();
            }
            tracing::trace!(key, "pull_kv waiting");
            self.published.wait(&mut state);
        }
    }
}
