// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Small shared helpers.

use std::ops::Range;

/// Partitions `total` items into `parts` contiguous ranges of nearly equal
/// size, with the remainder distributed one item at a time to the lowest
/// indices.
///
/// Used by the scheduler to spread a stream descriptor's parallel ranks
/// across its worker threads.
#[derive(Debug, Clone, Copy)]
pub struct BalancedSplitter {
    total: i64,
    parts: i64,
}

impl BalancedSplitter {
    /// `parts` must be positive; `total` must be non-negative.
    pub fn new(total: i64, parts: i64) -> Self {
        assert!(parts > 0, "balanced splitter needs at least one part");
        assert!(total >= 0, "cannot split a negative total");
        Self { total, parts }
    }

    /// The half-open range of items assigned to part `index`.
    pub fn at(&self, index: i64) -> Range<i64> {
        assert!(
            (0..self.parts).contains(&index),
            "part index {index} out of range 0..{}",
            self.parts
        );
        let base = self.total / self.parts;
        let remainder = self.total % self.parts;
        let begin = index * base + index.min(remainder);
        let len = base + i64::from(index < remainder);
        begin..begin + len
    }

    pub fn parts(&self) -> i64 {
        self.parts
    }
}
