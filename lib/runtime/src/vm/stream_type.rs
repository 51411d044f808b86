// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stream types: the pluggable execution behavior behind each stream.
//!
//! A stream type decides where its chains run (inline on the scheduler
//! thread or on a worker thread) and what executing an instruction means.
//! The infer counterpart of a stream type is the same object registered
//! under the infer-interpret [`StreamTypeId`](super::id::StreamTypeId); the
//! interpret kind reaches `run` through its context.

use std::fmt;

use super::id::{InterpretType, ObjectId};
use super::instruction::InstructionMsg;
use super::object::ObjectPool;
use super::stream::WorkItem;

/// Scheduler-thread execution context handed to [`StreamType::run`].
pub struct InstructionRunCtx<'a> {
    pub interpret_type: InterpretType,
    pub objects: &'a mut ObjectPool,
}

/// Execution behavior of one stream type.
pub trait StreamType: Send + Sync + fmt::Debug {
    /// True when chains of this type execute inline on the scheduler thread;
    /// false when they are handed to the owning worker thread.
    fn sharing_scheduler_thread(&self) -> bool;

    /// Executes one instruction on the scheduler thread. Only called for
    /// types that share the scheduler thread.
    fn run(&self, ctx: &mut InstructionRunCtx<'_>, msg: &InstructionMsg);

    /// Executes a dispatched work item on a worker thread. Only called for
    /// types that do not share the scheduler thread.
    fn run_worker(&self, item: &WorkItem) {
        unreachable!(
            "stream type shares the scheduler thread; chain {:?} has no worker-side execution",
            item.chain_id
        );
    }
}

/// The control stream type. Runs inline on the scheduler thread and carries
/// the instructions that create shared objects.
///
/// `NewSymbol` takes two immediates — the symbol value and its parallel
/// count — and creates the symbol's self logical object under the compute
/// pass and its type logical object under the infer pass, each with one
/// mirrored instance per rank.
#[derive(Debug, Default)]
pub struct ControlStreamType;

impl ControlStreamType {
    pub const CODE: u32 = 0;
    pub const NEW_SYMBOL: &'static str = "NewSymbol";
}

impl StreamType for ControlStreamType {
    fn sharing_scheduler_thread(&self) -> bool {
        true
    }

    fn run(&self, ctx: &mut InstructionRunCtx<'_>, msg: &InstructionMsg) {
        match msg.name() {
            Self::NEW_SYMBOL => {
                let symbol = msg
                    .uint64_at(0)
                    .unwrap_or_else(|| panic!("NewSymbol operand 0 must be a u64 symbol value"));
                let parallel_num = msg
                    .int64_at(1)
                    .unwrap_or_else(|| panic!("NewSymbol operand 1 must be an i64 parallel count"));
                let object_id = match ctx.interpret_type {
                    InterpretType::Compute => ObjectId::self_of(symbol),
                    InterpretType::Infer => ObjectId::type_of(symbol),
                };
                tracing::debug!(symbol, parallel_num, ?object_id, "creating logical object");
                ctx.objects.insert_logical_object(object_id, parallel_num);
            }
            other => panic!("unknown control instruction {other:?}"),
        }
    }
}

/// A stream type that executes nothing. Runs on a worker thread; useful as
/// the minimal worker-backed stream for scheduler exercises.
#[derive(Debug, Default)]
pub struct NopStreamType;

impl NopStreamType {
    pub const CODE: u32 = 1;
    pub const NOP: &'static str = "Nop";
}

impl StreamType for NopStreamType {
    fn sharing_scheduler_thread(&self) -> bool {
        false
    }

    fn run(&self, _ctx: &mut InstructionRunCtx<'_>, msg: &InstructionMsg) {
        unreachable!("Nop chains run on a worker thread, not inline: {:?}", msg.name());
    }

    fn run_worker(&self, _item: &WorkItem) {}
}
