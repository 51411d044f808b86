// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The virtual-machine scheduler.
//!
//! Callers describe the machine with a [`VmDesc`] (stream descriptors,
//! stream types, instruction types), construct a [`Scheduler`], and feed it
//! instruction messages through [`Scheduler::receive`] or a cloned
//! [`InstructionSender`]. Each [`Scheduler::schedule`] tick turns pending
//! instructions into per-stream chains, links data-flow dependencies over
//! the mirrored objects their operands touch, and dispatches ready chains —
//! inline for stream types sharing the scheduler thread, onto worker
//! threads otherwise.

mod chain;
mod desc;
mod id;
mod instruction;
mod object;
mod scheduler;
mod stream;
mod stream_type;

pub use chain::{ChainMergePolicy, ChainSet, IdentityMerge, InstrChain};
pub use desc::{InstrTypeDesc, VmDesc};
pub use id::{
    AccessId, ChainId, InstrTypeId, InterpretType, MirroredObjectId, ObjectId, StreamId,
    StreamTypeId,
};
pub use instruction::{
    InstrCtx, InstrOperand, InstructionMsg, MirroredObjectOperand, OperandTarget,
};
pub use object::{Access, LogicalObject, MirroredObject, ObjectPool};
pub use scheduler::{InstructionSender, Scheduler};
pub use stream::{Stream, StreamDesc, StreamRtDesc, ThreadCtx, WorkItem, WorkerPool};
pub use stream_type::{ControlStreamType, InstructionRunCtx, NopStreamType, StreamType};
