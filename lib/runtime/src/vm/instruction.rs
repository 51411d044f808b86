// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Instruction messages and their operands.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::id::{AccessId, InstrTypeId, MirroredObjectId, StreamTypeId};

/// Which mirrored instances of a logical object an operand addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandTarget {
    /// The instance at the parallel rank of the stream executing the
    /// instruction.
    Current,
    /// The instance at an explicit parallel rank.
    Fixed(i64),
    /// Every instance of the logical object.
    All,
}

/// Reference to a logical object inside an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirroredObjectOperand {
    pub logical_object_id: u64,
    pub target: OperandTarget,
}

impl MirroredObjectOperand {
    /// Operand addressing the executing stream's own rank.
    pub fn new(logical_object_id: u64) -> Self {
        Self { logical_object_id, target: OperandTarget::Current }
    }

    /// Operand addressing a fixed parallel rank.
    pub fn at(logical_object_id: u64, parallel_id: i64) -> Self {
        Self { logical_object_id, target: OperandTarget::Fixed(parallel_id) }
    }

    /// Operand addressing every parallel rank.
    pub fn all(logical_object_id: u64) -> Self {
        Self { logical_object_id, target: OperandTarget::All }
    }

    /// The parallel rank this operand resolves to given the executing
    /// stream's rank, or `None` for the all-ranks marker.
    pub fn parallel_id(&self, current_parallel_id: i64) -> Option<i64> {
        match self.target {
            OperandTarget::Current => Some(current_parallel_id),
            OperandTarget::Fixed(parallel_id) => Some(parallel_id),
            OperandTarget::All => None,
        }
    }
}

/// The seven concrete operand shapes.
///
/// Matches over this enum are exhaustive on purpose; a new shape must be
/// handled at every consumer rather than falling into a default branch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InstrOperand {
    /// Read-only mirrored-object operand.
    Const(MirroredObjectOperand),
    /// Read-write mirrored-object operand.
    Mut(MirroredObjectOperand),
    /// Write-only mirrored-object operand whose type metadata is also
    /// rewritten.
    Mut2(MirroredObjectOperand),
    DoubleI(f64),
    Int64I(i64),
    Uint64I(u64),
    BoolI(bool),
}

impl InstrOperand {
    /// True for the immediate scalar shapes.
    pub fn is_immediate(&self) -> bool {
        match self {
            InstrOperand::Const(_) | InstrOperand::Mut(_) | InstrOperand::Mut2(_) => false,
            InstrOperand::DoubleI(_)
            | InstrOperand::Int64I(_)
            | InstrOperand::Uint64I(_)
            | InstrOperand::BoolI(_) => true,
        }
    }
}

/// Immutable description of a single instruction.
///
/// The operand list is shared between an instruction and its infer twin,
/// which differs only in the stream type id it runs under.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionMsg {
    name: Arc<str>,
    instr_type_id: InstrTypeId,
    operands: Arc<[InstrOperand]>,
}

impl InstructionMsg {
    pub fn new(
        name: impl Into<Arc<str>>,
        instr_type_id: InstrTypeId,
        operands: Vec<InstrOperand>,
    ) -> Self {
        Self { name: name.into(), instr_type_id, operands: operands.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instr_type_id(&self) -> InstrTypeId {
        self.instr_type_id
    }

    pub fn stream_type_id(&self) -> StreamTypeId {
        self.instr_type_id.stream_type_id
    }

    pub fn operands(&self) -> &[InstrOperand] {
        &self.operands
    }

    /// A *source instruction* touches no mirrored objects: every operand is
    /// an immediate scalar.
    pub fn is_source(&self) -> bool {
        self.operands.iter().all(InstrOperand::is_immediate)
    }

    /// The infer twin: same name and operands, run under the infer stream
    /// type.
    pub fn make_infer_twin(&self, infer_stream_type_id: StreamTypeId) -> Self {
        Self {
            name: self.name.clone(),
            instr_type_id: InstrTypeId { stream_type_id: infer_stream_type_id },
            operands: self.operands.clone(),
        }
    }

    /// The `u64` immediate at operand position `index`, if that operand has
    /// that shape.
    pub fn uint64_at(&self, index: usize) -> Option<u64> {
        match self.operands.get(index)? {
            InstrOperand::Uint64I(v) => Some(*v),
            _ => None,
        }
    }

    /// The `i64` immediate at operand position `index`, if that operand has
    /// that shape.
    pub fn int64_at(&self, index: usize) -> Option<i64> {
        match self.operands.get(index)? {
            InstrOperand::Int64I(v) => Some(*v),
            _ => None,
        }
    }
}

/// Runtime instance of an [`InstructionMsg`] bound to one parallel rank.
///
/// Owns the instruction's side of its operand accesses: a map from mirrored
/// object to the access handle registered on that object's access list.
#[derive(Debug)]
pub struct InstrCtx {
    msg: Arc<InstructionMsg>,
    parallel_id: i64,
    accesses: BTreeMap<MirroredObjectId, AccessId>,
}

impl InstrCtx {
    pub(crate) fn new(msg: Arc<InstructionMsg>, parallel_id: i64) -> Self {
        Self { msg, parallel_id, accesses: BTreeMap::new() }
    }

    pub fn msg(&self) -> &Arc<InstructionMsg> {
        &self.msg
    }

    pub fn parallel_id(&self) -> i64 {
        self.parallel_id
    }

    /// Accesses registered for this instruction, ordered by mirrored object.
    pub fn accesses(&self) -> &BTreeMap<MirroredObjectId, AccessId> {
        &self.accesses
    }

    pub(crate) fn accesses_mut(&mut self) -> &mut BTreeMap<MirroredObjectId, AccessId> {
        &mut self.accesses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::id::InterpretType;

    fn nop_type_id() -> InstrTypeId {
        InstrTypeId { stream_type_id: StreamTypeId::compute(1) }
    }

    #[test]
    fn immediate_only_messages_are_source_instructions() {
        let msg = InstructionMsg::new(
            "NewSymbol",
            nop_type_id(),
            vec![InstrOperand::Uint64I(9527), InstrOperand::Int64I(1)],
        );
        assert!(msg.is_source());
        assert_eq!(msg.uint64_at(0), Some(9527));
        assert_eq!(msg.int64_at(1), Some(1));
        assert_eq!(msg.uint64_at(1), None);
    }

    #[test]
    fn mirrored_object_operands_defeat_source_classification() {
        let msg = InstructionMsg::new(
            "Nop",
            nop_type_id(),
            vec![InstrOperand::Mut(MirroredObjectOperand::new(9527))],
        );
        assert!(!msg.is_source());
    }

    #[test]
    fn infer_twin_shares_operands_and_swaps_stream_type() {
        let msg = InstructionMsg::new(
            "Nop",
            nop_type_id(),
            vec![InstrOperand::Mut(MirroredObjectOperand::new(9527))],
        );
        let twin = msg.make_infer_twin(StreamTypeId::infer(1));
        assert_eq!(twin.name(), "Nop");
        assert_eq!(twin.stream_type_id().interpret, InterpretType::Infer);
        assert_eq!(twin.operands(), msg.operands());
    }

    #[test]
    fn operand_targets_resolve_against_the_current_rank() {
        assert_eq!(MirroredObjectOperand::new(1).parallel_id(3), Some(3));
        assert_eq!(MirroredObjectOperand::at(1, 7).parallel_id(3), Some(7));
        assert_eq!(MirroredObjectOperand::all(1).parallel_id(3), None);
    }
}
