// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The scheduler's construction-time description: stream descriptors, the
//! stream-type table, and the instruction table.
//!
//! The control stream type and its infer counterpart are mandatory; both
//! are pre-registered by [`VmDesc::new`] with the fixed single-stream
//! descriptor the scheduler requires.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{bail, Result};

use super::id::{InstrTypeId, StreamTypeId};
use super::instruction::{InstrOperand, InstructionMsg};
use super::stream::StreamDesc;
use super::stream_type::{ControlStreamType, StreamType};

/// Where an instruction type runs: its compute stream type and, when the
/// type participates in the infer pre-pass, its infer stream type.
#[derive(Debug, Clone, Copy)]
pub struct InstrTypeDesc {
    pub compute: StreamTypeId,
    pub infer: Option<StreamTypeId>,
}

/// Everything a [`super::Scheduler`] needs to construct itself.
pub struct VmDesc {
    stream_descs: BTreeMap<StreamTypeId, StreamDesc>,
    stream_types: BTreeMap<StreamTypeId, Arc<dyn StreamType>>,
    instr_types: HashMap<String, InstrTypeDesc>,
}

impl Default for VmDesc {
    fn default() -> Self {
        Self::new()
    }
}

impl VmDesc {
    /// A description with the mandatory control stream type (compute and
    /// infer) and its `NewSymbol` instruction already registered.
    pub fn new() -> Self {
        let mut desc = Self {
            stream_descs: BTreeMap::new(),
            stream_types: BTreeMap::new(),
            instr_types: HashMap::new(),
        };
        let control = Arc::new(ControlStreamType);
        let compute_id = StreamTypeId::compute(ControlStreamType::CODE);
        let infer_id = StreamTypeId::infer(ControlStreamType::CODE);
        desc.register_stream_type(compute_id, control.clone());
        desc.register_stream_type(infer_id, control);
        desc.add_stream_desc(StreamDesc::new(compute_id, 1, 1, 1))
            .expect("fresh description cannot hold a control descriptor yet");
        desc.add_stream_desc(StreamDesc::new(infer_id, 1, 1, 1))
            .expect("fresh description cannot hold an infer control descriptor yet");
        desc.register_instr_type(
            ControlStreamType::NEW_SYMBOL,
            InstrTypeDesc { compute: compute_id, infer: Some(infer_id) },
        )
        .expect("fresh description cannot hold NewSymbol yet");
        desc
    }

    pub fn register_stream_type(&mut self, id: StreamTypeId, stream_type: Arc<dyn StreamType>) {
        self.stream_types.insert(id, stream_type);
    }

    pub fn add_stream_desc(&mut self, desc: StreamDesc) -> Result<()> {
        let id = desc.stream_type_id();
        if self.stream_descs.contains_key(&id) {
            bail!("stream descriptor for {id:?} registered twice");
        }
        if desc.parallel_num() % desc.num_streams_per_thread() != 0 {
            bail!(
                "stream descriptor for {id:?}: {} streams do not divide into threads of {}",
                desc.parallel_num(),
                desc.num_streams_per_thread()
            );
        }
        self.stream_descs.insert(id, desc);
        Ok(())
    }

    pub fn register_instr_type(&mut self, name: impl Into<String>, desc: InstrTypeDesc) -> Result<()> {
        let name = name.into();
        if self.instr_types.contains_key(&name) {
            bail!("instruction type {name:?} registered twice");
        }
        self.instr_types.insert(name, desc);
        Ok(())
    }

    pub fn lookup_instr_type(&self, name: &str) -> Option<&InstrTypeDesc> {
        self.instr_types.get(name)
    }

    /// Builds an instruction message of a registered type (compute pass).
    pub fn instruction(&self, name: &str, operands: Vec<InstrOperand>) -> Result<InstructionMsg> {
        let Some(desc) = self.instr_types.get(name) else {
            bail!("unknown instruction type {name:?}");
        };
        Ok(InstructionMsg::new(name, InstrTypeId { stream_type_id: desc.compute }, operands))
    }

    /// The control instruction creating symbol `symbol` with `parallel_num`
    /// mirrored instances.
    pub fn new_symbol(&self, symbol: u64, parallel_num: i64) -> InstructionMsg {
        self.instruction(
            ControlStreamType::NEW_SYMBOL,
            vec![InstrOperand::Uint64I(symbol), InstrOperand::Int64I(parallel_num)],
        )
        .expect("NewSymbol is pre-registered")
    }

    pub fn stream_descs(&self) -> &BTreeMap<StreamTypeId, StreamDesc> {
        &self.stream_descs
    }

    pub fn stream_type(&self, id: StreamTypeId) -> Option<&Arc<dyn StreamType>> {
        self.stream_types.get(&id)
    }

    /// Construction-time checks: the mandatory control descriptors are
    /// present in their fixed shape, and every descriptor has a registered
    /// stream type.
    pub fn validate(&self) -> Result<()> {
        for interpret_id in
            [StreamTypeId::compute(ControlStreamType::CODE), StreamTypeId::infer(ControlStreamType::CODE)]
        {
            let Some(desc) = self.stream_descs.get(&interpret_id) else {
                bail!("mandatory control stream descriptor missing for {interpret_id:?}");
            };
            if desc.num_machines() != 1
                || desc.num_streams_per_machine() != 1
                || desc.num_streams_per_thread() != 1
                || desc.start_parallel_id() != 0
            {
                bail!("control stream descriptor for {interpret_id:?} must be single-stream at rank 0");
            }
        }
        for id in self.stream_descs.keys() {
            if !self.stream_types.contains_key(id) {
                bail!("stream descriptor {id:?} has no registered stream type");
            }
        }
        Ok(())
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        BTreeMap<StreamTypeId, StreamDesc>,
        BTreeMap<StreamTypeId, Arc<dyn StreamType>>,
        HashMap<String, InstrTypeDesc>,
    ) {
        (self.stream_descs, self.stream_types, self.instr_types)
    }
}

impl std::fmt::Debug for VmDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmDesc")
            .field("stream_descs", &self.stream_descs)
            .field("instr_types", &self.instr_types)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::id::InterpretType;
    use crate::vm::stream_type::NopStreamType;

    #[test]
    fn control_stream_is_preregistered() {
        let desc = VmDesc::new();
        desc.validate().unwrap();
        let new_symbol = desc.new_symbol(9527, 1);
        assert!(new_symbol.is_source());
        assert_eq!(new_symbol.stream_type_id().interpret, InterpretType::Compute);
        assert_eq!(new_symbol.stream_type_id().code, ControlStreamType::CODE);
        let infer = desc.lookup_instr_type(ControlStreamType::NEW_SYMBOL).unwrap().infer;
        assert_eq!(infer, Some(StreamTypeId::infer(ControlStreamType::CODE)));
    }

    #[test]
    fn duplicate_stream_descs_are_rejected() {
        let mut desc = VmDesc::new();
        let id = StreamTypeId::compute(NopStreamType::CODE);
        desc.register_stream_type(id, Arc::new(NopStreamType));
        desc.add_stream_desc(StreamDesc::new(id, 1, 1, 1)).unwrap();
        assert!(desc.add_stream_desc(StreamDesc::new(id, 1, 1, 1)).is_err());
    }

    #[test]
    fn descriptors_without_stream_types_fail_validation() {
        let mut desc = VmDesc::new();
        let id = StreamTypeId::compute(NopStreamType::CODE);
        desc.add_stream_desc(StreamDesc::new(id, 1, 1, 1)).unwrap();
        assert!(desc.validate().is_err());
    }

    #[test]
    fn indivisible_thread_partitions_are_rejected() {
        let mut desc = VmDesc::new();
        let id = StreamTypeId::compute(NopStreamType::CODE);
        desc.register_stream_type(id, Arc::new(NopStreamType));
        assert!(desc.add_stream_desc(StreamDesc::new(id, 1, 3, 2)).is_err());
    }

    #[test]
    fn unknown_instruction_types_cannot_be_built() {
        let desc = VmDesc::new();
        assert!(desc.instruction("DoesNotExist", vec![]).is_err());
    }
}
