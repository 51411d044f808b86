// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Instruction chains and the chain dependency graph.
//!
//! A chain is the scheduler's dispatch unit: one or more instruction
//! contexts bound to the same stream. Chains live in a [`ChainSet`] arena
//! and reference each other by [`ChainId`]; an edge is present in both
//! endpoints' edge sets or in neither.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::id::{ChainId, StreamId};
use super::instruction::InstrCtx;

/// A sequence of instructions executed consecutively on one stream.
#[derive(Debug)]
pub struct InstrChain {
    id: ChainId,
    stream_id: StreamId,
    instructions: Vec<InstrCtx>,
    pub(crate) in_edges: BTreeSet<ChainId>,
    pub(crate) out_edges: BTreeSet<ChainId>,
    done: Arc<AtomicBool>,
}

impl InstrChain {
    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn instructions(&self) -> &[InstrCtx] {
        &self.instructions
    }

    pub(crate) fn sole_instruction_mut(&mut self) -> &mut InstrCtx {
        assert_eq!(self.instructions.len(), 1, "chain not yet merged holds exactly one instruction");
        &mut self.instructions[0]
    }

    pub fn in_edges(&self) -> &BTreeSet<ChainId> {
        &self.in_edges
    }

    pub fn out_edges(&self) -> &BTreeSet<ChainId> {
        &self.out_edges
    }

    /// Executor-reported completion, published with release ordering by the
    /// executing thread and read with acquire ordering on the scheduler
    /// thread.
    pub fn done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub(crate) fn done_flag(&self) -> Arc<AtomicBool> {
        self.done.clone()
    }

    pub(crate) fn mark_done(&self) {
        self.done.store(true, Ordering::Release);
    }
}

/// Arena of live chains, addressed by handle.
#[derive(Debug, Default)]
pub struct ChainSet {
    chains: HashMap<ChainId, InstrChain>,
    next_id: u64,
}

impl ChainSet {
    pub fn create(&mut self, stream_id: StreamId, instr_ctx: InstrCtx) -> ChainId {
        let id = ChainId(self.next_id);
        self.next_id += 1;
        self.chains.insert(
            id,
            InstrChain {
                id,
                stream_id,
                instructions: vec![instr_ctx],
                in_edges: BTreeSet::new(),
                out_edges: BTreeSet::new(),
                done: Arc::new(AtomicBool::new(false)),
            },
        );
        id
    }

    pub fn get(&self, id: ChainId) -> &InstrChain {
        self.chains.get(&id).unwrap_or_else(|| panic!("chain {id:?} is not live"))
    }

    pub fn try_get(&self, id: ChainId) -> Option<&InstrChain> {
        self.chains.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ChainId) -> &mut InstrChain {
        self.chains.get_mut(&id).unwrap_or_else(|| panic!("chain {id:?} is not live"))
    }

    pub(crate) fn remove(&mut self, id: ChainId) -> InstrChain {
        self.chains.remove(&id).unwrap_or_else(|| panic!("chain {id:?} is not live"))
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Inserts the edge `src → dst` into both endpoints.
    ///
    /// Both insertions must agree: inserting an edge into only one endpoint
    /// would corrupt the graph, so a mismatch is fatal.
    pub(crate) fn connect(&mut self, src: ChainId, dst: ChainId) {
        assert_ne!(src, dst, "chain {src:?} cannot depend on itself");
        let src_inserted = self.get_mut(src).out_edges.insert(dst);
        let dst_inserted = self.get_mut(dst).in_edges.insert(src);
        assert_eq!(
            src_inserted, dst_inserted,
            "half-inserted edge {src:?} -> {dst:?}: out={src_inserted} in={dst_inserted}"
        );
    }
}

/// Hook invoked between dependency linking and ready filtering.
///
/// A policy may coalesce chains that share a stream and have compatible
/// edge sets into a single multi-instruction chain. The installed default
/// performs no coalescing.
pub trait ChainMergePolicy: Send {
    fn merge(&self, chains: &mut ChainSet, new_chains: &mut Vec<ChainId>);
}

/// The identity policy: every chain stays as built.
#[derive(Debug, Default)]
pub struct IdentityMerge;

impl ChainMergePolicy for IdentityMerge {
    fn merge(&self, _chains: &mut ChainSet, _new_chains: &mut Vec<ChainId>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::id::{InstrTypeId, StreamTypeId};
    use crate::vm::instruction::InstructionMsg;

    fn chain(chains: &mut ChainSet) -> ChainId {
        let stream_id = StreamId { stream_type_id: StreamTypeId::compute(1), parallel_id: 0 };
        let msg = Arc::new(InstructionMsg::new(
            "Nop",
            InstrTypeId { stream_type_id: stream_id.stream_type_id },
            vec![],
        ));
        chains.create(stream_id, InstrCtx::new(msg, 0))
    }

    #[test]
    fn connect_inserts_the_edge_at_both_endpoints() {
        let mut chains = ChainSet::default();
        let a = chain(&mut chains);
        let b = chain(&mut chains);
        chains.connect(a, b);
        assert!(chains.get(a).out_edges().contains(&b));
        assert!(chains.get(b).in_edges().contains(&a));
        assert!(chains.get(a).in_edges().is_empty());
        assert!(chains.get(b).out_edges().is_empty());
    }

    #[test]
    fn reconnecting_an_existing_edge_is_a_no_op() {
        let mut chains = ChainSet::default();
        let a = chain(&mut chains);
        let b = chain(&mut chains);
        chains.connect(a, b);
        chains.connect(a, b);
        assert_eq!(chains.get(a).out_edges().len(), 1);
        assert_eq!(chains.get(b).in_edges().len(), 1);
    }

    #[test]
    #[should_panic(expected = "cannot depend on itself")]
    fn self_edges_are_rejected() {
        let mut chains = ChainSet::default();
        let a = chain(&mut chains);
        chains.connect(a, a);
    }

    #[test]
    fn done_flag_round_trips_through_the_shared_handle() {
        let mut chains = ChainSet::default();
        let a = chain(&mut chains);
        let flag = chains.get(a).done_flag();
        assert!(!chains.get(a).done());
        flag.store(true, Ordering::Release);
        assert!(chains.get(a).done());
    }

    #[test]
    fn identity_merge_leaves_chains_untouched() {
        let mut chains = ChainSet::default();
        let a = chain(&mut chains);
        let b = chain(&mut chains);
        let mut new_chains = vec![a, b];
        IdentityMerge.merge(&mut chains, &mut new_chains);
        assert_eq!(new_chains, vec![a, b]);
        assert_eq!(chains.len(), 2);
    }
}
