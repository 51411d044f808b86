// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The cooperative instruction scheduler.
//!
//! One thread owns the scheduler and drives [`Scheduler::schedule`] ticks;
//! the only concurrent entry point is instruction ingress, which appends to
//! the pending list under the ingress mutex. Every other structure — the
//! waiting list, the active-stream list, the chain arena, the mirrored
//! object access lists — is scheduler-thread-only.
//!
//! A tick proceeds in fixed phases:
//!
//! 1. release finished chains from active streams, propagating readiness
//!    along their out-edges;
//! 2. drain the pending list;
//! 3. run source instructions of scheduler-shared stream types inline;
//! 4. materialize one chain per stream for every remaining instruction;
//! 5. register operand accesses and link chain dependencies;
//! 6. run the chain-merge hook;
//! 7. move dependency-free chains to the ready list, the rest to waiting;
//! 8. dispatch ready chains to their streams.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::utils::BalancedSplitter;

use super::chain::{ChainMergePolicy, ChainSet, IdentityMerge, InstrChain};
use super::desc::{InstrTypeDesc, VmDesc};
use super::id::{AccessId, ChainId, InterpretType, MirroredObjectId, ObjectId, StreamId, StreamTypeId};
use super::instruction::{InstrCtx, InstrOperand, InstructionMsg, MirroredObjectOperand};
use super::object::{Access, ObjectPool};
use super::stream::{StreamHandle, StreamRtDesc, ThreadCtx, WorkItem, WorkerPool};
use super::stream_type::{InstructionRunCtx, StreamType};

/// Cloneable ingress handle. Senders may live on any thread; each send
/// appends to the scheduler's pending list under the ingress mutex.
#[derive(Clone)]
pub struct InstructionSender {
    pending_msgs: Arc<Mutex<Vec<InstructionMsg>>>,
    instr_types: Arc<HashMap<String, InstrTypeDesc>>,
}

impl InstructionSender {
    /// Enqueues compute instructions. For every instruction whose type
    /// declares an infer counterpart, the infer twin is synthesized and
    /// placed immediately before it.
    pub fn send(&self, msgs: Vec<InstructionMsg>) {
        let mut expanded = Vec::with_capacity(msgs.len() * 2);
        for msg in msgs {
            let infer = self
                .instr_types
                .get(msg.name())
                .and_then(|instr_type| instr_type.infer);
            if let Some(infer_stream_type_id) = infer {
                expanded.push(msg.make_infer_twin(infer_stream_type_id));
            }
            expanded.push(msg);
        }
        self.pending_msgs.lock().extend(expanded);
    }
}

/// The VM scheduler.
pub struct Scheduler {
    pending_msgs: Arc<Mutex<Vec<InstructionMsg>>>,
    instr_types: Arc<HashMap<String, InstrTypeDesc>>,
    stream_types: BTreeMap<StreamTypeId, Arc<dyn StreamType>>,
    stream_rt_descs: BTreeMap<StreamTypeId, StreamRtDesc>,
    thread_ctxs: Vec<ThreadCtx>,
    objects: ObjectPool,
    chains: ChainSet,
    waiting_chains: BTreeSet<ChainId>,
    active_streams: Vec<StreamId>,
    merge_policy: Box<dyn ChainMergePolicy>,
    next_access_id: u64,
}

impl Scheduler {
    pub fn new(desc: VmDesc) -> Result<Self> {
        desc.validate()?;
        let (stream_descs, stream_types, instr_types) = desc.into_parts();

        let mut thread_ctxs = Vec::new();
        let mut stream_rt_descs = BTreeMap::new();
        for (&stream_type_id, stream_desc) in &stream_descs {
            let stream_type = stream_types
                .get(&stream_type_id)
                .expect("validated: every descriptor has a stream type")
                .clone();
            let mut rt_desc = StreamRtDesc::new(*stream_desc);
            let splitter =
                BalancedSplitter::new(stream_desc.parallel_num(), stream_desc.num_threads());
            for thread in 0..stream_desc.num_threads() {
                let thread_idx = thread_ctxs.len();
                let mut stream_ids = Vec::new();
                for (stream_idx, rel_parallel_id) in splitter.at(thread).enumerate() {
                    let stream_id = StreamId {
                        stream_type_id,
                        parallel_id: stream_desc.start_parallel_id() + rel_parallel_id,
                    };
                    rt_desc.insert_handle(stream_id, StreamHandle { thread_idx, stream_idx });
                    stream_ids.push(stream_id);
                }
                thread_ctxs.push(ThreadCtx::new(stream_type_id, stream_type.clone(), stream_ids));
            }
            stream_rt_descs.insert(stream_type_id, rt_desc);
        }

        Ok(Self {
            pending_msgs: Arc::new(Mutex::new(Vec::new())),
            instr_types: Arc::new(instr_types),
            stream_types,
            stream_rt_descs,
            thread_ctxs,
            objects: ObjectPool::default(),
            chains: ChainSet::default(),
            waiting_chains: BTreeSet::new(),
            active_streams: Vec::new(),
            merge_policy: Box::new(IdentityMerge),
            next_access_id: 0,
        })
    }

    /// Installs a chain-merge policy in place of the identity default.
    pub fn set_merge_policy(&mut self, policy: Box<dyn ChainMergePolicy>) {
        self.merge_policy = policy;
    }

    /// An ingress handle usable from any thread.
    pub fn sender(&self) -> InstructionSender {
        InstructionSender {
            pending_msgs: self.pending_msgs.clone(),
            instr_types: self.instr_types.clone(),
        }
    }

    /// Enqueues compute instructions (see [`InstructionSender::send`]).
    pub fn receive(&self, msgs: Vec<InstructionMsg>) {
        self.sender().send(msgs);
    }

    /// One scheduler tick.
    pub fn schedule(&mut self) {
        let mut ready: Vec<ChainId> = Vec::new();
        self.release_finished_chains(&mut ready);

        let pending = std::mem::take(&mut *self.pending_msgs.lock());
        if !pending.is_empty() {
            let remaining = self.filter_and_run_source_instructions(pending);
            let mut new_chains = self.make_instr_chains(remaining);
            self.consume_mirrored_objects(&new_chains);
            self.merge_policy.merge(&mut self.chains, &mut new_chains);
            for chain_id in new_chains {
                if self.chains.get(chain_id).in_edges().is_empty() {
                    ready.push(chain_id);
                } else {
                    self.waiting_chains.insert(chain_id);
                }
            }
        }

        self.dispatch(ready);
    }

    /// True when nothing is pending, waiting, or running.
    pub fn is_empty(&self) -> bool {
        self.pending_msgs.lock().is_empty()
            && self.waiting_chains.is_empty()
            && self.active_streams.is_empty()
    }

    /// Spawns one worker thread per worker-backed thread context.
    pub fn launch_workers(&self) -> WorkerPool {
        WorkerPool::spawn(&self.thread_ctxs)
    }

    // ------------------------------------------------------------------
    // introspection
    // ------------------------------------------------------------------

    pub fn pending_msg_count(&self) -> usize {
        self.pending_msgs.lock().len()
    }

    pub fn waiting_chains(&self) -> &BTreeSet<ChainId> {
        &self.waiting_chains
    }

    pub fn active_streams(&self) -> &[StreamId] {
        &self.active_streams
    }

    pub fn thread_ctxs(&self) -> &[ThreadCtx] {
        &self.thread_ctxs
    }

    pub fn chain(&self, id: ChainId) -> Option<&InstrChain> {
        self.chains.try_get(id)
    }

    pub fn live_chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn objects(&self) -> &ObjectPool {
        &self.objects
    }

    // ------------------------------------------------------------------
    // tick phases
    // ------------------------------------------------------------------

    /// Phase 1: pop the done prefix of every active stream's running list,
    /// erase the released chains' accesses and out-edges, and collect
    /// successors whose last in-edge disappeared.
    fn release_finished_chains(&mut self, ready: &mut Vec<ChainId>) {
        let Self {
            stream_rt_descs,
            thread_ctxs,
            chains,
            objects,
            waiting_chains,
            active_streams,
            ..
        } = self;
        let streams = std::mem::take(active_streams);
        for stream_id in streams {
            let handle = stream_rt_descs
                .get(&stream_id.stream_type_id)
                .unwrap_or_else(|| panic!("active stream {stream_id:?} has no runtime descriptor"))
                .handle(stream_id);
            let stream = &mut thread_ctxs[handle.thread_idx].streams_mut()[handle.stream_idx];
            loop {
                let Some(&front) = stream.running_chains().front() else { break };
                if !chains.get(front).done() {
                    break;
                }
                stream.running_chains_mut().pop_front();
                let chain = chains.remove(front);
                tracing::trace!(chain = ?front, stream = ?stream_id, "releasing finished chain");
                Self::release_chain(chains, objects, waiting_chains, ready, &chain);
            }
            if stream.running_chains().is_empty() {
                stream.active = false;
            } else {
                active_streams.push(stream_id);
            }
        }
    }

    fn release_chain(
        chains: &mut ChainSet,
        objects: &mut ObjectPool,
        waiting_chains: &mut BTreeSet<ChainId>,
        ready: &mut Vec<ChainId>,
        chain: &InstrChain,
    ) {
        for instr in chain.instructions() {
            for (&mirrored_object_id, &access_id) in instr.accesses() {
                // A later writer may already have erased this access.
                objects.mirrored_mut(mirrored_object_id).remove_access(access_id);
            }
        }
        for &dst in chain.out_edges() {
            let dst_chain = chains.get_mut(dst);
            let removed = dst_chain.in_edges.remove(&chain.id());
            assert!(removed, "edge {:?} -> {dst:?} missing from its destination", chain.id());
            if dst_chain.in_edges.is_empty() {
                let was_waiting = waiting_chains.remove(&dst);
                assert!(was_waiting, "chain {dst:?} became ready but was not waiting");
                ready.push(dst);
            }
        }
    }

    /// Phase 3: source instructions of scheduler-shared stream types run
    /// inline and never touch the chain graph.
    fn filter_and_run_source_instructions(
        &mut self,
        msgs: Vec<InstructionMsg>,
    ) -> Vec<InstructionMsg> {
        let Self { stream_types, objects, .. } = self;
        let mut remaining = Vec::with_capacity(msgs.len());
        for msg in msgs {
            let stream_type_id = msg.stream_type_id();
            let stream_type = stream_types
                .get(&stream_type_id)
                .unwrap_or_else(|| panic!("no stream type registered for {stream_type_id:?}"));
            if msg.is_source() && stream_type.sharing_scheduler_thread() {
                tracing::trace!(name = msg.name(), "running source instruction inline");
                let mut ctx = InstructionRunCtx {
                    interpret_type: stream_type_id.interpret,
                    objects: &mut *objects,
                };
                stream_type.run(&mut ctx, &msg);
            } else {
                remaining.push(msg);
            }
        }
        remaining
    }

    /// Phase 4: one chain per stream under the instruction's runtime
    /// descriptor — one per parallel rank that should run it.
    fn make_instr_chains(&mut self, msgs: Vec<InstructionMsg>) -> Vec<ChainId> {
        let Self { stream_rt_descs, chains, .. } = self;
        let mut new_chains = Vec::new();
        for msg in msgs {
            let stream_type_id = msg.stream_type_id();
            let rt_desc = stream_rt_descs
                .get(&stream_type_id)
                .unwrap_or_else(|| panic!("no stream runtime descriptor for {stream_type_id:?}"));
            let msg = Arc::new(msg);
            for stream_id in rt_desc.stream_ids() {
                let instr_ctx = InstrCtx::new(msg.clone(), stream_id.parallel_id);
                new_chains.push(chains.create(stream_id, instr_ctx));
            }
        }
        new_chains
    }

    /// Phase 5: register operand accesses (writes first, then reads) and
    /// link chain dependencies from each touched object's access list.
    fn consume_mirrored_objects(&mut self, new_chains: &[ChainId]) {
        let Self { chains, objects, next_access_id, .. } = self;
        for &chain_id in new_chains {
            let (parallel_id, interpret, msg) = {
                let chain = chains.get(chain_id);
                assert_eq!(
                    chain.instructions().len(),
                    1,
                    "dependency linking runs before merging: one instruction per chain"
                );
                let instr = &chain.instructions()[0];
                (instr.parallel_id(), chain.stream_id().stream_type_id.interpret, instr.msg().clone())
            };

            // Write pass. Registering writes before reads guarantees the
            // write-after-read edge from a prior writer exists before this
            // chain's own reads are appended.
            for operand in msg.operands() {
                match operand {
                    InstrOperand::Mut(op) => match interpret {
                        InterpretType::Compute => Self::register_access(
                            objects,
                            chains,
                            next_access_id,
                            chain_id,
                            ObjectId::self_of(op.logical_object_id),
                            op,
                            parallel_id,
                            false,
                        ),
                        InterpretType::Infer => Self::register_access(
                            objects,
                            chains,
                            next_access_id,
                            chain_id,
                            ObjectId::type_of(op.logical_object_id),
                            op,
                            parallel_id,
                            false,
                        ),
                    },
                    InstrOperand::Mut2(op) => {
                        Self::register_access(
                            objects,
                            chains,
                            next_access_id,
                            chain_id,
                            ObjectId::type_of(op.logical_object_id),
                            op,
                            parallel_id,
                            false,
                        );
                        if interpret == InterpretType::Compute {
                            Self::register_access(
                                objects,
                                chains,
                                next_access_id,
                                chain_id,
                                ObjectId::self_of(op.logical_object_id),
                                op,
                                parallel_id,
                                false,
                            );
                        }
                    }
                    InstrOperand::Const(_)
                    | InstrOperand::DoubleI(_)
                    | InstrOperand::Int64I(_)
                    | InstrOperand::Uint64I(_)
                    | InstrOperand::BoolI(_) => {}
                }
            }

            // Read pass.
            for operand in msg.operands() {
                match operand {
                    InstrOperand::Const(op) => {
                        Self::register_access(
                            objects,
                            chains,
                            next_access_id,
                            chain_id,
                            ObjectId::type_of(op.logical_object_id),
                            op,
                            parallel_id,
                            true,
                        );
                        if interpret == InterpretType::Compute {
                            Self::register_access(
                                objects,
                                chains,
                                next_access_id,
                                chain_id,
                                ObjectId::self_of(op.logical_object_id),
                                op,
                                parallel_id,
                                true,
                            );
                        }
                    }
                    InstrOperand::Mut(op) => {
                        if interpret == InterpretType::Compute {
                            Self::register_access(
                                objects,
                                chains,
                                next_access_id,
                                chain_id,
                                ObjectId::type_of(op.logical_object_id),
                                op,
                                parallel_id,
                                true,
                            );
                        }
                    }
                    InstrOperand::Mut2(_)
                    | InstrOperand::DoubleI(_)
                    | InstrOperand::Int64I(_)
                    | InstrOperand::Uint64I(_)
                    | InstrOperand::BoolI(_) => {}
                }
            }

            // Edge construction from each touched object's access list.
            let registered: Vec<(MirroredObjectId, AccessId)> = chains
                .get(chain_id)
                .instructions()[0]
                .accesses()
                .iter()
                .map(|(&mirrored_object_id, &access_id)| (mirrored_object_id, access_id))
                .collect();
            for (mirrored_object_id, access_id) in registered {
                let (list_len, this_access, head) = {
                    let mirrored_object = objects.mirrored_mut(mirrored_object_id);
                    (
                        mirrored_object.access_list_len(),
                        mirrored_object.access(access_id).expect("just registered"),
                        mirrored_object.head_access().expect("non-empty"),
                    )
                };
                if list_len == 1 {
                    continue;
                }
                if this_access.is_const {
                    // A reader only serializes behind a write at the head.
                    let (_, head_access) = head;
                    if !head_access.is_const {
                        chains.connect(head_access.chain, chain_id);
                    }
                } else {
                    // A writer serializes behind every prior access and
                    // dominates them: the priors leave the access list.
                    let priors = objects.mirrored_mut(mirrored_object_id).accesses_before(access_id);
                    for (prior_id, prior) in priors {
                        chains.connect(prior.chain, chain_id);
                        objects.mirrored_mut(mirrored_object_id).remove_access(prior_id);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn register_access(
        objects: &mut ObjectPool,
        chains: &mut ChainSet,
        next_access_id: &mut u64,
        chain_id: ChainId,
        object_id: ObjectId,
        operand: &MirroredObjectOperand,
        parallel_id: i64,
        is_const: bool,
    ) {
        objects.for_each_mirrored_object(object_id, operand, parallel_id, |mirrored_object| {
            let instr = chains.get_mut(chain_id).sole_instruction_mut();
            match instr.accesses_mut().entry(mirrored_object.id()) {
                // The instruction already accesses this object; the first
                // (strongest) registration stands.
                Entry::Occupied(_) => {}
                Entry::Vacant(vacant) => {
                    let access_id = AccessId(*next_access_id);
                    *next_access_id += 1;
                    vacant.insert(access_id);
                    mirrored_object.push_access(access_id, Access { chain: chain_id, is_const });
                }
            }
        });
    }

    /// Phase 8: move each ready chain onto its stream, activate the stream,
    /// and execute inline or hand off to the owning worker thread.
    fn dispatch(&mut self, ready: Vec<ChainId>) {
        let Self {
            stream_rt_descs,
            thread_ctxs,
            stream_types,
            chains,
            objects,
            active_streams,
            ..
        } = self;
        for chain_id in ready {
            let stream_id = chains.get(chain_id).stream_id();
            let handle = stream_rt_descs
                .get(&stream_id.stream_type_id)
                .unwrap_or_else(|| panic!("ready chain on unknown stream {stream_id:?}"))
                .handle(stream_id);
            let thread_ctx = &mut thread_ctxs[handle.thread_idx];
            {
                let stream = &mut thread_ctx.streams_mut()[handle.stream_idx];
                stream.running_chains_mut().push_back(chain_id);
                if !stream.active {
                    stream.active = true;
                    active_streams.push(stream_id);
                }
            }
            let stream_type = stream_types
                .get(&stream_id.stream_type_id)
                .unwrap_or_else(|| panic!("no stream type registered for {stream_id:?}"))
                .clone();
            tracing::debug!(chain = ?chain_id, stream = ?stream_id, "dispatching chain");
            if stream_type.sharing_scheduler_thread() {
                let chain = chains.get(chain_id);
                let mut ctx = InstructionRunCtx {
                    interpret_type: stream_id.stream_type_id.interpret,
                    objects: &mut *objects,
                };
                for instr in chain.instructions() {
                    stream_type.run(&mut ctx, instr.msg());
                }
                chain.mark_done();
            } else {
                let chain = chains.get(chain_id);
                thread_ctx.push_pending(WorkItem {
                    chain_id,
                    stream_id,
                    msgs: chain.instructions().iter().map(|instr| instr.msg().clone()).collect(),
                    done: chain.done_flag(),
                });
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending_msg_count())
            .field("waiting", &self.waiting_chains.len())
            .field("active_streams", &self.active_streams)
            .field("live_chains", &self.chains.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::desc::InstrTypeDesc;
    use crate::vm::stream::StreamDesc;
    use crate::vm::stream_type::NopStreamType;
    use crate::vm::InstrOperand;

    /// A description with a Nop stream of `num_streams` ranks over
    /// `num_streams / per_thread` worker threads.
    fn nop_vm_desc(num_streams: i64, per_thread: i64) -> VmDesc {
        let mut desc = VmDesc::new();
        let nop_id = StreamTypeId::compute(NopStreamType::CODE);
        desc.register_stream_type(nop_id, Arc::new(NopStreamType));
        desc.add_stream_desc(StreamDesc::new(nop_id, 1, num_streams, per_thread)).unwrap();
        desc.register_instr_type(NopStreamType::NOP, InstrTypeDesc { compute: nop_id, infer: None })
            .unwrap();
        desc
    }

    fn nop(desc: &VmDesc, operands: Vec<InstrOperand>) -> InstructionMsg {
        desc.instruction(NopStreamType::NOP, operands).unwrap()
    }

    #[test]
    fn source_control_instructions_bypass_the_chain_graph() {
        let desc = nop_vm_desc(1, 1);
        let new_symbol = desc.new_symbol(9527, 1);
        let mut scheduler = Scheduler::new(desc).unwrap();
        scheduler.receive(vec![new_symbol]);
        // Compute instruction plus its synthesized infer twin.
        assert_eq!(scheduler.pending_msg_count(), 2);
        scheduler.schedule();
        assert_eq!(scheduler.pending_msg_count(), 0);
        assert!(scheduler.waiting_chains().is_empty());
        assert_eq!(scheduler.live_chain_count(), 0);
        assert!(scheduler.active_streams().is_empty());
        // Both passes ran: the self object and the type object exist.
        assert!(scheduler.objects().logical_object(ObjectId::self_of(9527)).is_some());
        assert!(scheduler.objects().logical_object(ObjectId::type_of(9527)).is_some());
    }

    #[test]
    fn one_chain_per_stream_under_the_descriptor() {
        let desc = nop_vm_desc(4, 2);
        let msg = nop(&desc, vec![]);
        let mut scheduler = Scheduler::new(desc).unwrap();
        scheduler.receive(vec![msg]);
        scheduler.schedule();
        // Four ranks, so four chains, all dependency-free and running.
        assert_eq!(scheduler.live_chain_count(), 4);
        assert!(scheduler.waiting_chains().is_empty());
        assert_eq!(scheduler.active_streams().len(), 4);
    }

    #[test]
    fn waiting_membership_tracks_in_edges() {
        let desc = nop_vm_desc(1, 1);
        let new_symbol = desc.new_symbol(9527, 1);
        let nop0 = nop(&desc, vec![InstrOperand::Mut(MirroredObjectOperand::new(9527))]);
        let nop1 = nop(&desc, vec![InstrOperand::Mut(MirroredObjectOperand::new(9527))]);
        let mut scheduler = Scheduler::new(desc).unwrap();
        scheduler.receive(vec![new_symbol, nop0, nop1]);
        scheduler.schedule();
        for &chain_id in scheduler.waiting_chains() {
            assert!(!scheduler.chain(chain_id).unwrap().in_edges().is_empty());
        }
        for thread_ctx in scheduler.thread_ctxs() {
            for stream in thread_ctx.streams() {
                for &chain_id in stream.running_chains() {
                    assert!(scheduler.chain(chain_id).unwrap().in_edges().is_empty());
                }
            }
        }
    }

    #[test]
    fn access_lists_stay_well_formed_across_ticks() {
        let desc = nop_vm_desc(1, 1);
        let new_symbol = desc.new_symbol(9527, 1);
        let msgs: Vec<_> = (0..4)
            .map(|_| nop(&desc, vec![InstrOperand::Mut(MirroredObjectOperand::new(9527))]))
            .collect();
        let mut scheduler = Scheduler::new(desc).unwrap();
        let mut batch = vec![new_symbol];
        batch.extend(msgs);
        scheduler.receive(batch);
        for _ in 0..6 {
            scheduler.schedule();
            for object_id in [ObjectId::self_of(9527), ObjectId::type_of(9527)] {
                let object = scheduler.objects().logical_object(object_id).unwrap();
                let mirrored = object.mirrored_object(0).unwrap();
                assert!(mirrored.leading_run_is_well_formed());
            }
            for thread_ctx in scheduler.thread_ctxs() {
                thread_ctx.try_receive_and_run();
            }
        }
        assert!(scheduler.is_empty());
    }

    #[test]
    fn all_ranks_operand_fans_in_from_every_mirrored_instance() {
        // One writer per rank, then a writer touching all four ranks: the
        // first all-ranks chain must wait on all four per-rank writers,
        // and the remaining all-ranks chains serialize behind it.
        let desc = nop_vm_desc(4, 2);
        let new_symbol = desc.new_symbol(77, 4);
        let rank_writer = nop(&desc, vec![InstrOperand::Mut(MirroredObjectOperand::new(77))]);
        let all_writer = nop(&desc, vec![InstrOperand::Mut(MirroredObjectOperand::all(77))]);
        let mut scheduler = Scheduler::new(desc).unwrap();
        scheduler.receive(vec![new_symbol, rank_writer, all_writer]);
        scheduler.schedule();
        // Both instructions materialize one chain per rank. The per-rank
        // writers touch disjoint objects and all run; the all-ranks chains
        // wait.
        assert_eq!(scheduler.live_chain_count(), 8);
        assert_eq!(scheduler.waiting_chains().len(), 4);
        let fan_in: Vec<usize> = scheduler
            .waiting_chains()
            .iter()
            .map(|&chain_id| scheduler.chain(chain_id).unwrap().in_edges().len())
            .collect();
        // The first all-ranks chain gathers one edge per rank writer; each
        // later one waits only on its dominating predecessor.
        assert_eq!(fan_in, vec![4, 1, 1, 1]);
    }

    #[test]
    #[should_panic(expected = "no logical object")]
    fn operands_on_unknown_objects_are_fatal() {
        let desc = nop_vm_desc(1, 1);
        let orphan = nop(&desc, vec![InstrOperand::Mut(MirroredObjectOperand::new(404))]);
        let mut scheduler = Scheduler::new(desc).unwrap();
        scheduler.receive(vec![orphan]);
        scheduler.schedule();
    }
}
