// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Streams, their descriptors, and the worker-thread contexts that own
//! them.
//!
//! Ownership follows the single-owner-plus-handles rule: a [`ThreadCtx`]
//! owns its streams; the per-type [`StreamRtDesc`] maps stream ids to
//! non-owning handles for lookup; the scheduler's active-stream list tracks
//! membership through a flag on the stream record that only the scheduler
//! thread touches.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_queue::SegQueue;

use super::id::{ChainId, StreamId, StreamTypeId};
use super::instruction::InstructionMsg;
use super::stream_type::StreamType;

/// Static description of one stream type's streams.
#[derive(Debug, Clone, Copy)]
pub struct StreamDesc {
    stream_type_id: StreamTypeId,
    num_machines: i64,
    num_streams_per_machine: i64,
    num_streams_per_thread: i64,
    start_parallel_id: i64,
}

impl StreamDesc {
    pub fn new(
        stream_type_id: StreamTypeId,
        num_machines: i64,
        num_streams_per_machine: i64,
        num_streams_per_thread: i64,
    ) -> Self {
        assert!(num_machines > 0 && num_streams_per_machine > 0 && num_streams_per_thread > 0);
        Self {
            stream_type_id,
            num_machines,
            num_streams_per_machine,
            num_streams_per_thread,
            start_parallel_id: 0,
        }
    }

    pub fn with_start_parallel_id(mut self, start_parallel_id: i64) -> Self {
        self.start_parallel_id = start_parallel_id;
        self
    }

    pub fn stream_type_id(&self) -> StreamTypeId {
        self.stream_type_id
    }

    pub fn num_machines(&self) -> i64 {
        self.num_machines
    }

    pub fn num_streams_per_machine(&self) -> i64 {
        self.num_streams_per_machine
    }

    pub fn num_streams_per_thread(&self) -> i64 {
        self.num_streams_per_thread
    }

    pub fn start_parallel_id(&self) -> i64 {
        self.start_parallel_id
    }

    /// Total number of streams (one per parallel rank).
    pub fn parallel_num(&self) -> i64 {
        self.num_machines * self.num_streams_per_machine
    }

    /// Worker threads backing this type's streams.
    pub fn num_threads(&self) -> i64 {
        self.parallel_num() / self.num_streams_per_thread
    }
}

/// A single stream: a per-rank in-order execution lane.
#[derive(Debug)]
pub struct Stream {
    stream_id: StreamId,
    running_chains: VecDeque<ChainId>,
    /// Membership in the scheduler's active-stream list. Scheduler thread
    /// only.
    pub(crate) active: bool,
}

impl Stream {
    fn new(stream_id: StreamId) -> Self {
        Self { stream_id, running_chains: VecDeque::new(), active: false }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Chains currently dispatched to this stream, oldest first.
    pub fn running_chains(&self) -> &VecDeque<ChainId> {
        &self.running_chains
    }

    pub(crate) fn running_chains_mut(&mut self) -> &mut VecDeque<ChainId> {
        &mut self.running_chains
    }
}

/// A chain handed to a worker thread: the instruction payload plus the
/// shared completion flag the scheduler polls.
#[derive(Debug)]
pub struct WorkItem {
    pub chain_id: ChainId,
    pub stream_id: StreamId,
    pub msgs: Vec<Arc<InstructionMsg>>,
    pub done: Arc<AtomicBool>,
}

/// A worker context owning the streams that share one thread.
///
/// The pending queue is single-producer (the scheduler thread) and
/// single-consumer (this context's worker); completion flows back through
/// each work item's `done` flag.
#[derive(Debug)]
pub struct ThreadCtx {
    stream_type_id: StreamTypeId,
    stream_type: Arc<dyn StreamType>,
    streams: Vec<Stream>,
    pending_chains: Arc<SegQueue<WorkItem>>,
}

impl ThreadCtx {
    pub(crate) fn new(
        stream_type_id: StreamTypeId,
        stream_type: Arc<dyn StreamType>,
        stream_ids: impl IntoIterator<Item = StreamId>,
    ) -> Self {
        Self {
            stream_type_id,
            stream_type,
            streams: stream_ids.into_iter().map(Stream::new).collect(),
            pending_chains: Arc::new(SegQueue::new()),
        }
    }

    pub fn stream_type_id(&self) -> StreamTypeId {
        self.stream_type_id
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    pub(crate) fn streams_mut(&mut self) -> &mut [Stream] {
        &mut self.streams
    }

    pub(crate) fn push_pending(&self, item: WorkItem) {
        self.pending_chains.push(item);
    }

    pub fn pending_len(&self) -> usize {
        self.pending_chains.len()
    }

    /// Drains the pending queue, executing each chain through the stream
    /// type and publishing its completion flag. Returns the number of chains
    /// run. Callable from the owning worker thread or, in tests, from
    /// whichever thread drives the context.
    pub fn try_receive_and_run(&self) -> usize {
        run_pending(self.stream_type.as_ref(), &self.pending_chains)
    }

    pub(crate) fn worker_parts(&self) -> (Arc<dyn StreamType>, Arc<SegQueue<WorkItem>>) {
        (self.stream_type.clone(), self.pending_chains.clone())
    }
}

fn run_pending(stream_type: &dyn StreamType, pending: &SegQueue<WorkItem>) -> usize {
    let mut ran = 0;
    while let Some(item) = pending.pop() {
        stream_type.run_worker(&item);
        item.done.store(true, Ordering::Release);
        ran += 1;
    }
    ran
}

/// Runtime descriptor of one stream type: the static descriptor plus the
/// lookup map from stream id to its owning thread context.
#[derive(Debug)]
pub struct StreamRtDesc {
    desc: StreamDesc,
    stream_id2handle: BTreeMap<StreamId, StreamHandle>,
}

/// Non-owning handle locating a stream inside the scheduler's thread
/// contexts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StreamHandle {
    pub thread_idx: usize,
    pub stream_idx: usize,
}

impl StreamRtDesc {
    pub(crate) fn new(desc: StreamDesc) -> Self {
        Self { desc, stream_id2handle: BTreeMap::new() }
    }

    pub fn desc(&self) -> &StreamDesc {
        &self.desc
    }

    /// Stream ids under this descriptor, in rank order.
    pub fn stream_ids(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.stream_id2handle.keys().copied()
    }

    pub(crate) fn insert_handle(&mut self, stream_id: StreamId, handle: StreamHandle) {
        let previous = self.stream_id2handle.insert(stream_id, handle);
        assert!(previous.is_none(), "stream {stream_id:?} registered twice");
    }

    pub(crate) fn handle(&self, stream_id: StreamId) -> StreamHandle {
        *self
            .stream_id2handle
            .get(&stream_id)
            .unwrap_or_else(|| panic!("no stream {stream_id:?} under its runtime descriptor"))
    }
}

/// Worker threads spawned for the stream types that do not share the
/// scheduler thread. Dropping the pool (or calling [`WorkerPool::shutdown`])
/// raises the shutdown flag and joins every thread.
#[derive(Debug)]
pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

const WORKER_IDLE_PARK: Duration = Duration::from_micros(100);

impl WorkerPool {
    pub(crate) fn spawn(thread_ctxs: &[ThreadCtx]) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();
        for ctx in thread_ctxs {
            let (stream_type, pending) = ctx.worker_parts();
            if stream_type.sharing_scheduler_thread() {
                continue;
            }
            let shutdown = shutdown.clone();
            let stream_type_id = ctx.stream_type_id();
            handles.push(std::thread::spawn(move || {
                tracing::debug!(?stream_type_id, "worker thread started");
                loop {
                    let ran = run_pending(stream_type.as_ref(), &pending);
                    if ran == 0 {
                        if shutdown.load(Ordering::Acquire) && pending.is_empty() {
                            break;
                        }
                        std::thread::park_timeout(WORKER_IDLE_PARK);
                    }
                }
                tracing::debug!(?stream_type_id, "worker thread exiting");
            }));
        }
        Self { shutdown, handles }
    }

    /// Signals shutdown and joins every worker. Pending chains already
    /// queued are drained before the workers exit.
    pub fn shutdown(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            handle.thread().unpark();
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
