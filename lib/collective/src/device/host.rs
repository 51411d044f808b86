// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-local [`CommDevice`] implementation.
//!
//! `HostDevice` performs no data movement: it records every primitive
//! invocation so tests can assert on launch order, grouping and stream
//! selection, and it completes events either immediately or under manual
//! control so the event-poll path is exercisable. It also checks the
//! protocol a real device runtime would enforce implicitly: the current
//! device must match the device the call targets, and grouped launches must
//! be bracketed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, ensure, Result};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::plan::{DataType, OpType, ReduceMethod};

use super::{CommDevice, CommUniqueId, EventStatus, COMM_UNIQUE_ID_BYTES};

/// One recorded primitive launch.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectiveCall {
    pub op_type: OpType,
    pub device_id: i64,
    pub rank: i64,
    pub num_ranks: i64,
    pub count: i64,
    pub data_type: DataType,
    pub root: Option<i64>,
    /// Serial of the stream the launch was issued on.
    pub stream_serial: u64,
    /// Index of the enclosing `group_start`/`group_end` bracket.
    pub group_serial: u64,
}

#[derive(Debug)]
pub struct HostStream {
    pub device_id: i64,
    pub priority: i32,
    serial: u64,
}

impl HostStream {
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

#[derive(Debug)]
pub struct HostEvent {
    ready: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct HostComm {
    pub device_id: i64,
    pub rank: i64,
    pub num_ranks: i64,
    pub unique_id: CommUniqueId,
}

#[derive(Debug, Default)]
struct HostState {
    current_device: i64,
    group_depth: i64,
    groups_opened: u64,
    next_stream_serial: u64,
    calls: Vec<CollectiveCall>,
    recorded_events: Vec<Arc<AtomicBool>>,
}

/// See the module docs.
pub struct HostDevice {
    state: Mutex<HostState>,
    manual_events: bool,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDevice {
    /// Events become ready the moment they are recorded.
    pub fn new() -> Self {
        Self { state: Mutex::new(HostState::default()), manual_events: false }
    }

    /// Recorded events stay pending until [`Self::complete_recorded_events`].
    pub fn with_manual_events() -> Self {
        Self { state: Mutex::new(HostState::default()), manual_events: true }
    }

    /// Marks every recorded event ready.
    pub fn complete_recorded_events(&self) {
        let mut state = self.state.lock();
        for event in state.recorded_events.drain(..) {
            event.store(true, Ordering::Release);
        }
    }

    /// Every primitive launch recorded so far, in issue order.
    pub fn calls(&self) -> Vec<CollectiveCall> {
        self.state.lock().calls.clone()
    }

    fn check_current(&self, state: &HostState, device_id: i64) -> Result<()> {
        ensure!(
            state.current_device == device_id,
            "call targets device {device_id} but current device is {}",
            state.current_device
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn record_call(
        &self,
        op_type: OpType,
        comm: &HostComm,
        stream: &HostStream,
        count: i64,
        data_type: DataType,
        root: Option<i64>,
    ) -> Result<()> {
        ensure!(count > 0, "{op_type:?} launched with non-positive count {count}");
        let mut state = self.state.lock();
        self.check_current(&state, comm.device_id)?;
        ensure!(state.group_depth > 0, "{op_type:?} launched outside a group bracket");
        ensure!(
            stream.device_id == comm.device_id,
            "stream of device {} paired with communicator of device {}",
            stream.device_id,
            comm.device_id
        );
        let group_serial = state.groups_opened;
        state.calls.push(CollectiveCall {
            op_type,
            device_id: comm.device_id,
            rank: comm.rank,
            num_ranks: comm.num_ranks,
            count,
            data_type,
            root,
            stream_serial: stream.serial,
            group_serial,
        });
        Ok(())
    }
}

impl CommDevice for HostDevice {
    type Stream = HostStream;
    type Event = HostEvent;
    type Comm = HostComm;

    fn current_device(&self) -> Result<i64> {
        Ok(self.state.lock().current_device)
    }

    fn set_device(&self, device_id: i64) -> Result<()> {
        ensure!(device_id >= 0, "negative device id {device_id}");
        self.state.lock().current_device = device_id;
        Ok(())
    }

    fn stream_priority_range(&self) -> Result<(i32, i32)> {
        // Smaller numbers are higher priority, as on CUDA.
        Ok((0, -1))
    }

    fn create_stream(&self, device_id: i64, priority: i32) -> Result<Self::Stream> {
        let mut state = self.state.lock();
        self.check_current(&state, device_id)?;
        let serial = state.next_stream_serial;
        state.next_stream_serial += 1;
        Ok(HostStream { device_id, priority, serial })
    }

    fn synchronize_stream(&self, device_id: i64, stream: &Self::Stream) -> Result<()> {
        ensure!(stream.device_id == device_id, "synchronizing a foreign stream");
        Ok(())
    }

    fn create_event(&self, device_id: i64) -> Result<Self::Event> {
        let state = self.state.lock();
        self.check_current(&state, device_id)?;
        Ok(HostEvent { ready: Arc::new(AtomicBool::new(false)) })
    }

    fn record_event(
        &self,
        device_id: i64,
        event: &Self::Event,
        stream: &Self::Stream,
    ) -> Result<()> {
        ensure!(stream.device_id == device_id, "recording on a foreign stream");
        if self.manual_events {
            self.state.lock().recorded_events.push(event.ready.clone());
        } else {
            event.ready.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn query_event(&self, _device_id: i64, event: &Self::Event) -> Result<EventStatus> {
        Ok(if event.ready.load(Ordering::Acquire) {
            EventStatus::Ready
        } else {
            EventStatus::NotReady
        })
    }

    fn generate_unique_id(&self) -> Result<CommUniqueId> {
        let mut bytes = [0u8; COMM_UNIQUE_ID_BYTES];
        for chunk in bytes.chunks_mut(16) {
            chunk.copy_from_slice(Uuid::new_v4().as_bytes());
        }
        Ok(CommUniqueId::from_bytes(bytes))
    }

    fn comm_init_rank(
        &self,
        device_id: i64,
        num_ranks: i64,
        unique_id: &CommUniqueId,
        rank: i64,
    ) -> Result<Self::Comm> {
        if !(0..num_ranks).contains(&rank) {
            bail!("rank {rank} outside 0..{num_ranks}");
        }
        let state = self.state.lock();
        self.check_current(&state, device_id)?;
        Ok(HostComm { device_id, rank, num_ranks, unique_id: *unique_id })
    }

    fn group_start(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.group_depth += 1;
        state.groups_opened += 1;
        Ok(())
    }

    fn group_end(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.group_depth -= 1;
        ensure!(state.group_depth >= 0, "group_end without matching group_start");
        Ok(())
    }

    fn all_reduce(
        &self,
        comm: &Self::Comm,
        stream: &Self::Stream,
        _send_buff: usize,
        _recv_buff: usize,
        elem_cnt: i64,
        data_type: DataType,
        _reduce_method: ReduceMethod,
    ) -> Result<()> {
        self.record_call(OpType::AllReduce, comm, stream, elem_cnt, data_type, None)
    }

    fn all_gather(
        &self,
        comm: &Self::Comm,
        stream: &Self::Stream,
        _send_buff: usize,
        _recv_buff: usize,
        elem_cnt_per_rank: i64,
        data_type: DataType,
    ) -> Result<()> {
        self.record_call(OpType::AllGather, comm, stream, elem_cnt_per_rank, data_type, None)
    }

    fn reduce_scatter(
        &self,
        comm: &Self::Comm,
        stream: &Self::Stream,
        _send_buff: usize,
        _recv_buff: usize,
        elem_cnt_per_rank: i64,
        data_type: DataType,
        _reduce_method: ReduceMethod,
    ) -> Result<()> {
        self.record_call(OpType::ReduceScatter, comm, stream, elem_cnt_per_rank, data_type, None)
    }

    fn reduce(
        &self,
        comm: &Self::Comm,
        stream: &Self::Stream,
        _send_buff: usize,
        _recv_buff: usize,
        elem_cnt: i64,
        data_type: DataType,
        _reduce_method: ReduceMethod,
        root: i64,
    ) -> Result<()> {
        self.record_call(OpType::Reduce, comm, stream, elem_cnt, data_type, Some(root))
    }

    fn broadcast(
        &self,
        comm: &Self::Comm,
        stream: &Self::Stream,
        _send_buff: usize,
        _recv_buff: usize,
        elem_cnt: i64,
        data_type: DataType,
        root: i64,
    ) -> Result<()> {
        self.record_call(OpType::Broadcast, comm, stream, elem_cnt, data_type, Some(root))
    }
}
