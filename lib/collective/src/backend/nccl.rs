// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The NCCL-style backend.
//!
//! Communicator construction is a cross-machine rendezvous: for every
//! `(device_set, stream_id)` pair, the machine owning rank 0 generates the
//! unique id and publishes it over the control plane when the set spans
//! machines; every other machine blocks pulling it. Group launches batch
//! all per-rank primitives of a fused group under one bracket on a
//! round-robin-selected stream, then record one completion event per device
//! which a dedicated poll thread turns into callback invocations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::config::CollectiveConfig;
use crate::control::ControlPlane;
use crate::device::{CommDevice, CommUniqueId, DeviceGuard, EventStatus};
use crate::plan::{BackendKind, CollectivePlan, DeviceSet, OpType, ReduceMethod, RequestDesc};

use super::{ExecutorBackend, RequestCallback, RuntimeRequestInfo};

/// Key under which rank 0 publishes a communicator unique id.
pub fn nccl_unique_id_rpc_key(op_name: &str, stream_id: i64) -> String {
    format!("CollectiveBoxingExecutorNcclUniqueIdRpcKey-{op_name}-{stream_id}")
}

/// The reduction the device layer is asked to apply. Only sum-reduction is
/// wired through today.
fn comm_reduce_method(reduce_method: ReduceMethod) -> ReduceMethod {
    match reduce_method {
        ReduceMethod::Sum => ReduceMethod::Sum,
        ReduceMethod::Prod => unimplemented!("non-sum reduction is not supported by this backend"),
    }
}

struct PollEntry<E> {
    device_id: i64,
    event: E,
    callbacks: Vec<RequestCallback>,
}

/// How long the poll thread parks when a sweep completes nothing.
const POLL_IDLE_PARK: Duration = Duration::from_micros(50);

pub struct NcclBackend<D: CommDevice> {
    device: Arc<D>,
    ctrl: Arc<dyn ControlPlane>,
    machine_id: i64,
    num_streams: i64,
    fusion_threshold: i64,
    /// `device_set → device_id → comm per stream_id`.
    comms: HashMap<DeviceSet, BTreeMap<i64, Vec<D::Comm>>>,
    /// `device_id → stream per stream_id`.
    streams: BTreeMap<i64, Vec<D::Stream>>,
    event_list: Arc<Mutex<Vec<PollEntry<D::Event>>>>,
    shutdown: Arc<AtomicBool>,
    poll_thread: Option<JoinHandle<()>>,
    current_stream_id: i64,
}

impl<D: CommDevice> NcclBackend<D> {
    pub fn new(config: &CollectiveConfig, device: Arc<D>, ctrl: Arc<dyn ControlPlane>) -> Self {
        assert!(config.nccl_num_streams > 0, "nccl_num_streams must be positive");
        assert!(config.nccl_fusion_threshold_mb >= 0, "nccl_fusion_threshold_mb must be non-negative");

        let event_list: Arc<Mutex<Vec<PollEntry<D::Event>>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let poll_thread = {
            let device = device.clone();
            let event_list = event_list.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || Self::poll_events(device, event_list, shutdown))
        };

        Self {
            device,
            ctrl,
            machine_id: config.machine_id,
            num_streams: config.nccl_num_streams,
            fusion_threshold: config.fusion_threshold_bytes(),
            comms: HashMap::new(),
            streams: BTreeMap::new(),
            event_list,
            shutdown,
            poll_thread: Some(poll_thread),
            current_stream_id: 0,
        }
    }

    /// Communicators held for `device_id` within `device_set` — one per
    /// stream after init.
    pub fn num_comms(&self, device_set: &DeviceSet, device_id: i64) -> usize {
        self.comms
            .get(device_set)
            .and_then(|device_id2comms| device_id2comms.get(&device_id))
            .map_or(0, Vec::len)
    }

    /// The poll loop: sweep a snapshot of the event list under the lock,
    /// pull completed entries out, then fire their callbacks after the
    /// sweep, outside the lock. Exits once shutdown is raised and the list
    /// has drained; producers never enqueue after shutdown because teardown
    /// joins this thread before touching streams.
    fn poll_events(
        device: Arc<D>,
        event_list: Arc<Mutex<Vec<PollEntry<D::Event>>>>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            let mut completed = Vec::new();
            {
                let mut entries = event_list.lock();
                if entries.is_empty() && shutdown.load(Ordering::Acquire) {
                    break;
                }
                let mut index = 0;
                while index < entries.len() {
                    let entry = &entries[index];
                    device
                        .set_device(entry.device_id)
                        .unwrap_or_else(|error| panic!("set_device failed in poll loop: {error:#}"));
                    match device.query_event(entry.device_id, &entry.event) {
                        Ok(EventStatus::NotReady) => index += 1,
                        Ok(EventStatus::Ready) => completed.push(entries.remove(index)),
                        Err(error) => panic!("event query failed: {error:#}"),
                    }
                }
            }
            if completed.is_empty() {
                std::thread::park_timeout(POLL_IDLE_PARK);
                continue;
            }
            for entry in completed {
                // Dropping the entry destroys the event. Any device error
                // is fatal before this point, so completion is always Ok.
                for callback in entry.callbacks {
                    callback(Ok(()));
                }
            }
        }
    }
}

impl<D: CommDevice> ExecutorBackend for NcclBackend<D> {
    fn init(&mut self, plan: &CollectivePlan) -> Result<()> {
        let _guard = DeviceGuard::new(self.device.as_ref())?;
        let mut local_device_ids = BTreeSet::new();
        for request_set in plan.job_id2request_set.values() {
            let mut requests: Vec<&RequestDesc> = request_set
                .requests
                .iter()
                .filter(|request| request.op_desc.backend == BackendKind::Nccl)
                .collect();
            requests.sort_by_key(|request| request.order);
            for request in requests {
                let device_set = &request.device_set;
                let local_ranks = device_set.local_ranks(self.machine_id);
                for &rank in &local_ranks {
                    local_device_ids.insert(device_set.device(rank).device_id);
                }
                if local_ranks.is_empty() || self.comms.contains_key(device_set) {
                    continue;
                }
                let spans_machines = (local_ranks.len() as i64) != device_set.len();
                let mut device_id2comms: BTreeMap<i64, Vec<D::Comm>> = local_ranks
                    .iter()
                    .map(|&rank| (device_set.device(rank).device_id, Vec::new()))
                    .collect();
                for stream_id in 0..self.num_streams {
                    let rpc_key = nccl_unique_id_rpc_key(&request.op_desc.name, stream_id);
                    let unique_id = if local_ranks.contains(&0) {
                        let unique_id = self.device.generate_unique_id()?;
                        if spans_machines {
                            tracing::debug!(key = %rpc_key, "publishing communicator unique id");
                            self.ctrl.push_kv(&rpc_key, unique_id.to_hex_string());
                        }
                        unique_id
                    } else {
                        tracing::debug!(key = %rpc_key, "pulling communicator unique id");
                        CommUniqueId::from_hex_string(&self.ctrl.pull_kv(&rpc_key))
                            .with_context(|| format!("malformed unique id under {rpc_key}"))?
                    };
                    self.device.group_start()?;
                    for &rank in &local_ranks {
                        let device_id = device_set.device(rank).device_id;
                        self.device.set_device(device_id)?;
                        let comm = self.device.comm_init_rank(
                            device_id,
                            device_set.len(),
                            &unique_id,
                            rank,
                        )?;
                        device_id2comms
                            .get_mut(&device_id)
                            .expect("every local rank's device was seeded")
                            .push(comm);
                    }
                    self.device.group_end()?;
                }
                self.comms.insert(device_set.clone(), device_id2comms);
            }
        }

        let (_, greatest_priority) = self.device.stream_priority_range()?;
        for device_id in local_device_ids {
            self.device.set_device(device_id)?;
            let streams = (0..self.num_streams)
                .map(|_| self.device.create_stream(device_id, greatest_priority))
                .collect::<Result<Vec<_>>>()?;
            self.streams.insert(device_id, streams);
        }
        Ok(())
    }

    /// Byte-size fusion: a group closes when the candidate's device set
    /// differs from the group head's or the cumulative size would cross the
    /// threshold.
    fn group_requests(&self, requests: &[Arc<RequestDesc>]) -> Vec<Vec<Arc<RequestDesc>>> {
        let mut groups = Vec::new();
        let mut group: Vec<Arc<RequestDesc>> = Vec::new();
        let mut group_size = 0i64;
        for request in requests {
            let size = request.op_desc.size_in_bytes();
            if !group.is_empty()
                && (request.device_set != group[0].device_set
                    || group_size + size > self.fusion_threshold)
            {
                groups.push(std::mem::take(&mut group));
                group_size = 0;
            }
            group.push(request.clone());
            group_size += size;
        }
        if !group.is_empty() {
            groups.push(group);
        }
        groups
    }

    fn execute_group(
        &mut self,
        group: &[Arc<RequestDesc>],
        ranks: Vec<BTreeMap<i64, RuntimeRequestInfo>>,
    ) {
        assert_eq!(group.len(), ranks.len(), "one rank map per request in the group");
        if group.is_empty() {
            return;
        }

        let stream_id = self.current_stream_id;
        self.current_stream_id = (self.current_stream_id + 1) % self.num_streams;
        let _guard = DeviceGuard::new(self.device.as_ref())
            .unwrap_or_else(|error| panic!("device guard failed: {error:#}"));
        let device_id2comms = self
            .comms
            .get(&group[0].device_set)
            .unwrap_or_else(|| panic!("no communicators for {:?}", group[0].device_set));

        let mut device_id2callbacks: BTreeMap<i64, Vec<RequestCallback>> = BTreeMap::new();
        self.device.group_start().expect("group_start failed");
        for (request, rank2info) in group.iter().zip(ranks) {
            let op = &request.op_desc;
            let elem_cnt = op.elem_cnt();
            let num_ranks = op.num_ranks;
            for (rank, info) in rank2info {
                let device_id = request.device_set.device(rank).device_id;
                self.device.set_device(device_id).expect("set_device failed");
                let comm = &device_id2comms[&device_id][stream_id as usize];
                let stream = &self.streams[&device_id][stream_id as usize];
                let launched = match op.op_type {
                    OpType::AllReduce => self.device.all_reduce(
                        comm,
                        stream,
                        info.send_buff,
                        info.recv_buff,
                        elem_cnt,
                        op.data_type,
                        comm_reduce_method(op.reduce_method),
                    ),
                    OpType::AllGather => {
                        assert_eq!(
                            elem_cnt % num_ranks,
                            0,
                            "all-gather of {:?}: {elem_cnt} elements not divisible by {num_ranks} ranks",
                            op.name
                        );
                        self.device.all_gather(
                            comm,
                            stream,
                            info.send_buff,
                            info.recv_buff,
                            elem_cnt / num_ranks,
                            op.data_type,
                        )
                    }
                    OpType::ReduceScatter => {
                        assert_eq!(
                            elem_cnt % num_ranks,
                            0,
                            "reduce-scatter of {:?}: {elem_cnt} elements not divisible by {num_ranks} ranks",
                            op.name
                        );
                        self.device.reduce_scatter(
                            comm,
                            stream,
                            info.send_buff,
                            info.recv_buff,
                            elem_cnt / num_ranks,
                            op.data_type,
                            comm_reduce_method(op.reduce_method),
                        )
                    }
                    OpType::Reduce => self.device.reduce(
                        comm,
                        stream,
                        info.send_buff,
                        info.recv_buff,
                        elem_cnt,
                        op.data_type,
                        comm_reduce_method(op.reduce_method),
                        op.root,
                    ),
                    OpType::Broadcast => self.device.broadcast(
                        comm,
                        stream,
                        info.send_buff,
                        info.recv_buff,
                        elem_cnt,
                        op.data_type,
                        op.root,
                    ),
                };
                launched.unwrap_or_else(|error| {
                    panic!("collective launch failed for {:?} rank {rank}: {error:#}", op.name)
                });
                device_id2callbacks.entry(device_id).or_default().push(info.callback);
            }
        }
        self.device.group_end().expect("group_end failed");

        for (device_id, callbacks) in device_id2callbacks {
            self.device.set_device(device_id).expect("set_device failed");
            let event = self.device.create_event(device_id).expect("event creation failed");
            let stream = &self.streams[&device_id][stream_id as usize];
            self.device.record_event(device_id, &event, stream).expect("event record failed");
            self.event_list.lock().push(PollEntry { device_id, event, callbacks });
        }
        tracing::debug!(
            requests = group.len(),
            stream_id,
            "launched collective group"
        );
    }
}

impl<D: CommDevice> Drop for NcclBackend<D> {
    /// Teardown order matters: stop the poll thread, then synchronize and
    /// drop every stream, then drop the communicators.
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.poll_thread.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                tracing::error!("event poll thread panicked during shutdown");
            }
        }
        for (&device_id, streams) in &self.streams {
            if let Err(error) = self.device.set_device(device_id) {
                tracing::warn!(%error, device_id, "set_device failed during teardown");
                continue;
            }
            for stream in streams {
                if let Err(error) = self.device.synchronize_stream(device_id, stream) {
                    tracing::warn!(%error, device_id, "stream synchronize failed during teardown");
                }
            }
        }
        self.streams.clear();
        self.comms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::host::HostDevice;
    use crate::plan::{DataType, DeviceDesc, OpDesc};

    fn config(threshold_mb: i64) -> CollectiveConfig {
        CollectiveConfig {
            nccl_fusion_threshold_mb: threshold_mb,
            ..CollectiveConfig::default()
        }
    }

    fn backend(threshold_mb: i64) -> NcclBackend<HostDevice> {
        NcclBackend::new(
            &config(threshold_mb),
            Arc::new(HostDevice::new()),
            Arc::new(crate::control::InMemoryControlPlane::new()),
        )
    }

    /// An all-reduce request of `mib` mebibytes on `device_set`.
    fn request_of_mib(name: &str, mib: i64, device_set: &DeviceSet) -> Arc<RequestDesc> {
        Arc::new(RequestDesc {
            op_desc: OpDesc {
                name: name.to_string(),
                op_type: OpType::AllReduce,
                shape: vec![mib * 1024 * 1024 / 4],
                data_type: DataType::Float32,
                reduce_method: ReduceMethod::Sum,
                root: 0,
                num_ranks: device_set.len(),
                backend: BackendKind::Nccl,
            },
            device_set: device_set.clone(),
            order: 0,
            depth: 0,
        })
    }

    fn two_device_set() -> DeviceSet {
        DeviceSet::new(vec![
            DeviceDesc { machine_id: 0, device_id: 0 },
            DeviceDesc { machine_id: 0, device_id: 1 },
        ])
    }

    #[test]
    fn rpc_keys_use_the_fixed_literal_format() {
        assert_eq!(
            nccl_unique_id_rpc_key("sum-1", 3),
            "CollectiveBoxingExecutorNcclUniqueIdRpcKey-sum-1-3"
        );
    }

    #[test]
    fn fusion_splits_when_the_threshold_would_be_crossed() {
        let backend = backend(96);
        let set = two_device_set();
        let requests = vec![request_of_mib("a", 48, &set), request_of_mib("b", 80, &set)];
        let groups = backend.group_requests(&requests);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 1);
        assert_eq!(groups[1].len(), 1);
    }

    #[test]
    fn fusion_merges_under_the_threshold() {
        let backend = backend(200);
        let set = two_device_set();
        let requests = vec![request_of_mib("a", 48, &set), request_of_mib("b", 80, &set)];
        let groups = backend.group_requests(&requests);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn differing_device_sets_always_split() {
        let backend = backend(200);
        let set_a = two_device_set();
        let set_b = DeviceSet::new(vec![DeviceDesc { machine_id: 0, device_id: 0 }]);
        let requests = vec![request_of_mib("a", 1, &set_a), request_of_mib("b", 1, &set_b)];
        let groups = backend.group_requests(&requests);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn zero_threshold_isolates_every_request() {
        let backend = backend(0);
        let set = two_device_set();
        let requests = vec![request_of_mib("a", 1, &set), request_of_mib("b", 1, &set)];
        let groups = backend.group_requests(&requests);
        assert_eq!(groups.len(), 2);
    }
}
