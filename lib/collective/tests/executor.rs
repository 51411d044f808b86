// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Executor behavior across the enqueue gate and a live NCCL-style backend
//! driven by the host loopback device.

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use cascade_collective::backend::nccl::NcclBackend;
use cascade_collective::control::InMemoryControlPlane;
use cascade_collective::device::host::HostDevice;
use cascade_collective::plan::{
    BackendKind, CollectivePlan, DataType, DeviceDesc, DeviceSet, OpDesc, OpType, RankDesc,
    ReduceMethod, RequestDesc, RequestSet,
};
use cascade_collective::{
    CollectiveConfig, CollectiveExecutor, ExecutorBackend, RuntimeRequestInfo,
};

fn init_logging() {
    cascade_runtime::logging::init();
}

fn request(name: &str, order: i64, depth: i64, device_set: &DeviceSet) -> RequestDesc {
    RequestDesc {
        op_desc: OpDesc {
            name: name.to_string(),
            op_type: OpType::AllReduce,
            shape: vec![1024],
            data_type: DataType::Float32,
            reduce_method: ReduceMethod::Sum,
            root: 0,
            num_ranks: device_set.len(),
            backend: BackendKind::Nccl,
        },
        device_set: device_set.clone(),
        order,
        depth,
    }
}

fn local_pair() -> DeviceSet {
    DeviceSet::new(vec![
        DeviceDesc { machine_id: 0, device_id: 0 },
        DeviceDesc { machine_id: 0, device_id: 1 },
    ])
}

fn plan_of_jobs(jobs: Vec<(i64, Vec<RequestDesc>)>) -> CollectivePlan {
    let mut plan = CollectivePlan::default();
    for (job_id, requests) in jobs {
        plan.job_id2request_set.insert(job_id, RequestSet { requests });
    }
    plan
}

fn info(callback: impl FnOnce(anyhow::Result<()>) + Send + 'static) -> RuntimeRequestInfo {
    RuntimeRequestInfo { send_buff: 0x1000, recv_buff: 0x2000, callback: Box::new(callback) }
}

fn rank_desc(plan: &CollectivePlan, name: &str, rank: i64) -> RankDesc {
    let op_desc = plan
        .job_id2request_set
        .values()
        .flat_map(|set| &set.requests)
        .find(|request| request.op_desc.name == name)
        .expect("request exists")
        .op_desc
        .clone();
    RankDesc { op_desc, rank }
}

/// Backend that records executed groups and completes every rank inline.
struct RecordingBackend {
    executed: Arc<Mutex<Vec<Vec<String>>>>,
}

impl ExecutorBackend for RecordingBackend {
    fn init(&mut self, _plan: &CollectivePlan) -> anyhow::Result<()> {
        Ok(())
    }

    fn execute_group(
        &mut self,
        group: &[Arc<RequestDesc>],
        ranks: Vec<BTreeMap<i64, RuntimeRequestInfo>>,
    ) {
        self.executed
            .lock()
            .push(group.iter().map(|request| request.op_desc.name.clone()).collect());
        for rank2info in ranks {
            for (_, info) in rank2info {
                (info.callback)(Ok(()));
            }
        }
    }
}

fn recording_backends(
    executed: &Arc<Mutex<Vec<Vec<String>>>>,
) -> HashMap<BackendKind, Box<dyn ExecutorBackend>> {
    let mut backends: HashMap<BackendKind, Box<dyn ExecutorBackend>> = HashMap::new();
    backends.insert(BackendKind::Nccl, Box::new(RecordingBackend { executed: executed.clone() }));
    backends
}

#[test]
fn groups_launch_in_plan_order_even_when_later_groups_fill_first() {
    init_logging();
    let set = local_pair();
    // Different depths keep the requests in separate groups.
    let plan = plan_of_jobs(vec![(0, vec![request("a", 0, 0, &set), request("b", 1, 1, &set)])]);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let config = CollectiveConfig::default();
    let executor =
        CollectiveExecutor::new(plan.clone(), config, recording_backends(&executed)).unwrap();

    // Fill the *second* group completely first: nothing may launch.
    executor.enqueue(rank_desc(&plan, "b", 0), info(|_| {}));
    executor.enqueue(rank_desc(&plan, "b", 1), info(|_| {}));
    assert!(executed.lock().is_empty());

    // One rank of the first group: still gated.
    executor.enqueue(rank_desc(&plan, "a", 0), info(|_| {}));
    assert!(executed.lock().is_empty());

    // Final rank: both groups launch, in plan order.
    executor.enqueue(rank_desc(&plan, "a", 1), info(|_| {}));
    assert_eq!(*executed.lock(), vec![vec!["a".to_string()], vec!["b".to_string()]]);
}

#[test]
fn a_group_waits_for_every_local_rank() {
    init_logging();
    let set = local_pair();
    let plan = plan_of_jobs(vec![(0, vec![request("a", 0, 0, &set)])]);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let config = CollectiveConfig::default();
    let executor =
        CollectiveExecutor::new(plan.clone(), config, recording_backends(&executed)).unwrap();

    executor.enqueue(rank_desc(&plan, "a", 0), info(|_| {}));
    assert!(executed.lock().is_empty());
    executor.enqueue(rank_desc(&plan, "a", 1), info(|_| {}));
    assert_eq!(executed.lock().len(), 1);
}

#[test]
fn a_finished_job_unlatches_the_executor() {
    init_logging();
    let single = DeviceSet::new(vec![DeviceDesc { machine_id: 0, device_id: 0 }]);
    let plan = plan_of_jobs(vec![
        (0, vec![request("a", 0, 0, &single)]),
        (1, vec![request("c", 0, 0, &single)]),
    ]);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let config = CollectiveConfig::default();
    let executor =
        CollectiveExecutor::new(plan.clone(), config, recording_backends(&executed)).unwrap();

    executor.enqueue(rank_desc(&plan, "a", 0), info(|_| {}));
    executor.enqueue(rank_desc(&plan, "c", 0), info(|_| {}));
    assert_eq!(*executed.lock(), vec![vec!["a".to_string()], vec!["c".to_string()]]);
}

#[test]
#[should_panic(expected = "in flight")]
fn cross_job_enqueues_are_fatal_while_a_job_is_open() {
    let set = local_pair();
    let plan = plan_of_jobs(vec![
        (0, vec![request("a", 0, 0, &set)]),
        (1, vec![request("c", 0, 0, &set)]),
    ]);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let config = CollectiveConfig::default();
    let executor =
        CollectiveExecutor::new(plan.clone(), config, recording_backends(&executed)).unwrap();

    // Latches job 0 without completing it, then crosses jobs.
    executor.enqueue(rank_desc(&plan, "a", 0), info(|_| {}));
    executor.enqueue(rank_desc(&plan, "c", 0), info(|_| {}));
}

#[test]
#[should_panic(expected = "enqueued twice")]
fn duplicate_rank_enqueues_are_fatal() {
    let set = local_pair();
    let plan = plan_of_jobs(vec![(0, vec![request("a", 0, 0, &set), request("b", 1, 1, &set)])]);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let config = CollectiveConfig::default();
    let executor =
        CollectiveExecutor::new(plan.clone(), config, recording_backends(&executed)).unwrap();

    executor.enqueue(rank_desc(&plan, "a", 0), info(|_| {}));
    executor.enqueue(rank_desc(&plan, "a", 0), info(|_| {}));
}

fn nccl_backends(
    config: &CollectiveConfig,
    device: &Arc<HostDevice>,
) -> HashMap<BackendKind, Box<dyn ExecutorBackend>> {
    let mut backends: HashMap<BackendKind, Box<dyn ExecutorBackend>> = HashMap::new();
    backends.insert(
        BackendKind::Nccl,
        Box::new(NcclBackend::new(config, device.clone(), Arc::new(InMemoryControlPlane::new()))),
    );
    backends
}

#[test]
fn fused_groups_launch_together_and_complete_through_the_poll_thread() {
    init_logging();
    let set = local_pair();
    // Same depth and device set, sizes below the fusion threshold: one group.
    let plan = plan_of_jobs(vec![(0, vec![request("a", 0, 0, &set), request("b", 1, 0, &set)])]);
    let device = Arc::new(HostDevice::new());
    let config = CollectiveConfig::default();
    let executor =
        CollectiveExecutor::new(plan.clone(), config.clone(), nccl_backends(&config, &device))
            .unwrap();
    assert_eq!(executor.group_count(), 1);

    let (tx, rx) = mpsc::channel();
    for name in ["a", "b"] {
        for rank in 0..2 {
            let tx = tx.clone();
            executor.enqueue(
                rank_desc(&plan, name, rank),
                info(move |status| tx.send(status.is_ok()).unwrap()),
            );
        }
    }
    for _ in 0..4 {
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "callback saw an error");
    }

    // Two requests times two ranks, all inside one launch bracket.
    let calls = device.calls();
    assert_eq!(calls.len(), 4);
    assert!(calls.iter().all(|call| call.group_serial == calls[0].group_serial));
    assert!(calls.iter().all(|call| call.op_type == OpType::AllReduce));
    assert!(calls.iter().all(|call| call.count == 1024));
}

#[test]
fn consecutive_groups_round_robin_across_streams() {
    init_logging();
    let set = local_pair();
    let plan = plan_of_jobs(vec![(0, vec![request("a", 0, 0, &set), request("b", 1, 1, &set)])]);
    let device = Arc::new(HostDevice::new());
    let config = CollectiveConfig { nccl_num_streams: 2, ..CollectiveConfig::default() };
    let executor =
        CollectiveExecutor::new(plan.clone(), config.clone(), nccl_backends(&config, &device))
            .unwrap();
    assert_eq!(executor.group_count(), 2);

    for name in ["a", "b"] {
        for rank in 0..2 {
            executor.enqueue(rank_desc(&plan, name, rank), info(|_| {}));
        }
    }

    let calls = device.calls();
    assert_eq!(calls.len(), 4);
    let device0_serials: Vec<u64> = calls
        .iter()
        .filter(|call| call.device_id == 0)
        .map(|call| call.stream_serial)
        .collect();
    assert_eq!(device0_serials.len(), 2);
    assert_ne!(device0_serials[0], device0_serials[1], "groups must alternate streams");
}

#[test]
fn manual_events_gate_completion_until_the_device_fires_them() {
    init_logging();
    let set = local_pair();
    let plan = plan_of_jobs(vec![(0, vec![request("a", 0, 0, &set)])]);
    let device = Arc::new(HostDevice::with_manual_events());
    let config = CollectiveConfig::default();
    let executor =
        CollectiveExecutor::new(plan.clone(), config.clone(), nccl_backends(&config, &device))
            .unwrap();

    let (tx, rx) = mpsc::channel();
    for rank in 0..2 {
        let tx = tx.clone();
        executor.enqueue(
            rank_desc(&plan, "a", rank),
            info(move |status| tx.send(status.is_ok()).unwrap()),
        );
    }

    // The group launched, but its events have not completed.
    std::thread::sleep(Duration::from_millis(100));
    assert!(rx.try_recv().is_err(), "callback fired before the device event completed");

    device.complete_recorded_events();
    for _ in 0..2 {
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
}

#[test]
fn debug_mode_dumps_the_group_summary() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let set = local_pair();
    let plan = plan_of_jobs(vec![(0, vec![request("a", 0, 0, &set), request("b", 1, 0, &set)])]);
    let device = Arc::new(HostDevice::new());
    let config = CollectiveConfig {
        enable_debug_mode: true,
        debug_dump_root: dir.path().to_path_buf(),
        ..CollectiveConfig::default()
    };
    let _executor =
        CollectiveExecutor::new(plan, config.clone(), nccl_backends(&config, &device)).unwrap();

    let dump_path = CollectiveExecutor::group_dump_path(dir.path());
    let dump = std::fs::read_to_string(dump_path).unwrap();
    assert!(dump.contains("group id: 0"));
    assert!(dump.contains("\"a\""));
    assert!(dump.contains("\"b\""));
}
