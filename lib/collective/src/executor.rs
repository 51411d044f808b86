// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The collective executor: plan intake, request grouping, and the
//! mutex-serialized enqueue gate that launches fused groups in plan order.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::backend::{ExecutorBackend, RuntimeRequestInfo};
use crate::config::CollectiveConfig;
use crate::plan::{BackendKind, CollectivePlan, RankDesc, RequestDesc};

/// Relative path of the group summary dump under the debug dump root.
const GROUP_DUMP_PATH: &str = "boxing/collective/group";

/// Per-request runtime state: which local ranks have arrived.
struct RequestState {
    request: Arc<RequestDesc>,
    job_id: i64,
    group_id: i64,
    local_ranks: BTreeSet<i64>,
    ready_ranks: BTreeMap<i64, RuntimeRequestInfo>,
}

impl RequestState {
    fn add_ready_rank(&mut self, rank_desc: &RankDesc, request_info: RuntimeRequestInfo) {
        assert!(
            self.local_ranks.contains(&rank_desc.rank),
            "rank {} of {:?} is not local to this machine",
            rank_desc.rank,
            rank_desc.op_desc.name
        );
        assert_eq!(
            rank_desc.op_desc, self.request.op_desc,
            "enqueued op descriptor disagrees with the plan for {:?}",
            rank_desc.op_desc.name
        );
        assert!(
            self.ready_ranks.len() < self.local_ranks.len(),
            "all local ranks of {:?} already arrived",
            rank_desc.op_desc.name
        );
        let previous = self.ready_ranks.insert(rank_desc.rank, request_info);
        assert!(
            previous.is_none(),
            "rank {} of {:?} enqueued twice",
            rank_desc.rank,
            rank_desc.op_desc.name
        );
    }

    fn is_ready(&self) -> bool {
        self.ready_ranks.len() == self.local_ranks.len()
    }
}

/// Per-group runtime state: which member requests are fully ready.
struct GroupState {
    backend: BackendKind,
    request_ids: BTreeSet<i64>,
    requests: Vec<Arc<RequestDesc>>,
    ready_request_ids: BTreeSet<i64>,
}

impl GroupState {
    fn add_ready_request(&mut self, request_id: i64) {
        assert!(self.request_ids.contains(&request_id), "request {request_id} is not in this group");
        let inserted = self.ready_request_ids.insert(request_id);
        assert!(inserted, "request {request_id} reported ready twice");
    }

    fn is_ready(&self) -> bool {
        self.ready_request_ids.len() == self.request_ids.len()
    }
}

struct ExecutorState {
    backends: HashMap<BackendKind, Box<dyn ExecutorBackend>>,
    name2request_id: HashMap<String, i64>,
    request_states: Vec<RequestState>,
    group_states: Vec<GroupState>,
    job_id2group_ids: HashMap<i64, Vec<i64>>,
    /// Job currently in flight, or -1 when idle.
    current_job_id: i64,
    current_group_idx_in_job: i64,
}

impl ExecutorState {
    fn enqueue(&mut self, rank_desc: RankDesc, request_info: RuntimeRequestInfo) {
        let request_id = *self
            .name2request_id
            .get(&rank_desc.op_desc.name)
            .unwrap_or_else(|| panic!("unknown request {:?}", rank_desc.op_desc.name));
        let job_id = self.request_states[request_id as usize].job_id;
        if self.current_job_id == -1 {
            self.current_job_id = job_id;
            self.current_group_idx_in_job = 0;
        } else {
            assert_eq!(
                self.current_job_id, job_id,
                "request {:?} of job {job_id} enqueued while job {} is in flight",
                rank_desc.op_desc.name, self.current_job_id
            );
        }

        let ready_group_id = {
            let request_state = &mut self.request_states[request_id as usize];
            request_state.add_ready_rank(&rank_desc, request_info);
            request_state.is_ready().then_some(request_state.group_id)
        };
        if let Some(group_id) = ready_group_id {
            self.group_states[group_id as usize].add_ready_request(request_id);
        }

        // In-order dispatch gate: launch the job's groups from the cursor
        // on, stopping at the first group that is not fully ready.
        let group_ids = self
            .job_id2group_ids
            .get(&self.current_job_id)
            .unwrap_or_else(|| panic!("job {} has no groups on this machine", self.current_job_id))
            .clone();
        while (self.current_group_idx_in_job as usize) < group_ids.len() {
            let group_id = group_ids[self.current_group_idx_in_job as usize];
            if !self.group_states[group_id as usize].is_ready() {
                break;
            }
            let request_ids: Vec<i64> =
                self.group_states[group_id as usize].request_ids.iter().copied().collect();
            let mut ranks = Vec::with_capacity(request_ids.len());
            for &member_id in &request_ids {
                ranks.push(std::mem::take(&mut self.request_states[member_id as usize].ready_ranks));
            }
            let requests = self.group_states[group_id as usize].requests.clone();
            let backend_kind = self.group_states[group_id as usize].backend;
            tracing::debug!(group_id, job_id = self.current_job_id, "executing collective group");
            self.backends
                .get_mut(&backend_kind)
                .unwrap_or_else(|| panic!("no backend registered for {backend_kind:?}"))
                .execute_group(&requests, ranks);
            self.group_states[group_id as usize].ready_request_ids.clear();
            self.current_group_idx_in_job += 1;
        }
        if self.current_group_idx_in_job as usize == group_ids.len() {
            self.current_job_id = -1;
            self.current_group_idx_in_job = -1;
        }
    }
}

/// See the module docs.
pub struct CollectiveExecutor {
    config: CollectiveConfig,
    state: Mutex<ExecutorState>,
}

impl CollectiveExecutor {
    /// Ingests the plan: validates it, initializes every backend against it,
    /// and materializes request/group state. Groups are numbered in job
    /// order, then plan order within the job.
    pub fn new(
        plan: CollectivePlan,
        config: CollectiveConfig,
        mut backends: HashMap<BackendKind, Box<dyn ExecutorBackend>>,
    ) -> Result<Self> {
        plan.validate().context("collective plan failed validation")?;
        for backend in backends.values_mut() {
            backend.init(&plan)?;
        }

        let mut state = ExecutorState {
            backends,
            name2request_id: HashMap::new(),
            request_states: Vec::new(),
            group_states: Vec::new(),
            job_id2group_ids: HashMap::new(),
            current_job_id: -1,
            current_group_idx_in_job: -1,
        };
        Self::build_groups(&plan, &config, &mut state);

        let executor = Self { config, state: Mutex::new(state) };
        executor.dump_summary()?;
        Ok(executor)
    }

    fn build_groups(plan: &CollectivePlan, config: &CollectiveConfig, state: &mut ExecutorState) {
        for (&job_id, request_set) in &plan.job_id2request_set {
            let mut requests: Vec<Arc<RequestDesc>> = request_set
                .requests
                .iter()
                .filter(|request| request.device_set.has_device_on_machine(config.machine_id))
                .map(|request| Arc::new(request.clone()))
                .collect();
            requests.sort_by_key(|request| request.order);
            for pair in requests.windows(2) {
                assert!(
                    pair[0].depth <= pair[1].depth,
                    "job {job_id}: requests are not depth-monotone after the order sort \
                     ({:?} at depth {} precedes {:?} at depth {})",
                    pair[0].op_desc.name,
                    pair[0].depth,
                    pair[1].op_desc.name,
                    pair[1].depth
                );
            }

            // Rough groups honor depth/backend/device-set boundaries before
            // the backend applies its own fusion policy.
            let mut rough_groups: Vec<Vec<Arc<RequestDesc>>> = Vec::new();
            for request in requests {
                let start_new_group = !config.enable_fusion
                    || match rough_groups.last() {
                        None => true,
                        Some(rough_group) => {
                            let head = &rough_group[0];
                            request.depth != head.depth
                                || request.op_desc.backend != head.op_desc.backend
                                || request.device_set != head.device_set
                        }
                    };
                if start_new_group {
                    rough_groups.push(vec![request]);
                } else {
                    rough_groups.last_mut().expect("checked non-empty").push(request);
                }
            }

            for rough_group in rough_groups {
                let backend_kind = rough_group[0].op_desc.backend;
                let backend = state
                    .backends
                    .get(&backend_kind)
                    .unwrap_or_else(|| panic!("no backend registered for {backend_kind:?}"));
                for group in backend.group_requests(&rough_group) {
                    let group_id = state.group_states.len() as i64;
                    let mut request_ids = BTreeSet::new();
                    for request in &group {
                        let local_ranks = request.device_set.local_ranks(config.machine_id);
                        let request_id = state.request_states.len() as i64;
                        let previous =
                            state.name2request_id.insert(request.op_desc.name.clone(), request_id);
                        assert!(
                            previous.is_none(),
                            "request name {:?} appears twice",
                            request.op_desc.name
                        );
                        state.request_states.push(RequestState {
                            request: request.clone(),
                            job_id,
                            group_id,
                            local_ranks,
                            ready_ranks: BTreeMap::new(),
                        });
                        request_ids.insert(request_id);
                    }
                    state.group_states.push(GroupState {
                        backend: backend_kind,
                        request_ids,
                        requests: group,
                        ready_request_ids: BTreeSet::new(),
                    });
                    state.job_id2group_ids.entry(job_id).or_default().push(group_id);
                }
            }
        }
    }

    /// Registers one local rank of one request. When this completes the
    /// group at the current job cursor, that group — and every consecutively
    /// ready group after it — is executed, in plan order.
    pub fn enqueue(&self, rank_desc: RankDesc, request_info: RuntimeRequestInfo) {
        self.state.lock().enqueue(rank_desc, request_info);
    }

    /// Writes the group summary when debug mode is enabled.
    fn dump_summary(&self) -> Result<()> {
        if !self.config.enable_debug_mode {
            return Ok(());
        }
        let path = self.config.debug_dump_root.join(GROUP_DUMP_PATH);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating dump directory {}", parent.display()))?;
        }
        let state = self.state.lock();
        let mut dump = String::new();
        for (group_id, group_state) in state.group_states.iter().enumerate() {
            writeln!(dump, "group id: {group_id}").expect("writing to a String cannot fail");
            for request in &group_state.requests {
                let line = serde_json::to_string(request.as_ref())
                    .context("serializing a request for the dump")?;
                writeln!(dump, "{line}").expect("writing to a String cannot fail");
            }
        }
        std::fs::write(&path, dump)
            .with_context(|| format!("writing group summary to {}", path.display()))?;
        tracing::info!(path = %path.display(), "dumped collective group summary");
        Ok(())
    }

    // ------------------------------------------------------------------
    // introspection
    // ------------------------------------------------------------------

    pub fn group_count(&self) -> usize {
        self.state.lock().group_states.len()
    }

    /// Request names in `group_id`, in launch order.
    pub fn group_request_names(&self, group_id: i64) -> Vec<String> {
        self.state.lock().group_states[group_id as usize]
            .requests
            .iter()
            .map(|request| request.op_desc.name.clone())
            .collect()
    }

    /// Group ids of `job_id` in execution order, empty when the job has no
    /// local groups.
    pub fn job_group_ids(&self, job_id: i64) -> Vec<i64> {
        self.state.lock().job_id2group_ids.get(&job_id).cloned().unwrap_or_default()
    }

    /// Path the group summary dump is written to under `dump_root`.
    pub fn group_dump_path(dump_root: &Path) -> std::path::PathBuf {
        dump_root.join(GROUP_DUMP_PATH)
    }
}
