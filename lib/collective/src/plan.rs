// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The collective plan: the pre-planned set of collective requests this
//! executor ingests once at construction.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The collective primitives the executor can launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpType {
    AllReduce,
    AllGather,
    ReduceScatter,
    Reduce,
    Broadcast,
}

impl OpType {
    /// Whether the primitive takes a root rank.
    pub fn is_rooted(&self) -> bool {
        matches!(self, OpType::Reduce | OpType::Broadcast)
    }
}

/// Elementwise reduction applied by reducing primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceMethod {
    Sum,
    Prod,
}

/// Element type of the buffers moved by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Float16,
    Float32,
    Float64,
    Int8,
    Int32,
    Int64,
    UInt8,
}

impl DataType {
    pub fn size_of(&self) -> i64 {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Float16 => 2,
            DataType::Float32 | DataType::Int32 => 4,
            DataType::Float64 | DataType::Int64 => 8,
        }
    }
}

/// Which communication backend executes a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Nccl,
}

/// Static description of one collective operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDesc {
    pub name: String,
    pub op_type: OpType,
    pub shape: Vec<i64>,
    pub data_type: DataType,
    pub reduce_method: ReduceMethod,
    pub root: i64,
    pub num_ranks: i64,
    pub backend: BackendKind,
}

impl OpDesc {
    pub fn elem_cnt(&self) -> i64 {
        self.shape.iter().product()
    }

    /// Total buffer size moved by this op.
    pub fn size_in_bytes(&self) -> i64 {
        self.elem_cnt() * self.data_type.size_of()
    }
}

/// One device participating in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceDesc {
    pub machine_id: i64,
    pub device_id: i64,
}

/// The ordered devices of one request; a device's index is its rank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceSet {
    devices: Vec<DeviceDesc>,
}

impl DeviceSet {
    pub fn new(devices: Vec<DeviceDesc>) -> Self {
        Self { devices }
    }

    pub fn devices(&self) -> &[DeviceDesc] {
        &self.devices
    }

    pub fn device(&self, rank: i64) -> DeviceDesc {
        self.devices[rank as usize]
    }

    pub fn len(&self) -> i64 {
        self.devices.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn has_device_on_machine(&self, machine_id: i64) -> bool {
        self.devices.iter().any(|device| device.machine_id == machine_id)
    }

    /// Ranks whose device lives on `machine_id`.
    pub fn local_ranks(&self, machine_id: i64) -> BTreeSet<i64> {
        self.devices
            .iter()
            .enumerate()
            .filter(|(_, device)| device.machine_id == machine_id)
            .map(|(rank, _)| rank as i64)
            .collect()
    }
}

/// One planned collective request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDesc {
    pub op_desc: OpDesc,
    pub device_set: DeviceSet,
    /// Launch order within the job.
    pub order: i64,
    /// Dependency depth; non-decreasing along `order` by producer contract.
    pub depth: i64,
}

/// The requests of one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestSet {
    pub requests: Vec<RequestDesc>,
}

/// The whole plan: requests keyed by job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectivePlan {
    pub job_id2request_set: BTreeMap<i64, RequestSet>,
}

/// Plan-producer mistakes detectable without machine context.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("request {name:?} has an empty device set")]
    EmptyDeviceSet { name: String },
    #[error("request {name:?} declares {num_ranks} ranks but its device set holds {device_count}")]
    RankCountMismatch { name: String, num_ranks: i64, device_count: i64 },
    #[error("request {name:?} roots rank {root}, outside 0..{num_ranks}")]
    RootOutOfRange { name: String, root: i64, num_ranks: i64 },
    #[error("request {name:?} has non-positive shape extent {extent}")]
    BadShapeExtent { name: String, extent: i64 },
    #[error("request name {name:?} appears more than once in the plan")]
    DuplicateName { name: String },
}

impl CollectivePlan {
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut seen_names = BTreeSet::new();
        for request_set in self.job_id2request_set.values() {
            for request in &request_set.requests {
                let op = &request.op_desc;
                if request.device_set.is_empty() {
                    return Err(PlanError::EmptyDeviceSet { name: op.name.clone() });
                }
                if op.num_ranks != request.device_set.len() {
                    return Err(PlanError::RankCountMismatch {
                        name: op.name.clone(),
                        num_ranks: op.num_ranks,
                        device_count: request.device_set.len(),
                    });
                }
                if op.op_type.is_rooted() && !(0..op.num_ranks).contains(&op.root) {
                    return Err(PlanError::RootOutOfRange {
                        name: op.name.clone(),
                        root: op.root,
                        num_ranks: op.num_ranks,
                    });
                }
                if let Some(&extent) = op.shape.iter().find(|&&extent| extent <= 0) {
                    return Err(PlanError::BadShapeExtent { name: op.name.clone(), extent });
                }
                if !seen_names.insert(op.name.clone()) {
                    return Err(PlanError::DuplicateName { name: op.name.clone() });
                }
            }
        }
        Ok(())
    }
}

/// Identifies one rank of one request at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankDesc {
    pub op_desc: OpDesc,
    pub rank: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn op(name: &str, op_type: OpType, num_ranks: i64) -> OpDesc {
        OpDesc {
            name: name.to_string(),
            op_type,
            shape: vec![16, 4],
            data_type: DataType::Float32,
            reduce_method: ReduceMethod::Sum,
            root: 0,
            num_ranks,
            backend: BackendKind::Nccl,
        }
    }

    fn two_rank_set() -> DeviceSet {
        DeviceSet::new(vec![
            DeviceDesc { machine_id: 0, device_id: 0 },
            DeviceDesc { machine_id: 0, device_id: 1 },
        ])
    }

    fn plan_of(requests: Vec<RequestDesc>) -> CollectivePlan {
        let mut plan = CollectivePlan::default();
        plan.job_id2request_set.insert(0, RequestSet { requests });
        plan
    }

    #[test]
    fn byte_sizes_follow_shape_and_dtype() {
        let desc = op("ar", OpType::AllReduce, 2);
        assert_eq!(desc.elem_cnt(), 64);
        assert_eq!(desc.size_in_bytes(), 256);
    }

    #[rstest]
    #[case::f16(DataType::Float16, 2)]
    #[case::f32(DataType::Float32, 4)]
    #[case::f64(DataType::Float64, 8)]
    #[case::i8(DataType::Int8, 1)]
    #[case::i32(DataType::Int32, 4)]
    #[case::i64(DataType::Int64, 8)]
    #[case::u8(DataType::UInt8, 1)]
    fn element_sizes(#[case] data_type: DataType, #[case] expected: i64) {
        assert_eq!(data_type.size_of(), expected);
    }

    #[test]
    fn local_ranks_are_rank_indices_not_device_ids() {
        let set = DeviceSet::new(vec![
            DeviceDesc { machine_id: 1, device_id: 5 },
            DeviceDesc { machine_id: 0, device_id: 5 },
            DeviceDesc { machine_id: 1, device_id: 6 },
        ]);
        assert_eq!(set.local_ranks(1), BTreeSet::from([0, 2]));
        assert_eq!(set.local_ranks(0), BTreeSet::from([1]));
        assert!(set.local_ranks(9).is_empty());
        assert!(set.has_device_on_machine(0));
        assert!(!set.has_device_on_machine(9));
    }

    #[test]
    fn valid_plans_pass_validation() {
        let plan = plan_of(vec![RequestDesc {
            op_desc: op("ar", OpType::AllReduce, 2),
            device_set: two_rank_set(),
            order: 0,
            depth: 0,
        }]);
        assert_eq!(plan.validate(), Ok(()));
    }

    #[test]
    fn rank_count_mismatch_is_reported() {
        let plan = plan_of(vec![RequestDesc {
            op_desc: op("ar", OpType::AllReduce, 3),
            device_set: two_rank_set(),
            order: 0,
            depth: 0,
        }]);
        assert!(matches!(plan.validate(), Err(PlanError::RankCountMismatch { .. })));
    }

    #[test]
    fn rooted_ops_need_an_in_range_root() {
        let mut desc = op("bc", OpType::Broadcast, 2);
        desc.root = 2;
        let plan = plan_of(vec![RequestDesc {
            op_desc: desc,
            device_set: two_rank_set(),
            order: 0,
            depth: 0,
        }]);
        assert!(matches!(plan.validate(), Err(PlanError::RootOutOfRange { .. })));
    }

    #[test]
    fn unrooted_ops_ignore_the_root_field() {
        let mut desc = op("ar", OpType::AllReduce, 2);
        desc.root = 99;
        let plan = plan_of(vec![RequestDesc {
            op_desc: desc,
            device_set: two_rank_set(),
            order: 0,
            depth: 0,
        }]);
        assert_eq!(plan.validate(), Ok(()));
    }

    #[test]
    fn duplicate_names_are_reported_across_jobs() {
        let request = RequestDesc {
            op_desc: op("ar", OpType::AllReduce, 2),
            device_set: two_rank_set(),
            order: 0,
            depth: 0,
        };
        let mut plan = CollectivePlan::default();
        plan.job_id2request_set.insert(0, RequestSet { requests: vec![request.clone()] });
        plan.job_id2request_set.insert(1, RequestSet { requests: vec![request] });
        assert!(matches!(plan.validate(), Err(PlanError::DuplicateName { .. })));
    }

    #[test]
    fn bad_shape_extents_are_reported() {
        let mut desc = op("ar", OpType::AllReduce, 2);
        desc.shape = vec![4, 0];
        let plan = plan_of(vec![RequestDesc {
            op_desc: desc,
            device_set: two_rank_set(),
            order: 0,
            depth: 0,
        }]);
        assert!(matches!(plan.validate(), Err(PlanError::BadShapeExtent { extent: 0, .. })));
    }

    #[test]
    fn plans_round_trip_through_json() {
        let plan = plan_of(vec![RequestDesc {
            op_desc: op("ar", OpType::AllReduce, 2),
            device_set: two_rank_set(),
            order: 0,
            depth: 0,
        }]);
        let json = serde_json::to_string(&plan).unwrap();
        let parsed: CollectivePlan = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, plan);
    }
}
