// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Logical objects, their mirrored per-rank instances, and the operand
//! access lists the dependency linker works over.

use std::collections::BTreeMap;

use super::id::{AccessId, ChainId, MirroredObjectId, ObjectId};
use super::instruction::{MirroredObjectOperand, OperandTarget};

/// One pending operand access on a mirrored object.
#[derive(Debug, Clone, Copy)]
pub struct Access {
    pub chain: ChainId,
    pub is_const: bool,
}

/// The per-rank concrete instance of a logical object.
///
/// The access list is keyed by [`AccessId`]; ids are monotone, so iteration
/// order is registration order and removal by handle never disturbs the
/// remaining entries.
#[derive(Debug)]
pub struct MirroredObject {
    id: MirroredObjectId,
    access_list: BTreeMap<AccessId, Access>,
}

impl MirroredObject {
    fn new(id: MirroredObjectId) -> Self {
        Self { id, access_list: BTreeMap::new() }
    }

    pub fn id(&self) -> MirroredObjectId {
        self.id
    }

    pub fn access_list_len(&self) -> usize {
        self.access_list.len()
    }

    /// The oldest still-registered access, if any.
    pub fn head_access(&self) -> Option<(AccessId, Access)> {
        self.access_list.iter().next().map(|(&id, &access)| (id, access))
    }

    pub fn access(&self, id: AccessId) -> Option<Access> {
        self.access_list.get(&id).copied()
    }

    /// Accesses registered before `id`, oldest first.
    pub fn accesses_before(&self, id: AccessId) -> Vec<(AccessId, Access)> {
        self.access_list.range(..id).map(|(&aid, &access)| (aid, access)).collect()
    }

    pub(crate) fn push_access(&mut self, id: AccessId, access: Access) {
        let previous = self.access_list.insert(id, access);
        assert!(previous.is_none(), "duplicate access id {id:?} on {:?}", self.id);
    }

    /// Removes an access by handle. Returns false when a later writer
    /// already erased it.
    pub(crate) fn remove_access(&mut self, id: AccessId) -> bool {
        self.access_list.remove(&id).is_some()
    }

    /// Whether the access list is empty, a contiguous block of const
    /// accesses, or a single write followed only by const accesses. A new
    /// write erases every prior access, so at most one write can survive and
    /// only at the head. Holds after every scheduler tick.
    pub fn leading_run_is_well_formed(&self) -> bool {
        self.access_list.values().skip(1).all(|access| access.is_const)
    }
}

/// A logical shared object: a mapping from parallel rank to mirrored
/// instance.
#[derive(Debug)]
pub struct LogicalObject {
    id: ObjectId,
    parallel_id2mirrored_object: BTreeMap<i64, MirroredObject>,
}

impl LogicalObject {
    fn new(id: ObjectId, parallel_num: i64) -> Self {
        let parallel_id2mirrored_object = (0..parallel_num)
            .map(|parallel_id| {
                (parallel_id, MirroredObject::new(MirroredObjectId { object_id: id, parallel_id }))
            })
            .collect();
        Self { id, parallel_id2mirrored_object }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn parallel_num(&self) -> i64 {
        self.parallel_id2mirrored_object.len() as i64
    }

    pub fn mirrored_object(&self, parallel_id: i64) -> Option<&MirroredObject> {
        self.parallel_id2mirrored_object.get(&parallel_id)
    }
}

/// All logical objects known to one scheduler. Only ever touched on the
/// scheduler thread.
#[derive(Debug, Default)]
pub struct ObjectPool {
    id2logical_object: BTreeMap<ObjectId, LogicalObject>,
}

impl ObjectPool {
    /// Creates a logical object with `parallel_num` mirrored instances.
    /// Creating an object that already exists is a wiring bug.
    pub fn insert_logical_object(&mut self, id: ObjectId, parallel_num: i64) {
        assert!(parallel_num > 0, "logical object {id:?} needs at least one mirrored instance");
        let previous = self.id2logical_object.insert(id, LogicalObject::new(id, parallel_num));
        assert!(previous.is_none(), "logical object {id:?} created twice");
    }

    pub fn logical_object(&self, id: ObjectId) -> Option<&LogicalObject> {
        self.id2logical_object.get(&id)
    }

    pub fn len(&self) -> usize {
        self.id2logical_object.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2logical_object.is_empty()
    }

    pub(crate) fn mirrored_mut(&mut self, id: MirroredObjectId) -> &mut MirroredObject {
        self.id2logical_object
            .get_mut(&id.object_id)
            .unwrap_or_else(|| panic!("no logical object {:?}", id.object_id))
            .parallel_id2mirrored_object
            .get_mut(&id.parallel_id)
            .unwrap_or_else(|| panic!("no mirrored object {id:?}"))
    }

    /// Resolves an operand against `object_id` (the transform from symbol to
    /// self/type object has already been applied by the caller) and yields
    /// every mirrored instance it addresses: all of them for the all-ranks
    /// marker, otherwise the single instance at the operand's resolved rank.
    pub(crate) fn for_each_mirrored_object(
        &mut self,
        object_id: ObjectId,
        operand: &MirroredObjectOperand,
        current_parallel_id: i64,
        mut f: impl FnMut(&mut MirroredObject),
    ) {
        let logical_object = self
            .id2logical_object
            .get_mut(&object_id)
            .unwrap_or_else(|| panic!("no logical object {object_id:?} for operand {operand:?}"));
        match operand.target {
            OperandTarget::All => {
                for mirrored_object in logical_object.parallel_id2mirrored_object.values_mut() {
                    f(mirrored_object);
                }
            }
            _ => {
                let parallel_id = operand
                    .parallel_id(current_parallel_id)
                    .expect("non-all operand always resolves to one rank");
                let mirrored_object = logical_object
                    .parallel_id2mirrored_object
                    .get_mut(&parallel_id)
                    .unwrap_or_else(|| {
                        panic!("no mirrored object at rank {parallel_id} of {object_id:?}")
                    });
                f(mirrored_object);
            }
        }
    }
}
