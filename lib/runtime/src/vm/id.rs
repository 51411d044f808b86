// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Typed identifiers used throughout the VM.
//!
//! Everything the scheduler tracks — logical objects, their per-rank
//! mirrored instances, stream types, streams, chains, operand accesses — is
//! addressed by a small `Copy` id so that every list and map in the
//! scheduler can hold handles instead of owning references.

use std::fmt;

/// Whether an instruction executes the real pass or the shape/metadata
/// pre-pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InterpretType {
    Compute,
    Infer,
}

/// Identifier of a logical shared object.
///
/// A symbol value owns two derived objects: the *self* object carrying the
/// actual per-rank state, and the *type* object carrying its metadata. The
/// derivation is encoded in the high bit, so a symbol must fit in 63 bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

const TYPE_OBJECT_BIT: u64 = 1 << 63;

impl ObjectId {
    /// The self object of `symbol`.
    pub fn self_of(symbol: u64) -> Self {
        assert_eq!(symbol & TYPE_OBJECT_BIT, 0, "symbol value overflows 63 bits: {symbol:#x}");
        Self(symbol)
    }

    /// The type object of `symbol`.
    pub fn type_of(symbol: u64) -> Self {
        assert_eq!(symbol & TYPE_OBJECT_BIT, 0, "symbol value overflows 63 bits: {symbol:#x}");
        Self(symbol | TYPE_OBJECT_BIT)
    }

    pub fn is_type_object(&self) -> bool {
        self.0 & TYPE_OBJECT_BIT != 0
    }

    /// The symbol value this object derives from.
    pub fn symbol(&self) -> u64 {
        self.0 & !TYPE_OBJECT_BIT
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_type_object() {
            write!(f, "ObjectId::type_of({})", self.symbol())
        } else {
            write!(f, "ObjectId::self_of({})", self.symbol())
        }
    }
}

/// Address of one mirrored instance: `(logical object, parallel rank)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MirroredObjectId {
    pub object_id: ObjectId,
    pub parallel_id: i64,
}

/// Identifier of a stream type under one interpret pass.
///
/// The compute and infer counterparts of a stream type share a `code` and
/// differ only in `interpret`; both may map to the same registered
/// [`crate::vm::StreamType`] object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamTypeId {
    pub code: u32,
    pub interpret: InterpretType,
}

impl StreamTypeId {
    pub fn compute(code: u32) -> Self {
        Self { code, interpret: InterpretType::Compute }
    }

    pub fn infer(code: u32) -> Self {
        Self { code, interpret: InterpretType::Infer }
    }
}

/// Identifier of an instruction type: the stream type (and therefore the
/// interpret kind) its instructions run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrTypeId {
    pub stream_type_id: StreamTypeId,
}

/// Address of one stream: `(stream type, parallel rank)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub stream_type_id: StreamTypeId,
    pub parallel_id: i64,
}

/// Handle of one instruction chain in the scheduler's chain arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChainId(pub(crate) u64);

/// Handle of one operand access. Ids are allocated from a monotone counter,
/// so ordering by `AccessId` is registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccessId(pub(crate) u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_and_type_objects_are_distinct() {
        let symbol = 9527;
        let self_id = ObjectId::self_of(symbol);
        let type_id = ObjectId::type_of(symbol);
        assert_ne!(self_id, type_id);
        assert_eq!(self_id.symbol(), symbol);
        assert_eq!(type_id.symbol(), symbol);
        assert!(type_id.is_type_object());
        assert!(!self_id.is_type_object());
    }

    #[test]
    #[should_panic(expected = "overflows 63 bits")]
    fn symbol_overflow_is_rejected() {
        ObjectId::self_of(1 << 63);
    }
}
