// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The device abstraction the collective backends are written against.
//!
//! The real GPU runtime is an external collaborator; this crate only needs
//! an opaque stream/event/communicator provider. [`CommDevice`] captures
//! that surface, [`DeviceGuard`] gives current-device set/restore scoped to
//! all exit paths, and [`host::HostDevice`] is a process-local
//! implementation used by tests and single-process debugging.

pub mod host;

use std::fmt;

use anyhow::{bail, Result};

use crate::plan::{DataType, ReduceMethod};

/// Size of a communicator unique id, matching NCCL's 128-byte id.
pub const COMM_UNIQUE_ID_BYTES: usize = 128;

/// The opaque rendezvous token shared by all ranks of a communicator.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommUniqueId([u8; COMM_UNIQUE_ID_BYTES]);

impl CommUniqueId {
    pub fn from_bytes(bytes: [u8; COMM_UNIQUE_ID_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; COMM_UNIQUE_ID_BYTES] {
        &self.0
    }

    /// Lowercase-hex encoding used when publishing the id over the control
    /// plane.
    pub fn to_hex_string(&self) -> String {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    pub fn from_hex_string(hex: &str) -> Result<Self> {
        if hex.len() != COMM_UNIQUE_ID_BYTES * 2 {
            bail!("unique id must be {} hex chars, got {}", COMM_UNIQUE_ID_BYTES * 2, hex.len());
        }
        let mut bytes = [0u8; COMM_UNIQUE_ID_BYTES];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &hex[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| anyhow::anyhow!("invalid hex {pair:?} in unique id"))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for CommUniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: String = self.0[..8].iter().map(|byte| format!("{byte:02x}")).collect();
        write!(f, "CommUniqueId({head}…)")
    }
}

/// Result of a non-blocking event query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Ready,
    NotReady,
}

/// Opaque per-device stream/event/communicator provider.
///
/// Every device-touching operation takes the device id explicitly; callers
/// set the current device first (the host implementation checks this the
/// way a CUDA runtime would resolve it implicitly). Streams, events and
/// communicators release their resources on drop; the backend sequences
/// drops so streams go before communicators.
pub trait CommDevice: Send + Sync + 'static {
    type Stream: Send + Sync;
    type Event: Send;
    type Comm: Send + Sync;

    fn current_device(&self) -> Result<i64>;
    fn set_device(&self, device_id: i64) -> Result<()>;

    /// `(least, greatest)` stream priority bounds of the device runtime.
    fn stream_priority_range(&self) -> Result<(i32, i32)>;
    fn create_stream(&self, device_id: i64, priority: i32) -> Result<Self::Stream>;
    fn synchronize_stream(&self, device_id: i64, stream: &Self::Stream) -> Result<()>;

    /// Creates a completion event without timing data.
    fn create_event(&self, device_id: i64) -> Result<Self::Event>;
    fn record_event(&self, device_id: i64, event: &Self::Event, stream: &Self::Stream)
        -> Result<()>;
    fn query_event(&self, device_id: i64, event: &Self::Event) -> Result<EventStatus>;

    fn generate_unique_id(&self) -> Result<CommUniqueId>;
    fn comm_init_rank(
        &self,
        device_id: i64,
        num_ranks: i64,
        unique_id: &CommUniqueId,
        rank: i64,
    ) -> Result<Self::Comm>;

    /// Open/close a grouped-launch bracket; calls between the pair are
    /// batched into one submission.
    fn group_start(&self) -> Result<()>;
    fn group_end(&self) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn all_reduce(
        &self,
        comm: &Self::Comm,
        stream: &Self::Stream,
        send_buff: usize,
        recv_buff: usize,
        elem_cnt: i64,
        data_type: DataType,
        reduce_method: ReduceMethod,
    ) -> Result<()>;

    fn all_gather(
        &self,
        comm: &Self::Comm,
        stream: &Self::Stream,
        send_buff: usize,
        recv_buff: usize,
        elem_cnt_per_rank: i64,
        data_type: DataType,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn reduce_scatter(
        &self,
        comm: &Self::Comm,
        stream: &Self::Stream,
        send_buff: usize,
        recv_buff: usize,
        elem_cnt_per_rank: i64,
        data_type: DataType,
        reduce_method: ReduceMethod,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn reduce(
        &self,
        comm: &Self::Comm,
        stream: &Self::Stream,
        send_buff: usize,
        recv_buff: usize,
        elem_cnt: i64,
        data_type: DataType,
        reduce_method: ReduceMethod,
        root: i64,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn broadcast(
        &self,
        comm: &Self::Comm,
        stream: &Self::Stream,
        send_buff: usize,
        recv_buff: usize,
        elem_cnt: i64,
        data_type: DataType,
        root: i64,
    ) -> Result<()>;
}

/// Saves the current device on construction and restores it on drop, so the
/// device switches inside a scope cannot leak on any exit path.
pub struct DeviceGuard<'a, D: CommDevice> {
    device: &'a D,
    saved: i64,
}

impl<'a, D: CommDevice> DeviceGuard<'a, D> {
    pub fn new(device: &'a D) -> Result<Self> {
        let saved = device.current_device()?;
        Ok(Self { device, saved })
    }
}

impl<D: CommDevice> Drop for DeviceGuard<'_, D> {
    fn drop(&mut self) {
        if let Err(error) = self.device.set_device(self.saved) {
            tracing::warn!(%error, saved = self.saved, "failed to restore current device");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids_round_trip_through_hex() {
        let mut bytes = [0u8; COMM_UNIQUE_ID_BYTES];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = (i * 7 % 251) as u8;
        }
        let id = CommUniqueId::from_bytes(bytes);
        let hex = id.to_hex_string();
        assert_eq!(hex.len(), COMM_UNIQUE_ID_BYTES * 2);
        assert_eq!(CommUniqueId::from_hex_string(&hex).unwrap(), id);
    }

    #[test]
    fn truncated_hex_is_rejected() {
        assert!(CommUniqueId::from_hex_string("abcd").is_err());
    }

    #[test]
    fn non_hex_input_is_rejected() {
        let bad = "zz".repeat(COMM_UNIQUE_ID_BYTES);
        assert!(CommUniqueId::from_hex_string(&bad).is_err());
    }
}
