//! Shared-node participation records.
//!
//! [`RouterNode`] is the flat record the setup protocol shuffles between
//! ranks. It is `#[repr(C)]` and `bytemuck::Pod`, so the in-memory layout is
//! also the wire layout; arrays of records are sent as plain byte slices.

use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

/// Sentinel for a record whose extended-halo slot is not assigned yet
/// (in flight between ranks).
pub const UNASSIGNED: i64 = -1;

/// One shared-node participation as seen by the setup protocol.
///
/// `base_id`'s magnitude is the global identity of the mesh node; its sign
/// records the role the copy had when the record was created. `sign` starts
/// as ±2 matching that role and is later promoted across a base-id group
/// when any participant turns out to be positive. The two overlap but are
/// not interchangeable: promotion must not disturb `base_id`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct RouterNode {
    /// Signed global identity.
    pub base_id: i64,
    /// Local slot in the extended halo; [`UNASSIGNED`] while in flight.
    pub new_id: i64,
    /// Scratch slot used to restore pre-sort order.
    pub local_id: i64,
    /// Rank whose sub-cube this record must reach.
    pub rank: i32,
    /// ±2 role flag, promoted by sign propagation.
    pub sign: i32,
}

impl RouterNode {
    /// Magnitude of the global identity.
    #[inline]
    pub fn base(&self) -> i64 {
        self.base_id.abs()
    }
}

const _: () = {
    assert!(size_of::<RouterNode>() == 32);
    assert!(align_of::<RouterNode>() == 8);
};

/// Public input record: one remote participation of a shared halo node.
///
/// `new_id` is the slot in `[0, nhalo)` this participation maps to on the
/// local rank. The record's role flag is carried by the sign of `base_id`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SharedNode {
    /// Rank holding the remote copy.
    pub rank: usize,
    /// Signed global identity of the shared node (non-zero).
    pub base_id: i64,
    /// Local halo slot this participation targets.
    pub new_id: usize,
}

impl SharedNode {
    pub fn new(rank: usize, base_id: i64, new_id: usize) -> Self {
        Self {
            rank,
            base_id,
            new_id,
        }
    }

    /// Initial ±2 sign flag derived from the record's role.
    #[inline]
    pub(crate) fn seed_sign(&self) -> i32 {
        if self.base_id > 0 {
            2
        } else {
            -2
        }
    }
}

/// Restore an ordering recorded in each node's `local_id`.
///
/// The relabelling pass sorts by base identity and must then return to the
/// split/receive order the gather descriptors are built against.
pub(crate) fn restore_order(nodes: &mut [RouterNode]) {
    let mut scratch = vec![RouterNode::zeroed(); nodes.len()];
    for n in nodes.iter() {
        scratch[n.local_id as usize] = *n;
    }
    nodes.copy_from_slice(&scratch);
}
