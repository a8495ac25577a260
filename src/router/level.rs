//! Per-round level descriptor.

use crate::gather::GatherMap;

/// Everything one exchange round needs: peers, send extraction list,
/// receive layout, and the gather descriptor folding received entries into
/// the extended halo.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Level {
    /// Reflected partner rank.
    pub partner: usize,
    /// Secondary source rank (`r_half - 1`), meaningful when `nmsg == 2`.
    pub second: usize,
    /// 0 (send only), 1, or 2 messages received this round.
    pub nmsg: u8,
    /// Halo slots extracted into the send buffer, one per departing
    /// base-id group.
    pub send_ids: Vec<usize>,
    /// Entries received from `partner`.
    pub nrecv0: usize,
    /// Entries received from `second` (odd parity only).
    pub nrecv1: usize,
    /// Where received entries land in the extended halo buffer.
    pub recv_offset: usize,
    /// Folds `[0, recv_offset) ∪ received entries` into the extended halo.
    pub gather: GatherMap,
}

impl Level {
    /// Number of entries this rank sends.
    #[inline]
    pub fn nsend(&self) -> usize {
        self.send_ids.len()
    }

    /// Total receive-layout width of this round.
    #[inline]
    pub fn recv_total(&self) -> usize {
        self.recv_offset + self.nrecv0 + self.nrecv1
    }
}
