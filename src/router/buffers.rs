//! Double-buffered scratch space for the exchange.
//!
//! One send buffer plus two equally sized halo/receive buffers whose roles
//! swap after every level (a parity bit, no reallocation). Backing storage
//! is `u64` words so any supported scalar can be viewed in place.

use crate::gather::extract;
use crate::reduce::HaloScalar;
use std::mem::size_of;

#[derive(Debug, Default)]
pub(crate) struct BufferPool {
    send: Vec<u64>,
    bufs: [Vec<u64>; 2],
    buf_id: usize,
}

fn words(nbytes: usize) -> usize {
    nbytes.div_ceil(size_of::<u64>())
}

impl BufferPool {
    /// Grow (never shrink) the buffers to `nsend`/`nrecv` slots of `nbytes`
    /// each. Idempotent; the parity bit resets only when the halo pair is
    /// actually reallocated.
    pub fn ensure(&mut self, nsend: usize, nrecv: usize, nbytes: usize) {
        let send_words = words(nsend * nbytes);
        if self.send.len() < send_words {
            self.send.resize(send_words, 0);
        }
        let recv_words = words(nrecv * nbytes);
        if self.bufs[0].len() < recv_words {
            log::debug!(
                "growing halo buffers to {} bytes",
                recv_words * size_of::<u64>()
            );
            self.bufs[0].resize(recv_words, 0);
            self.bufs[1].resize(recv_words, 0);
            self.buf_id = 0;
        }
    }

    /// Swap the halo/receive roles of the buffer pair.
    #[inline]
    pub fn rotate(&mut self) {
        self.buf_id ^= 1;
    }

    /// Current halo buffer, viewed as `T`.
    #[inline]
    pub fn halo<T: HaloScalar>(&self) -> &[T] {
        bytemuck::cast_slice(&self.bufs[self.buf_id])
    }

    /// Current halo buffer, viewed as `T`, mutable.
    #[inline]
    pub fn halo_mut<T: HaloScalar>(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(&mut self.bufs[self.buf_id])
    }

    /// Current halo buffer as raw bytes (receive landing zone).
    #[inline]
    pub fn halo_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.bufs[self.buf_id])
    }

    /// Extract `k`-wide blocks at `ids` from the current halo buffer into
    /// the send buffer and return the packed bytes.
    pub fn pack_send<T: HaloScalar>(&mut self, ids: &[usize], k: usize) -> &[u8] {
        {
            let halo: &[T] = bytemuck::cast_slice(&self.bufs[self.buf_id]);
            let send: &mut [T] = bytemuck::cast_slice_mut(&mut self.send);
            extract(ids, halo, send, k);
        }
        let nbytes = ids.len() * k * size_of::<T>();
        &bytemuck::cast_slice(&self.send)[..nbytes]
    }

    /// Post-rotation view: mutable current halo buffer (gather destination)
    /// and the previous one (gather source).
    pub fn pair_mut<T: HaloScalar>(&mut self) -> (&mut [T], &[T]) {
        let (lo, hi) = self.bufs.split_at_mut(1);
        let (dst, src) = if self.buf_id == 0 {
            (&mut lo[0], &hi[0])
        } else {
            (&mut hi[0], &lo[0])
        };
        (bytemuck::cast_slice_mut(dst), bytemuck::cast_slice(src))
    }
}
