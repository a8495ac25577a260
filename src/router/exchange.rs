//! Steady-state exchange: the Start/Finish pair driving one collective
//! halo exchange over the prepared levels.

use std::mem::size_of;

use crate::comm::{Communicator, Wait};
use crate::error::HaloError;
use crate::reduce::{HaloScalar, ReduceOp, Transpose};
use crate::router::buffers::BufferPool;
use crate::router::level::Level;
use crate::router::{Pending, Router};

impl<C: Communicator> Router<C> {
    /// Publish `k` values per halo slot into the exchange pipeline.
    ///
    /// Stages `N * k` elements from `values` (`N = nhalo_p` for
    /// [`Transpose::NoTrans`], `nhalo` otherwise) into the working halo
    /// buffer; the unstaged remainder is filled with the identity of `op` so
    /// it cannot contribute. Never blocks on communication.
    pub fn start<T: HaloScalar>(
        &mut self,
        values: &[T],
        k: usize,
        op: ReduceOp,
        trans: Transpose,
    ) -> Result<(), HaloError> {
        if k == 0 {
            return Err(HaloError::InvalidComponentCount(0));
        }
        if self.pending.is_some() {
            return Err(HaloError::ExchangeInProgress);
        }
        let n_stage = self.stage_len(trans);
        if values.len() < n_stage * k {
            return Err(HaloError::SlabTooShort {
                needed: n_stage * k,
                got: values.len(),
            });
        }

        self.pool
            .ensure(self.nsend_max, self.nrecv_max, k * size_of::<T>());
        let nhalo = self.halo.nhalo();
        let halo = self.pool.halo_mut::<T>();
        halo[..n_stage * k].copy_from_slice(&values[..n_stage * k]);
        for v in &mut halo[n_stage * k..nhalo * k] {
            *v = op.identity();
        }

        self.pending = Some(Pending {
            k,
            width: size_of::<T>(),
            trans,
        });
        Ok(())
    }

    /// Drive every level to completion and deliver the combined values.
    ///
    /// Writes back `N * k` elements into `values` (`N = nhalo` for
    /// [`Transpose::Trans`], `nhalo_p` otherwise); the rest of the slab is
    /// left untouched. Collective over the communicator.
    pub fn finish<T: HaloScalar>(
        &mut self,
        values: &mut [T],
        k: usize,
        op: ReduceOp,
        trans: Transpose,
    ) -> Result<(), HaloError> {
        let pending = self.pending.take().ok_or(HaloError::NoExchangeInProgress)?;
        if pending.k != k || pending.width != size_of::<T>() || pending.trans != trans {
            return Err(HaloError::ExchangeMismatch {
                started_k: pending.k,
                started_width: pending.width,
            });
        }
        let n_deliver = self.deliver_len(trans);
        if values.len() < n_deliver * k {
            return Err(HaloError::SlabTooShort {
                needed: n_deliver * k,
                got: values.len(),
            });
        }

        let Router {
            comm,
            pool,
            levels_n,
            levels_t,
            ..
        } = self;
        let levels = match trans {
            Transpose::NoTrans => &*levels_n,
            _ => &*levels_t,
        };
        run_levels::<T, C>(comm, pool, levels, k, op)?;

        values[..n_deliver * k].copy_from_slice(&self.pool.halo::<T>()[..n_deliver * k]);
        Ok(())
    }

    /// Start followed by Finish on the same slab.
    pub fn exchange<T: HaloScalar>(
        &mut self,
        values: &mut [T],
        k: usize,
        op: ReduceOp,
        trans: Transpose,
    ) -> Result<(), HaloError> {
        self.start(values, k, op, trans)?;
        self.finish(values, k, op, trans)
    }

    fn stage_len(&self, trans: Transpose) -> usize {
        match trans {
            Transpose::NoTrans => self.halo.nhalo_p(),
            _ => self.halo.nhalo(),
        }
    }

    fn deliver_len(&self, trans: Transpose) -> usize {
        match trans {
            Transpose::Trans => self.halo.nhalo(),
            _ => self.halo.nhalo_p(),
        }
    }
}

/// One pass over the level vector: receives posted first, send packed and
/// posted, all legs waited, buffers rotated, received region folded in.
fn run_levels<T: HaloScalar, C: Communicator>(
    comm: &C,
    pool: &mut BufferPool,
    levels: &[Level],
    k: usize,
    op: ReduceOp,
) -> Result<(), HaloError> {
    let esize = size_of::<T>();
    let my_tag = comm.rank() as u16;

    for level in levels {
        let h0 = (level.nmsg > 0).then(|| {
            comm.irecv(
                level.partner,
                level.partner as u16,
                k * level.nrecv0 * esize,
            )
        });
        let h1 = (level.nmsg == 2).then(|| {
            comm.irecv(level.second, level.second as u16, k * level.nrecv1 * esize)
        });

        let send_bytes = pool.pack_send::<T>(&level.send_ids, k);
        let s = comm.isend(level.partner, my_tag, send_bytes);

        let base = level.recv_offset * k * esize;
        recv_into(pool, h0, level.partner, base, k * level.nrecv0 * esize)?;
        recv_into(
            pool,
            h1,
            level.second,
            base + level.nrecv0 * k * esize,
            k * level.nrecv1 * esize,
        )?;
        let _ = s.wait();

        pool.rotate();
        let (dst, src) = pool.pair_mut::<T>();
        level.gather.gather(dst, src, k, op);
    }
    Ok(())
}

fn recv_into<H: Wait>(
    pool: &mut BufferPool,
    handle: Option<H>,
    peer: usize,
    offset: usize,
    expected: usize,
) -> Result<(), HaloError> {
    let Some(h) = handle else { return Ok(()) };
    let data = h.wait().ok_or_else(|| HaloError::Comm {
        peer,
        reason: "exchange receive returned no data".into(),
    })?;
    if data.len() != expected {
        return Err(HaloError::BufferSizeMismatch {
            peer,
            expected,
            got: data.len(),
        });
    }
    pool.halo_bytes_mut()[offset..offset + expected].copy_from_slice(&data);
    Ok(())
}
