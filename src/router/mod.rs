//! The crystal-router halo-exchange engine.
//!
//! Given the globally shared nodes a rank participates in, [`Router::new`]
//! runs the cooperative setup protocol and builds one level descriptor per
//! hypercube folding round, for both the symmetric and the non-symmetric
//! exchange variant. The router then serves arbitrarily many
//! [`start`](Router::start)/[`finish`](Router::finish) exchanges, with any
//! component count `k >= 1` and any supported element type, reusing its
//! levels and growing its scratch buffers on demand.

pub mod buffers;
pub mod exchange;
pub mod level;
pub mod plan;
pub mod setup;

use crate::comm::Communicator;
use crate::error::HaloError;
use crate::node::SharedNode;
use crate::reduce::Transpose;
use self::buffers::BufferPool;
use self::level::Level;

/// Halo sizes reported by the surrounding gather/scatter object.
///
/// `nhalo_p` slots hold positively signed (canonical) participations and
/// occupy the prefix `[0, nhalo_p)`; the remaining slots up to `nhalo` are
/// borrowed copies.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HaloLayout {
    nhalo_p: usize,
    nhalo: usize,
}

impl HaloLayout {
    pub fn new(nhalo_p: usize, nhalo: usize) -> Result<Self, HaloError> {
        if nhalo_p > nhalo {
            return Err(HaloError::InvalidHaloLayout { nhalo_p, nhalo });
        }
        Ok(Self { nhalo_p, nhalo })
    }

    /// Positively signed halo size.
    #[inline]
    pub fn nhalo_p(&self) -> usize {
        self.nhalo_p
    }

    /// Total halo size.
    #[inline]
    pub fn nhalo(&self) -> usize {
        self.nhalo
    }
}

/// In-flight exchange parameters between `start` and `finish`.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Pending {
    pub k: usize,
    pub width: usize,
    pub trans: Transpose,
}

/// Crystal-router halo exchange over a [`Communicator`].
pub struct Router<C: Communicator> {
    comm: C,
    halo: HaloLayout,
    levels_n: Vec<Level>,
    levels_t: Vec<Level>,
    nsend_max: usize,
    nrecv_max: usize,
    pool: BufferPool,
    pending: Option<Pending>,
}

impl<C: Communicator> Router<C> {
    /// Run the setup protocol and build the level descriptors.
    ///
    /// `shared` lists every remote participation of this rank's halo nodes;
    /// entries need not be sorted and each must target a slot in
    /// `[0, nhalo)`. Collective over `comm`: every rank of the communicator
    /// must construct its router at the same time.
    pub fn new(shared: &[SharedNode], halo: HaloLayout, comm: C) -> Result<Self, HaloError> {
        let setup = setup::build_levels(&comm, halo, shared)?;
        Ok(Self {
            comm,
            halo,
            levels_n: setup.levels_n,
            levels_t: setup.levels_t,
            nsend_max: setup.nsend_max,
            nrecv_max: setup.nrecv_max,
            pool: BufferPool::default(),
            pending: None,
        })
    }

    /// Number of hypercube folding rounds this rank participates in.
    #[inline]
    pub fn nlevels(&self) -> usize {
        self.levels_t.len()
    }

    /// Largest per-level send entry count (sizes the send buffer).
    #[inline]
    pub fn nsend_max(&self) -> usize {
        self.nsend_max
    }

    /// Largest per-level receive-layout width (sizes the halo buffers).
    #[inline]
    pub fn nrecv_max(&self) -> usize {
        self.nrecv_max
    }

    /// Halo sizes this router was built with.
    #[inline]
    pub fn halo(&self) -> HaloLayout {
        self.halo
    }

    /// The level descriptors of one variant.
    #[inline]
    pub fn levels(&self, trans: Transpose) -> &[Level] {
        match trans {
            Transpose::NoTrans => &self.levels_n,
            _ => &self.levels_t,
        }
    }

    /// The communicator this router exchanges over.
    #[inline]
    pub fn comm(&self) -> &C {
        &self.comm
    }
}
