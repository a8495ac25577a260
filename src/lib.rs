//! # halo-router
//!
//! halo-router is a crystal-router halo-exchange engine for distributed
//! gather/scatter on unstructured meshes. Given a set of globally shared
//! mesh nodes partitioned across P ranks, it reduces the partial values
//! contributed by every rank and delivers, to each rank, the combined value
//! for every shared node it participates in — in ⌈log₂ P⌉ communication
//! rounds of recursive hypercube folding, independent of the density of the
//! underlying exchange graph.
//!
//! ## Features
//! - Cooperative multi-round setup building per-level gather descriptors and
//!   an extended-halo layout, in symmetric and non-symmetric variants
//! - Non-blocking point-to-point exchange with double-buffer rotation
//! - Pluggable communication backends (serial, intra-process threads, MPI)
//! - Any component count `k >= 1` and element type (`f32/f64/i32/i64/u32/u64`)
//!   per exchange, with `Add`/`Mul`/`Min`/`Max` reductions
//!
//! ## Usage
//! Add `halo-router` as a dependency and enable features as needed:
//!
//! ```toml
//! [dependencies]
//! halo-router = "0.2"
//! # Optional: features = ["mpi-support"]
//! ```
//!
//! Each rank describes the remote participations of its halo slots with
//! [`node::SharedNode`] records, builds a [`router::Router`] over its
//! communicator, and then drives exchanges:
//!
//! ```no_run
//! use halo_router::prelude::*;
//!
//! # fn demo(comm: halo_router::comm::NoComm) -> Result<(), halo_router::error::HaloError> {
//! let layout = HaloLayout::new(0, 0)?;
//! let mut router = Router::new(&[], layout, comm)?;
//! let mut values: Vec<f64> = vec![];
//! router.exchange(&mut values, 1, ReduceOp::Add, Transpose::Trans)?;
//! # Ok(()) }
//! ```

pub mod comm;
pub mod error;
pub mod gather;
pub mod node;
pub mod reduce;
pub mod router;

/// A convenient prelude importing the most-used types.
pub mod prelude {
    pub use crate::comm::{Communicator, LocalComm, NoComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::error::HaloError;
    pub use crate::node::SharedNode;
    pub use crate::reduce::{HaloScalar, ReduceOp, Transpose};
    pub use crate::router::{HaloLayout, Router};
}
