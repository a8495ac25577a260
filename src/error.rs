//! HaloError: unified error type for the halo-router public APIs.
//!
//! Every public operation returns `Result<_, HaloError>`; the crate does not
//! panic on contract violations it can detect locally. Cross-rank collective
//! mismatches are not detectable and remain the caller's responsibility.

use thiserror::Error;

/// Unified error type for router construction and exchange.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HaloError {
    /// The outer gather reported `nhalo_p > nhalo`.
    #[error("invalid halo layout: nhalo_p ({nhalo_p}) exceeds nhalo ({nhalo})")]
    InvalidHaloLayout { nhalo_p: usize, nhalo: usize },

    /// A shared-node record targets a slot outside `[0, nhalo)`.
    #[error("shared node targets slot {slot} outside the halo of size {nhalo}")]
    SlotOutOfRange { slot: usize, nhalo: usize },

    /// A shared-node record carries a zero base identity.
    #[error("shared node base identity must be non-zero")]
    ZeroBaseId,

    /// `k` must be at least 1.
    #[error("component count k must be >= 1 (got {0})")]
    InvalidComponentCount(usize),

    /// The caller's value slab is shorter than the halo region requires.
    #[error("value slab too short: need {needed} elements, got {got}")]
    SlabTooShort { needed: usize, got: usize },

    /// `start` was called while an exchange is already pending.
    #[error("exchange already in progress; call finish first")]
    ExchangeInProgress,

    /// `finish` was called with no pending exchange.
    #[error("no exchange in progress; call start first")]
    NoExchangeInProgress,

    /// `finish` parameters disagree with the pending `start`.
    #[error(
        "finish parameters disagree with pending start \
         (started k={started_k}, element width {started_width})"
    )]
    ExchangeMismatch { started_k: usize, started_width: usize },

    /// A peer's message never arrived or could not be completed.
    #[error("communication with rank {peer} failed: {reason}")]
    Comm { peer: usize, reason: String },

    /// A peer's message had an unexpected length.
    #[error("message from rank {peer} had {got} bytes, expected {expected}")]
    BufferSizeMismatch {
        peer: usize,
        expected: usize,
        got: usize,
    },
}
