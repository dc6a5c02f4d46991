//! Error taxonomy for the propagation chain and solver boundary.

use thiserror::Error;

/// Failures of propagation-chain operations.
///
/// All variants are local and non-fatal: the chain is left unchanged and
/// the caller decides whether to retry or drop the measurement.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropagationError {
    /// Chain has no states to integrate onto or split.
    #[error("propagation chain is empty")]
    EmptyChain,

    /// Front state exists but is not fully defined.
    #[error("propagation front state is incomplete")]
    IncompleteState,

    /// New sample is not strictly newer than the chain's latest sample.
    #[error("non-monotonic IMU time, dt = {dt}")]
    NonMonotonicTime { dt: f64 },

    /// Split time outside the chain's covered interval.
    #[error("split time {t} outside chain interval [{first}, {last}]")]
    OutOfRangeSplit { t: f64, first: f64, last: f64 },

    /// A buffered sample failed to integrate during replay; the source
    /// chain was not modified.
    #[error("sample replay failed during repropagation")]
    ReplayFailed,
}

/// Failure reported by the opaque smoother capability.
///
/// Converted at the coordinator boundary into a forfeited optimization
/// cycle; never surfaces into caller-visible state.
#[derive(Debug, Clone, Error)]
#[error("smoother failure: {0}")]
pub struct SmootherError(pub String);
