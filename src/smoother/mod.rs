//! Abstraction over the fixed-lag smoother backend.
//!
//! The optimization layer only needs to feed graph increments in and
//! read solved estimates back out; everything about how the smoother
//! factorizes and marginalizes stays behind this trait.

use std::collections::HashMap;

use crate::error::SmootherError;
use crate::graph::{Factor, Key, Value, Values};

/// Fixed-lag smoother backend.
///
/// Implementations own their marginalization policy; the timestamp map
/// exposes which keys are still inside the lag window, which the
/// optimization layer uses to drop propagations that fell off the
/// horizon.
pub trait Smoother: Send {
    /// Feed one graph increment and re-solve.
    fn update(
        &mut self,
        graph: &[Factor],
        values: &Values,
        timestamps: &HashMap<Key, f64>,
    ) -> Result<(), SmootherError>;

    /// Solved estimate for a key, `None` once it has been marginalized
    /// out (or was never added).
    fn calculate_estimate(&self, key: Key) -> Option<Value>;

    /// Timestamps of the keys still inside the lag window.
    fn timestamps(&self) -> &HashMap<Key, f64>;
}
