//! Threaded optimization layer on top of the smoother.

mod coordinator;
mod timing;

pub use coordinator::OptimizationCoordinator;
pub use timing::{record, Timing, TimingMap};
