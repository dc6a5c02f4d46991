//! Radar-inertial odometry core.
//!
//! Fuses high-rate IMU samples with sparse radar scans and barometric
//! heights into a sliding-window pose/velocity/bias estimate:
//! - [`Propagation`] keeps a deterministic IMU-preintegration chain
//!   between two graph node indices and supports splitting at radar
//!   event times and replay from updated anchors.
//! - [`FactorGraphBuilder`] turns split points and their attached radar
//!   detections, tracked landmarks and baro heights into a pending
//!   factor-graph increment.
//! - [`OptimizationCoordinator`] runs the fixed-lag smoother in a
//!   background thread and merges solved states back into the live
//!   chain without blocking the prediction path.

pub mod baro;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod imu;
pub mod optimization;
pub mod propagation;
pub mod radar;
pub mod smoother;
pub mod state;

pub use error::{PropagationError, SmootherError};
pub use geometry::SE3;
pub use graph::{Factor, FactorGraphBuilder, GraphIncrement, Key, NoiseModel, Value, Values};
pub use imu::{ImuBias, ImuNoise, ImuSample, PreintegratedState, Preintegrator};
pub use optimization::{OptimizationCoordinator, Timing, TimingMap};
pub use propagation::{NodeIndexCounter, Propagation};
pub use radar::{RadarDetection, Track, TrackHandle};
pub use smoother::Smoother;
pub use state::{NavState, State};
