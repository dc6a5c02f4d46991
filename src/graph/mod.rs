//! Factor-graph building blocks handed to the smoother.

mod builder;
mod factor;
mod key;
mod noise;
mod values;

pub use builder::{FactorGraphBuilder, GraphIncrement, MIN_DOPPLER_RANGE};
pub use factor::Factor;
pub use key::Key;
pub use noise::NoiseModel;
pub use values::{Value, Values};
