pub mod preintegration;
pub mod sample;

pub use preintegration::{PreintegratedState, Preintegrator};
pub use sample::{GRAVITY, ImuBias, ImuNoise, ImuSample};
