//! IMU preintegration between two graph nodes.
//!
//! High-rate samples are accumulated into a single relative motion
//! measurement anchored at the chain's first state, so a whole interval
//! can be re-predicted from a new anchor without touching raw samples.

use nalgebra::{UnitQuaternion, Vector3};

use crate::state::NavState;

use super::sample::{ImuBias, ImuNoise, ImuSample, GRAVITY};

/// Preintegrated motion deltas, expressed in the anchor body frame and
/// free of gravity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreintegratedState {
    pub delta_rot: UnitQuaternion<f64>,
    pub delta_vel: Vector3<f64>,
    pub delta_pos: Vector3<f64>,
    pub dt: f64,
}

impl PreintegratedState {
    pub fn identity() -> Self {
        Self {
            delta_rot: UnitQuaternion::identity(),
            delta_vel: Vector3::zeros(),
            delta_pos: Vector3::zeros(),
            dt: 0.0,
        }
    }
}

/// Running preintegrator: bias estimate plus accumulated deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct Preintegrator {
    bias: ImuBias,
    noise: ImuNoise,
    delta: PreintegratedState,
}

impl Preintegrator {
    pub fn new(bias: ImuBias, noise: ImuNoise) -> Self {
        Self {
            bias,
            noise,
            delta: PreintegratedState::identity(),
        }
    }

    /// Bias estimate used while integrating.
    pub fn bias_hat(&self) -> ImuBias {
        self.bias
    }

    pub fn noise(&self) -> ImuNoise {
        self.noise
    }

    pub fn delta(&self) -> &PreintegratedState {
        &self.delta
    }

    /// Clear the integration window, keeping the bias estimate.
    pub fn reset_integration(&mut self) {
        self.delta = PreintegratedState::identity();
    }

    /// Clear the integration window and install a new bias estimate.
    pub fn reset_integration_and_set_bias(&mut self, bias: ImuBias) {
        self.bias = bias;
        self.delta = PreintegratedState::identity();
    }

    /// Integrate one sample's readings held constant over `dt`.
    ///
    /// Callers are responsible for `dt > 0`; the propagation chain
    /// rejects non-monotonic samples before they reach the integrator.
    pub fn integrate(&mut self, sample: &ImuSample, dt: f64) {
        let gyro = self.bias.correct_gyro(&sample.gyro);
        let accel = self.bias.correct_accel(&sample.accel);

        let rot_k = self.delta.delta_rot;
        let accel_anchor = rot_k * accel;

        self.delta.delta_pos += self.delta.delta_vel * dt + 0.5 * accel_anchor * dt * dt;
        self.delta.delta_vel += accel_anchor * dt;
        self.delta.delta_rot = rot_k * UnitQuaternion::from_scaled_axis(gyro * dt);
        self.delta.dt += dt;
    }

    /// Predict the navigation state at the end of the integration window
    /// from the chain's anchor state.
    pub fn predict(&self, anchor: &NavState) -> NavState {
        let dt = self.delta.dt;
        let rotation = anchor.rotation * self.delta.delta_rot;
        let velocity = anchor.velocity + GRAVITY * dt + anchor.rotation * self.delta.delta_vel;
        let position = anchor.position
            + anchor.velocity * dt
            + 0.5 * GRAVITY * dt * dt
            + anchor.rotation * self.delta.delta_pos;
        NavState {
            rotation,
            position,
            velocity,
        }
    }
}
