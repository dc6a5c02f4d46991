//! Immutable navigation-state snapshot along a propagation chain.

use nalgebra::{UnitQuaternion, Vector3};

use crate::geometry::SE3;
use crate::imu::{ImuBias, ImuSample, Preintegrator};

/// Pose and velocity bundle used to anchor and predict propagations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavState {
    pub rotation: UnitQuaternion<f64>,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

impl NavState {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
        }
    }

    pub fn pose(&self) -> SE3 {
        SE3::new(self.rotation, self.position)
    }
}

/// One node of a propagation chain: the navigation state predicted up to
/// an IMU sample, the sample itself, and the preintegrator accumulated
/// since the chain's anchor.
///
/// States are created by integrating one sample onto a predecessor and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    /// Frame id of the odometry frame this state is expressed in.
    pub odom_frame_id: String,
    /// Body position in the odometry frame.
    pub position: Vector3<f64>,
    /// Body orientation in the odometry frame.
    pub orientation: UnitQuaternion<f64>,
    /// Body velocity in the odometry frame.
    pub velocity: Vector3<f64>,
    /// Latest integrated IMU sample.
    pub imu: ImuSample,
    /// Preintegration since the chain's anchor state.
    pub integrator: Preintegrator,
    /// Barometer height bias estimate, if one is being tracked.
    pub baro_height_bias: Option<f64>,
}

impl State {
    pub fn new(
        odom_frame_id: impl Into<String>,
        nav: NavState,
        imu: ImuSample,
        integrator: Preintegrator,
        baro_height_bias: Option<f64>,
    ) -> Self {
        Self {
            odom_frame_id: odom_frame_id.into(),
            position: nav.position,
            orientation: nav.rotation,
            velocity: nav.velocity,
            imu,
            integrator,
            baro_height_bias,
        }
    }

    pub fn nav_state(&self) -> NavState {
        NavState {
            rotation: self.orientation,
            position: self.position,
            velocity: self.velocity,
        }
    }

    pub fn pose(&self) -> SE3 {
        SE3::new(self.orientation, self.position)
    }

    /// Bias estimate carried by the state's integrator.
    pub fn bias(&self) -> ImuBias {
        self.integrator.bias_hat()
    }

    pub fn timestamp(&self) -> f64 {
        self.imu.timestamp_s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imu::ImuNoise;

    #[test]
    fn accessors_reflect_construction() {
        let nav = NavState {
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.0, 0.5),
            position: Vector3::new(1.0, -2.0, 0.3),
            velocity: Vector3::new(0.1, 0.2, 0.0),
        };
        let imu = ImuSample::new(4.2, Vector3::zeros(), Vector3::zeros());
        let bias = ImuBias::new(Vector3::new(0.01, 0.0, 0.0), Vector3::zeros());
        let state = State::new(
            "odom",
            nav,
            imu,
            Preintegrator::new(bias, ImuNoise::default()),
            Some(1.5),
        );

        assert_eq!(state.timestamp(), 4.2);
        assert_eq!(state.nav_state(), nav);
        assert_eq!(state.bias(), bias);
        assert_eq!(state.pose().translation, nav.position);
        assert_eq!(state.baro_height_bias, Some(1.5));
    }
}
