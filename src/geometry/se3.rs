//! Rigid-body transform used for body poses and sensor mountings.

use nalgebra::{UnitQuaternion, Vector3};

/// SE(3) transform: rotation followed by translation.
///
/// Poses are written `I_T_IB` (body in inertial/odometry frame) and
/// sensor extrinsics `B_T_BR` (radar in body frame), following the
/// `T_target_source` naming convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Inverse transform: `(T^-1) * T = identity`.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Composition `self * other`, applying `other` first.
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Map a point from the source frame of this transform to its target frame.
    pub fn transform(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }

    /// 6-DoF difference `[log(R_a^T R_b), p_b - p_a]`, used by prior residuals.
    pub fn local_coordinates(&self, other: &Self) -> nalgebra::Vector6<f64> {
        let rot_err = (self.rotation.inverse() * other.rotation).scaled_axis();
        let trans_err = other.translation - self.translation;
        nalgebra::Vector6::new(
            rot_err.x, rot_err.y, rot_err.z, trans_err.x, trans_err.y, trans_err.z,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn compose_with_inverse_is_identity() {
        let t = SE3::new(
            UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
            Vector3::new(1.0, 2.0, 3.0),
        );
        let id = t.compose(&t.inverse());
        assert_relative_eq!(id.translation.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(id.rotation.angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn transform_rotates_then_translates() {
        let t = SE3::new(
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2),
            Vector3::new(1.0, 0.0, 0.0),
        );
        let p = t.transform(&Vector3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Vector3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn local_coordinates_of_identity_pair_is_zero() {
        let t = SE3::new(
            UnitQuaternion::from_euler_angles(0.2, 0.1, -0.4),
            Vector3::new(-1.0, 0.5, 2.0),
        );
        assert_relative_eq!(t.local_coordinates(&t).norm(), 0.0, epsilon = 1e-12);
    }
}
