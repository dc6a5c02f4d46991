//! Factor definitions and residual evaluation.
//!
//! Factors are plain data handed to the opaque smoother; they can also
//! evaluate their own residual against a [`Values`] assignment so
//! smoother implementations and tests can exercise them.

use nalgebra::{DVector, Vector3};

use crate::geometry::SE3;
use crate::imu::{GRAVITY, PreintegratedState};

use super::key::Key;
use super::noise::NoiseModel;
use super::values::{Value, Values};

/// One residual block of the graph increment.
#[derive(Debug, Clone)]
pub enum Factor {
    /// Anchors a single variable at a prior value.
    Prior {
        key: Key,
        prior: Value,
        noise: NoiseModel,
    },

    /// Ties two nodes through the preintegrated motion between them,
    /// plus a random-walk constraint on the bias pair.
    CombinedImu {
        pose_i: Key,
        vel_i: Key,
        bias_i: Key,
        pose_j: Key,
        vel_j: Key,
        bias_j: Key,
        preint: PreintegratedState,
        noise: NoiseModel,
    },

    /// Ties the predicted radial velocity at a detection to its
    /// measured Doppler value.
    Doppler {
        pose: Key,
        vel: Key,
        bias: Key,
        /// Unit vector from the radar origin toward the detection.
        direction: Vector3<f64>,
        /// Measured radial velocity.
        doppler: f64,
        /// Raw body angular rate at the split; bias-corrected at
        /// evaluation time through the bias variable.
        body_angular_rate: Vector3<f64>,
        /// Radar mounting in the body frame.
        b_t_br: SE3,
        noise: NoiseModel,
    },

    /// Ties a tracked landmark's position to a bearing/range
    /// observation from the radar.
    BearingRange {
        pose: Key,
        landmark: Key,
        /// Unit bearing toward the landmark in the radar frame.
        bearing: Vector3<f64>,
        /// Measured range (m).
        range: f64,
        b_t_br: SE3,
        noise: NoiseModel,
    },

    /// Ties vertical position plus a height bias to a barometric
    /// height measurement.
    BaroHeight {
        pose: Key,
        height_bias: Key,
        /// Measured height (m).
        height: f64,
        noise: NoiseModel,
    },
}

impl Factor {
    pub fn keys(&self) -> Vec<Key> {
        match self {
            Factor::Prior { key, .. } => vec![*key],
            Factor::CombinedImu {
                pose_i,
                vel_i,
                bias_i,
                pose_j,
                vel_j,
                bias_j,
                ..
            } => vec![*pose_i, *vel_i, *bias_i, *pose_j, *vel_j, *bias_j],
            Factor::Doppler {
                pose, vel, bias, ..
            } => vec![*pose, *vel, *bias],
            Factor::BearingRange { pose, landmark, .. } => vec![*pose, *landmark],
            Factor::BaroHeight {
                pose, height_bias, ..
            } => vec![*pose, *height_bias],
        }
    }

    pub fn noise(&self) -> &NoiseModel {
        match self {
            Factor::Prior { noise, .. }
            | Factor::CombinedImu { noise, .. }
            | Factor::Doppler { noise, .. }
            | Factor::BearingRange { noise, .. }
            | Factor::BaroHeight { noise, .. } => noise,
        }
    }

    /// Residual dimension.
    pub fn dim(&self) -> usize {
        match self {
            Factor::Prior { prior, .. } => match prior {
                Value::Pose(_) => 6,
                Value::Velocity(_) | Value::Point(_) => 3,
                Value::Bias(_) => 6,
                Value::Height(_) => 1,
            },
            Factor::CombinedImu { .. } => 15,
            Factor::Doppler { .. } => 1,
            Factor::BearingRange { .. } => 3,
            Factor::BaroHeight { .. } => 1,
        }
    }

    /// Unwhitened residual, `None` if any connected variable is missing
    /// from `values` or has the wrong kind.
    pub fn error(&self, values: &Values) -> Option<DVector<f64>> {
        match self {
            Factor::Prior { key, prior, .. } => prior_error(*key, prior, values),

            Factor::CombinedImu {
                pose_i,
                vel_i,
                bias_i,
                pose_j,
                vel_j,
                bias_j,
                preint,
                ..
            } => {
                let pose_i = values.pose(*pose_i)?;
                let vel_i = values.velocity(*vel_i)?;
                let bias_i = values.bias(*bias_i)?;
                let pose_j = values.pose(*pose_j)?;
                let vel_j = values.velocity(*vel_j)?;
                let bias_j = values.bias(*bias_j)?;

                let dt = preint.dt;
                let r_i_inv = pose_i.rotation.inverse();

                let r_rot = (preint.delta_rot.inverse()
                    * (r_i_inv * pose_j.rotation))
                    .scaled_axis();
                let r_vel = r_i_inv * (vel_j - vel_i - GRAVITY * dt) - preint.delta_vel;
                let r_pos = r_i_inv
                    * (pose_j.translation
                        - pose_i.translation
                        - vel_i * dt
                        - 0.5 * GRAVITY * dt * dt)
                    - preint.delta_pos;
                let r_bg = bias_j.gyro - bias_i.gyro;
                let r_ba = bias_j.accel - bias_i.accel;

                let mut r = DVector::zeros(15);
                r.fixed_rows_mut::<3>(0).copy_from(&r_rot);
                r.fixed_rows_mut::<3>(3).copy_from(&r_vel);
                r.fixed_rows_mut::<3>(6).copy_from(&r_pos);
                r.fixed_rows_mut::<3>(9).copy_from(&r_bg);
                r.fixed_rows_mut::<3>(12).copy_from(&r_ba);
                Some(r)
            }

            Factor::Doppler {
                pose,
                vel,
                bias,
                direction,
                doppler,
                body_angular_rate,
                b_t_br,
                ..
            } => {
                let pose = values.pose(*pose)?;
                let vel = values.velocity(*vel)?;
                let bias = values.bias(*bias)?;

                let omega = bias.correct_gyro(body_angular_rate);
                // Velocity of the radar origin, first in the body frame
                // (lever arm), then expressed in the radar frame.
                let v_body = pose.rotation.inverse() * vel + omega.cross(&b_t_br.translation);
                let v_radar = b_t_br.rotation.inverse() * v_body;
                // A static target appears to move opposite the sensor.
                let predicted = -direction.dot(&v_radar);

                Some(DVector::from_element(1, predicted - doppler))
            }

            Factor::BearingRange {
                pose,
                landmark,
                bearing,
                range,
                b_t_br,
                ..
            } => {
                let pose = values.pose(*pose)?;
                let landmark = values.point(*landmark)?;

                let i_t_ir = pose.compose(b_t_br);
                let p_radar = i_t_ir.inverse().transform(&landmark);

                let (az_p, el_p, range_p) = spherical(&p_radar)?;
                let (az_m, el_m, _) = spherical(&(bearing * *range))?;

                Some(DVector::from_vec(vec![
                    wrap_angle(az_p - az_m),
                    wrap_angle(el_p - el_m),
                    range_p - range,
                ]))
            }

            Factor::BaroHeight {
                pose,
                height_bias,
                height,
                ..
            } => {
                let pose = values.pose(*pose)?;
                let bias = values.height(*height_bias)?;
                Some(DVector::from_element(1, pose.translation.z + bias - height))
            }
        }
    }

    /// Residual scaled by the factor's noise model.
    pub fn whitened_error(&self, values: &Values) -> Option<DVector<f64>> {
        Some(self.noise().whiten(&self.error(values)?))
    }
}

fn prior_error(key: Key, prior: &Value, values: &Values) -> Option<DVector<f64>> {
    match prior {
        Value::Pose(prior) => {
            let estimate = values.pose(key)?;
            Some(DVector::from_column_slice(
                prior.local_coordinates(&estimate).as_slice(),
            ))
        }
        Value::Velocity(prior) => {
            let estimate = values.velocity(key)?;
            Some(DVector::from_column_slice((estimate - prior).as_slice()))
        }
        Value::Bias(prior) => {
            let estimate = values.bias(key)?;
            let mut r = DVector::zeros(6);
            r.fixed_rows_mut::<3>(0)
                .copy_from(&(estimate.gyro - prior.gyro));
            r.fixed_rows_mut::<3>(3)
                .copy_from(&(estimate.accel - prior.accel));
            Some(r)
        }
        Value::Point(prior) => {
            let estimate = values.point(key)?;
            Some(DVector::from_column_slice((estimate - prior).as_slice()))
        }
        Value::Height(prior) => {
            let estimate = values.height(key)?;
            Some(DVector::from_element(1, estimate - prior))
        }
    }
}

/// Azimuth/elevation/range of a point, `None` at zero range.
fn spherical(p: &Vector3<f64>) -> Option<(f64, f64, f64)> {
    let range = p.norm();
    if range == 0.0 {
        return None;
    }
    let azimuth = p.y.atan2(p.x);
    let elevation = p.z.atan2((p.x * p.x + p.y * p.y).sqrt());
    Some((azimuth, elevation, range))
}

fn wrap_angle(a: f64) -> f64 {
    let mut a = a;
    while a > std::f64::consts::PI {
        a -= 2.0 * std::f64::consts::PI;
    }
    while a < -std::f64::consts::PI {
        a += 2.0 * std::f64::consts::PI;
    }
    a
}
