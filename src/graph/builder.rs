//! Incremental factor-graph construction from closed propagations.
//!
//! The builder accumulates factors, initial values and key timestamps
//! into a [`GraphIncrement`] between optimization cycles. Measurement
//! annotations are taken off the propagation as they are consumed, so a
//! chain handed in twice contributes each measurement only once.

use std::collections::HashMap;
use std::mem;

use tracing::{debug, error, info, warn};

use crate::propagation::Propagation;

use super::factor::Factor;
use super::key::Key;
use super::noise::NoiseModel;
use super::values::{Value, Values};

/// Detections closer than this to the radar origin carry no usable
/// direction and are dropped before Doppler factors are built (m).
pub const MIN_DOPPLER_RANGE: f64 = 0.1;

/// Everything queued for the next smoother update.
#[derive(Debug, Clone, Default)]
pub struct GraphIncrement {
    pub factors: Vec<Factor>,
    pub values: Values,
    pub timestamps: HashMap<Key, f64>,
}

impl GraphIncrement {
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty() && self.values.is_empty()
    }

    /// Number of queued factors.
    pub fn len(&self) -> usize {
        self.factors.len()
    }
}

/// Accumulates the graph increment between optimization cycles.
#[derive(Debug, Default)]
pub struct FactorGraphBuilder {
    increment: GraphIncrement,
}

impl FactorGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &GraphIncrement {
        &self.increment
    }

    /// Hand the accumulated increment to the solver, leaving the
    /// builder empty for the next cycle.
    pub fn take_increment(&mut self) -> GraphIncrement {
        mem::take(&mut self.increment)
    }

    /// Anchor the chain's first node with pose, velocity and bias
    /// priors, seeding their initial values.
    pub fn add_prior_factor(
        &mut self,
        propagation: &Propagation,
        pose_noise: &NoiseModel,
        vel_noise: &NoiseModel,
        bias_noise: &NoiseModel,
    ) {
        let Some(state) = propagation.first_state() else {
            error!("empty propagation, skipping prior factor");
            return;
        };
        let idx = propagation.first_node_idx();
        let t = state.timestamp();

        let pose = Value::Pose(state.pose());
        let vel = Value::Velocity(state.velocity);
        let bias = Value::Bias(state.bias());

        self.seed(Key::Pose(idx), pose.clone(), t);
        self.seed(Key::Velocity(idx), vel.clone(), t);
        self.seed(Key::Bias(idx), bias.clone(), t);

        self.increment.factors.push(Factor::Prior {
            key: Key::Pose(idx),
            prior: pose,
            noise: pose_noise.clone(),
        });
        self.increment.factors.push(Factor::Prior {
            key: Key::Velocity(idx),
            prior: vel,
            noise: vel_noise.clone(),
        });
        self.increment.factors.push(Factor::Prior {
            key: Key::Bias(idx),
            prior: bias,
            noise: bias_noise.clone(),
        });
    }

    /// Tie the chain's two nodes with its preintegrated motion and seed
    /// the closing node's values from the chain's prediction.
    ///
    /// The chain must be closed; an open chain has no second node yet.
    pub fn add_inertial_factor(&mut self, propagation: &Propagation) {
        let Some(last_idx) = propagation.last_node_idx() else {
            debug!("propagation still open, skipping inertial factor");
            return;
        };
        let Some(state) = propagation.latest_state() else {
            error!("empty propagation, skipping inertial factor");
            return;
        };
        let first_idx = propagation.first_node_idx();
        let preint = *state.integrator.delta();
        let t = state.timestamp();

        self.seed(Key::Pose(last_idx), Value::Pose(state.pose()), t);
        self.seed(Key::Velocity(last_idx), Value::Velocity(state.velocity), t);
        self.seed(Key::Bias(last_idx), Value::Bias(state.bias()), t);

        self.increment.factors.push(Factor::CombinedImu {
            pose_i: Key::Pose(first_idx),
            vel_i: Key::Velocity(first_idx),
            bias_i: Key::Bias(first_idx),
            pose_j: Key::Pose(last_idx),
            vel_j: Key::Velocity(last_idx),
            bias_j: Key::Bias(last_idx),
            preint,
            noise: inertial_noise(state.integrator.noise(), preint.dt),
        });
    }

    /// Build one Doppler factor per detection attached to the chain's
    /// closing split, consuming the detections.
    pub fn add_doppler_factors(&mut self, propagation: &mut Propagation, noise: &NoiseModel) {
        let Some(last_idx) = propagation.last_node_idx() else {
            error!("propagation still open, skipping Doppler factors");
            return;
        };
        if propagation.radar_detections.is_none() {
            info!("no radar detections attached, skipping Doppler factors");
            return;
        }
        let Some(b_t_br) = propagation.b_t_br else {
            debug!("radar mounting unknown, skipping Doppler factors");
            return;
        };
        let Some(state) = propagation.latest_state() else {
            error!("empty propagation, skipping Doppler factors");
            return;
        };
        let body_angular_rate = state.imu.gyro;

        let detections = propagation
            .radar_detections
            .take()
            .unwrap_or_default();
        for detection in detections {
            let Some(direction) = detection.direction() else {
                debug!("zero-range detection, skipping Doppler factor");
                continue;
            };
            if detection.range() < MIN_DOPPLER_RANGE {
                debug!(range = detection.range(), "detection below minimum range, skipping Doppler factor");
                continue;
            }
            self.increment.factors.push(Factor::Doppler {
                pose: Key::Pose(last_idx),
                vel: Key::Velocity(last_idx),
                bias: Key::Bias(last_idx),
                direction,
                doppler: detection.doppler,
                body_angular_rate,
                b_t_br,
                noise: noise.clone(),
            });
        }
    }

    /// Build one bearing/range factor per landmark track attached to
    /// the chain's closing split, consuming the tracks.
    ///
    /// A track's initial value is seeded from the predicted pose the
    /// first time the track appears in any increment.
    pub fn add_bearing_range_factors(&mut self, propagation: &mut Propagation, noise: &NoiseModel) {
        let Some(last_idx) = propagation.last_node_idx() else {
            error!("propagation still open, skipping bearing/range factors");
            return;
        };
        if propagation.radar_tracks.is_none() {
            debug!("no radar tracks attached, skipping bearing/range factors");
            return;
        }
        let Some(b_t_br) = propagation.b_t_br else {
            debug!("radar mounting unknown, skipping bearing/range factors");
            return;
        };
        let Some(state) = propagation.latest_state() else {
            error!("empty propagation, skipping bearing/range factors");
            return;
        };
        let i_t_ir = state.pose().compose(&b_t_br);
        let t = state.timestamp();

        let tracks = propagation.radar_tracks.take().unwrap_or_default();
        for track in tracks {
            let r_p_rt = track.r_p_rt();
            let range = r_p_rt.norm();
            if range < MIN_DOPPLER_RANGE {
                debug!(track = track.id(), "track below minimum range, skipping bearing/range factor");
                continue;
            }
            let key = Key::Landmark(track.id());

            if !track.is_added() {
                self.increment
                    .values
                    .insert(key, Value::Point(i_t_ir.transform(&r_p_rt)));
                track.set_added();
            }
            // The smoother's lag window keys off the latest observation.
            self.increment.timestamps.insert(key, t);

            self.increment.factors.push(Factor::BearingRange {
                pose: Key::Pose(last_idx),
                landmark: key,
                bearing: r_p_rt / range,
                range,
                b_t_br,
                noise: noise.clone(),
            });
        }
    }

    /// Tie the chain's closing node to its barometric height, consuming
    /// the annotation. Needs a tracked height bias on the state.
    pub fn add_baro_factor(&mut self, propagation: &mut Propagation, noise: &NoiseModel) {
        let Some(last_idx) = propagation.last_node_idx() else {
            error!("propagation still open, skipping baro factor");
            return;
        };
        if propagation.baro_height.is_none() {
            debug!("no baro height attached, skipping baro factor");
            return;
        }
        let Some(state) = propagation.latest_state() else {
            error!("empty propagation, skipping baro factor");
            return;
        };
        let Some(bias) = state.baro_height_bias else {
            debug!("no baro height bias tracked, skipping baro factor");
            return;
        };
        let t = state.timestamp();
        let height = propagation.baro_height.take().unwrap_or_default();
        let key = Key::HeightBias(last_idx);

        self.seed(key, Value::Height(bias), t);
        self.increment.factors.push(Factor::BaroHeight {
            pose: Key::Pose(last_idx),
            height_bias: key,
            height,
            noise: noise.clone(),
        });
    }

    /// Full radar update: inertial factor over the closed chain, then
    /// Doppler and bearing/range factors from its annotations.
    ///
    /// `from` is the successor chain and is expected to still be open.
    pub fn add_radar_factor(
        &mut self,
        to: &mut Propagation,
        from: &Propagation,
        doppler_noise: &NoiseModel,
        track_noise: &NoiseModel,
    ) {
        if from.last_node_idx().is_some() {
            warn!("successor propagation already closed at radar update");
        }
        self.add_inertial_factor(to);
        // Normally a silent skip; covers the rare already-closed successor.
        self.add_inertial_factor(from);
        self.add_doppler_factors(to, doppler_noise);
        self.add_bearing_range_factors(to, track_noise);
    }

    fn seed(&mut self, key: Key, value: Value, timestamp: f64) {
        if self.increment.values.insert(key, value) {
            self.increment.timestamps.insert(key, timestamp);
        }
    }
}

/// 15-dim diagonal noise for an inertial factor, scaled from the
/// integrator's densities over its window.
fn inertial_noise(noise: crate::imu::ImuNoise, dt: f64) -> NoiseModel {
    let sqrt_dt = dt.max(f64::EPSILON).sqrt();
    let sigma_rot = noise.sigma_gyro * sqrt_dt;
    let sigma_vel = noise.sigma_accel * sqrt_dt;
    let sigma_pos = 0.5 * noise.sigma_accel * dt * sqrt_dt;
    let sigma_bg = noise.sigma_gyro_walk * sqrt_dt;
    let sigma_ba = noise.sigma_accel_walk * sqrt_dt;

    let mut sigmas = Vec::with_capacity(15);
    sigmas.extend_from_slice(&[sigma_rot; 3]);
    sigmas.extend_from_slice(&[sigma_vel; 3]);
    sigmas.extend_from_slice(&[sigma_pos; 3]);
    sigmas.extend_from_slice(&[sigma_bg; 3]);
    sigmas.extend_from_slice(&[sigma_ba; 3]);
    NoiseModel::diagonal(sigmas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use crate::imu::{GRAVITY, ImuBias, ImuNoise, ImuSample, Preintegrator};
    use crate::propagation::NodeIndexCounter;
    use crate::radar::{RadarDetection, Track};
    use crate::state::{NavState, State};
    use nalgebra::Vector3;

    fn hover_sample(t: f64) -> ImuSample {
        ImuSample::new(t, -GRAVITY, Vector3::zeros())
    }

    fn open_chain(baro_bias: Option<f64>) -> Propagation {
        let integrator = Preintegrator::new(ImuBias::zero(), ImuNoise::default());
        let initial = State::new(
            "odom",
            NavState::identity(),
            hover_sample(0.0),
            integrator,
            baro_bias,
        );
        let mut prop = Propagation::new(initial, 0, None);
        prop.add_measurement(hover_sample(0.5)).unwrap();
        prop.add_measurement(hover_sample(1.0)).unwrap();
        prop
    }

    fn closed_chain(baro_bias: Option<f64>) -> Propagation {
        let mut counter = NodeIndexCounter::new();
        counter.advance();
        let (to, _) = open_chain(baro_bias).split(1.0, &mut counter).unwrap();
        to
    }

    #[test]
    fn prior_seeds_values_and_three_factors() {
        let mut builder = FactorGraphBuilder::new();
        let noise6 = NoiseModel::isotropic(6, 0.1);
        let noise3 = NoiseModel::isotropic(3, 0.1);
        builder.add_prior_factor(&open_chain(None), &noise6, &noise3, &noise6);

        let increment = builder.take_increment();
        assert_eq!(increment.len(), 3);
        assert_eq!(increment.values.len(), 3);
        assert!(increment.values.contains(Key::Pose(0)));
        assert!(increment.values.contains(Key::Velocity(0)));
        assert!(increment.values.contains(Key::Bias(0)));
        assert_eq!(increment.timestamps[&Key::Pose(0)], 0.0);
    }

    #[test]
    fn inertial_factor_requires_closed_chain() {
        let mut builder = FactorGraphBuilder::new();
        builder.add_inertial_factor(&open_chain(None));
        assert!(builder.pending().is_empty());

        builder.add_inertial_factor(&closed_chain(None));
        let increment = builder.take_increment();
        assert_eq!(increment.len(), 1);
        assert!(matches!(increment.factors[0], Factor::CombinedImu { .. }));
        // Closing node seeded from the prediction.
        assert!(increment.values.contains(Key::Pose(1)));
        assert!(increment.values.contains(Key::Velocity(1)));
        assert!(increment.values.contains(Key::Bias(1)));
        assert_eq!(increment.timestamps[&Key::Pose(1)], 1.0);
    }

    #[test]
    fn doppler_factors_gate_on_range() {
        let mut prop = closed_chain(None);
        prop.b_t_br = Some(SE3::identity());
        prop.radar_detections = Some(vec![
            RadarDetection::new(Vector3::new(0.03, 0.04, 0.0), 0.1), // range 0.05
            RadarDetection::new(Vector3::new(0.3, 0.4, 0.0), 0.1),   // range 0.5
        ]);

        let mut builder = FactorGraphBuilder::new();
        builder.add_doppler_factors(&mut prop, &NoiseModel::isotropic(1, 0.05));

        let increment = builder.take_increment();
        assert_eq!(increment.len(), 1);
        assert!(matches!(increment.factors[0], Factor::Doppler { .. }));
        // Detections are consumed even when gated out.
        assert!(prop.radar_detections.is_none());
    }

    #[test]
    fn doppler_factors_need_mounting_transform() {
        let mut prop = closed_chain(None);
        prop.radar_detections = Some(vec![RadarDetection::new(Vector3::new(1.0, 0.0, 0.0), 0.1)]);

        let mut builder = FactorGraphBuilder::new();
        builder.add_doppler_factors(&mut prop, &NoiseModel::isotropic(1, 0.05));
        assert!(builder.pending().is_empty());
        // Without a mounting transform the detections stay attached.
        assert!(prop.radar_detections.is_some());
    }

    #[test]
    fn bearing_range_factors_need_mounting_transform() {
        let mut prop = closed_chain(None);
        prop.radar_tracks = Some(vec![Track::new(4, Vector3::new(2.0, 0.0, 0.0))]);

        let mut builder = FactorGraphBuilder::new();
        builder.add_bearing_range_factors(&mut prop, &NoiseModel::isotropic(3, 0.1));
        assert!(builder.pending().is_empty());
        // Without a mounting transform the tracks stay attached.
        assert!(prop.radar_tracks.is_some());
    }

    #[test]
    fn landmark_value_is_seeded_once() {
        let track = Track::new(7, Vector3::new(3.0, 1.0, 0.0));
        let noise = NoiseModel::isotropic(3, 0.1);
        let mut builder = FactorGraphBuilder::new();

        let mut first = closed_chain(None);
        first.b_t_br = Some(SE3::identity());
        first.radar_tracks = Some(vec![track.clone()]);
        builder.add_bearing_range_factors(&mut first, &noise);

        let mut second = closed_chain(None);
        second.b_t_br = Some(SE3::identity());
        second.radar_tracks = Some(vec![track.clone()]);
        builder.add_bearing_range_factors(&mut second, &noise);

        let increment = builder.take_increment();
        assert_eq!(increment.len(), 2);
        assert_eq!(increment.values.len(), 1);
        assert!(increment.values.contains(Key::Landmark(7)));
        assert!(track.is_added());
        // Timestamp refreshed on every observation.
        assert!(increment.timestamps.contains_key(&Key::Landmark(7)));
    }

    #[test]
    fn baro_factor_needs_annotation_and_bias() {
        let noise = NoiseModel::isotropic(1, 0.5);
        let mut builder = FactorGraphBuilder::new();

        // Annotation present but no tracked bias.
        let mut no_bias = closed_chain(None);
        no_bias.baro_height = Some(10.0);
        builder.add_baro_factor(&mut no_bias, &noise);
        assert!(builder.pending().is_empty());

        // Bias tracked but no annotation.
        let mut no_height = closed_chain(Some(1.5));
        builder.add_baro_factor(&mut no_height, &noise);
        assert!(builder.pending().is_empty());

        let mut both = closed_chain(Some(1.5));
        both.baro_height = Some(10.0);
        builder.add_baro_factor(&mut both, &noise);
        let increment = builder.take_increment();
        assert_eq!(increment.len(), 1);
        assert_eq!(increment.values.height(Key::HeightBias(1)), Some(1.5));
        assert!(both.baro_height.is_none());
    }

    #[test]
    fn radar_factor_combines_inertial_and_measurements() {
        let mut counter = NodeIndexCounter::new();
        counter.advance();
        let (mut to, from) = open_chain(None).split(1.0, &mut counter).unwrap();
        to.b_t_br = Some(SE3::identity());
        to.radar_detections = Some(vec![RadarDetection::new(Vector3::new(2.0, 0.0, 0.0), -0.3)]);
        to.radar_tracks = Some(vec![Track::new(1, Vector3::new(2.0, 0.0, 0.0))]);

        let mut builder = FactorGraphBuilder::new();
        builder.add_radar_factor(
            &mut to,
            &from,
            &NoiseModel::isotropic(1, 0.05),
            &NoiseModel::isotropic(3, 0.1),
        );

        let increment = builder.take_increment();
        assert_eq!(increment.len(), 3);
        assert!(increment.values.contains(Key::Pose(1)));
        assert!(increment.values.contains(Key::Landmark(1)));
        assert!(to.radar_detections.is_none());
        assert!(to.radar_tracks.is_none());
    }
}
