//! Threaded optimization cycle around the fixed-lag smoother.
//!
//! The coordinator owns the graph builder and the smoother, runs each
//! solve on a worker thread, and reconciles the solved window with the
//! live propagation queue when the caller collects the result. At most
//! one solve is in flight and at most one uncollected result is
//! buffered.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::graph::{FactorGraphBuilder, GraphIncrement, Key, NoiseModel, Value};
use crate::propagation::Propagation;
use crate::smoother::Smoother;
use crate::state::{NavState, State};

use super::timing::{record, TimingMap};

/// Solver output buffered between a solve and its collection.
#[derive(Default)]
struct ResultBundle {
    new_result: bool,
    propagations: VecDeque<Propagation>,
    timing: TimingMap,
}

/// Runs the smoother on a worker thread and keeps the propagation
/// queue consistent with its solutions.
pub struct OptimizationCoordinator {
    builder: FactorGraphBuilder,
    smoother: Arc<Mutex<Box<dyn Smoother>>>,
    running: Arc<AtomicBool>,
    shared: Arc<Mutex<ResultBundle>>,
    worker: Option<JoinHandle<()>>,
}

impl OptimizationCoordinator {
    pub fn new(smoother: Box<dyn Smoother>) -> Self {
        Self {
            builder: FactorGraphBuilder::new(),
            smoother: Arc::new(Mutex::new(smoother)),
            running: Arc::new(AtomicBool::new(false)),
            shared: Arc::new(Mutex::new(ResultBundle::default())),
            worker: None,
        }
    }

    /// Whether a solve is currently executing on the worker thread.
    pub fn is_solving(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn pending_increment(&self) -> &GraphIncrement {
        self.builder.pending()
    }

    /// Swap the smoother backend. Refused while a solve is in flight or
    /// a result is awaiting collection.
    pub fn set_smoother(&mut self, smoother: Box<dyn Smoother>) -> bool {
        if self.is_solving() || self.worker.is_some() {
            warn!("optimization in flight, refusing to swap smoother");
            return false;
        }
        *self.smoother.lock() = smoother;
        true
    }

    pub fn add_prior_factor(
        &mut self,
        propagation: &Propagation,
        pose_noise: &NoiseModel,
        vel_noise: &NoiseModel,
        bias_noise: &NoiseModel,
    ) {
        self.builder
            .add_prior_factor(propagation, pose_noise, vel_noise, bias_noise);
    }

    pub fn add_radar_factor(
        &mut self,
        to: &mut Propagation,
        from: &Propagation,
        doppler_noise: &NoiseModel,
        track_noise: &NoiseModel,
    ) {
        self.builder
            .add_radar_factor(to, from, doppler_noise, track_noise);
    }

    pub fn add_baro_factor(&mut self, propagation: &mut Propagation, noise: &NoiseModel) {
        self.builder.add_baro_factor(propagation, noise);
    }

    /// Kick off one solve over the accumulated increment.
    ///
    /// `queue` is the live propagation chain queue; the worker operates
    /// on a snapshot and never touches the caller's copy. Returns false
    /// without consuming the increment if a previous cycle is still
    /// open.
    pub fn solve(&mut self, queue: &VecDeque<Propagation>) -> bool {
        if self.is_solving() || self.worker.is_some() {
            warn!("previous optimization cycle still open, skipping solve");
            return false;
        }

        let increment = self.builder.take_increment();
        let propagations: VecDeque<Propagation> = queue.clone();

        let smoother = Arc::clone(&self.smoother);
        let running = Arc::clone(&self.running);
        let shared = Arc::clone(&self.shared);

        self.running.store(true, Ordering::SeqCst);
        self.worker = Some(thread::spawn(move || {
            solve_threaded(smoother, shared, running, increment, propagations);
        }));
        true
    }

    /// Collect the latest solve, reconciling `queue` with the solved
    /// window and copying timing statistics into `timing`.
    ///
    /// Returns false while the solver is still running, when no solve
    /// was started, or when the cycle was forfeited by a solver error.
    pub fn get_result(&mut self, queue: &mut VecDeque<Propagation>, timing: &mut TimingMap) -> bool {
        if self.is_solving() {
            return false;
        }
        let Some(worker) = self.worker.take() else {
            debug!("no optimization cycle to collect");
            return false;
        };
        if worker.join().is_err() {
            error!("optimization worker panicked");
            return false;
        }

        let mut bundle = self.shared.lock();
        if !bundle.new_result {
            debug!("optimization cycle produced no result");
            return false;
        }
        bundle.new_result = false;
        let solved = std::mem::take(&mut bundle.propagations);

        let stamp = queue
            .back()
            .and_then(|p| p.latest_state())
            .map(|s| s.timestamp())
            .unwrap_or(0.0);

        // Drop chains that fell off the solved window.
        let start = Instant::now();
        if let Some(front) = solved.front() {
            while queue
                .front()
                .is_some_and(|p| p.first_node_idx() < front.first_node_idx())
            {
                queue.pop_front();
            }
        }
        record(&mut bundle.timing, "dequeueCleanup", start.elapsed(), stamp);

        // Replace chains the solver saw; chains split off while it ran
        // are repropagated from their updated predecessor.
        let start = Instant::now();
        let mut copied = 0usize;
        for i in 0..queue.len() {
            let key = (queue[i].first_node_idx(), queue[i].last_node_idx());
            if let Some(updated) = solved
                .iter()
                .find(|p| (p.first_node_idx(), p.last_node_idx()) == key)
            {
                queue[i] = updated.clone();
                copied += 1;
            }
        }
        record(
            &mut bundle.timing,
            "copyCachedPropagations",
            start.elapsed(),
            stamp,
        );

        let start = Instant::now();
        for i in 0..queue.len() {
            let key = (queue[i].first_node_idx(), queue[i].last_node_idx());
            let seen = solved
                .iter()
                .any(|p| (p.first_node_idx(), p.last_node_idx()) == key);
            if seen {
                continue;
            }
            if i == 0 {
                error!("newest solved chain missing from queue, leaving chain untouched");
                continue;
            }
            let Some(anchor) = queue[i - 1].latest_state().cloned() else {
                error!("predecessor chain empty, cannot repropagate successor");
                continue;
            };
            if let Err(err) = queue[i].repropagate(anchor) {
                error!(%err, "failed to repropagate chain split during solve");
            }
        }
        record(
            &mut bundle.timing,
            "repropagateNewPropagations",
            start.elapsed(),
            stamp,
        );

        info!(copied, queue_len = queue.len(), "optimization result applied");
        *timing = bundle.timing.clone();
        true
    }
}

/// Worker-thread half of the cycle: update the smoother, then rebuild
/// the snapshot chains from the solved estimates.
fn solve_threaded(
    smoother: Arc<Mutex<Box<dyn Smoother>>>,
    shared: Arc<Mutex<ResultBundle>>,
    running: Arc<AtomicBool>,
    increment: GraphIncrement,
    mut propagations: VecDeque<Propagation>,
) {
    let stamp = propagations
        .back()
        .and_then(|p| p.latest_state())
        .map(|s| s.timestamp())
        .unwrap_or(0.0);

    let mut smoother = smoother.lock();

    let start = Instant::now();
    if let Err(err) = smoother.update(
        &increment.factors,
        &increment.values,
        &increment.timestamps,
    ) {
        error!(%err, "smoother update failed, forfeiting optimization cycle");
        running.store(false, Ordering::SeqCst);
        return;
    }
    let optimize_elapsed = start.elapsed();

    let start = Instant::now();

    // Oldest key still inside the lag window; an empty map keeps
    // everything.
    let horizon = smoother.timestamps().values().copied().reduce(f64::min);
    if let Some(horizon) = horizon {
        while propagations
            .front()
            .and_then(|p| p.first_state())
            .is_some_and(|s| s.timestamp() < horizon)
        {
            propagations.pop_front();
        }
    }

    for propagation in propagations.iter_mut() {
        let idx = propagation.first_node_idx();
        let Some(anchor) = solved_anchor(smoother.as_ref(), propagation, idx) else {
            debug!(idx, "anchor not in smoother, leaving chain untouched");
            continue;
        };
        if let Err(err) = propagation.repropagate(anchor) {
            error!(%err, idx, "repropagation from solved anchor failed, forfeiting cycle");
            running.store(false, Ordering::SeqCst);
            return;
        }
    }
    let cache_elapsed = start.elapsed();

    let mut bundle = shared.lock();
    bundle.propagations = propagations;
    record(&mut bundle.timing, "optimize", optimize_elapsed, stamp);
    record(&mut bundle.timing, "cachePropagations", cache_elapsed, stamp);
    bundle.new_result = true;
    drop(bundle);

    running.store(false, Ordering::SeqCst);
}

/// Rebuild a chain's anchor state from the solved estimates, keeping
/// the sample, frame id and baro bias of the existing anchor.
fn solved_anchor(
    smoother: &dyn Smoother,
    propagation: &Propagation,
    idx: u64,
) -> Option<State> {
    let old = propagation.first_state()?;

    let Some(Value::Pose(pose)) = smoother.calculate_estimate(Key::Pose(idx)) else {
        return None;
    };
    let Some(Value::Velocity(velocity)) = smoother.calculate_estimate(Key::Velocity(idx)) else {
        return None;
    };
    let Some(Value::Bias(bias)) = smoother.calculate_estimate(Key::Bias(idx)) else {
        return None;
    };

    let baro_height_bias = match smoother.calculate_estimate(Key::HeightBias(idx)) {
        Some(Value::Height(h)) => Some(h),
        _ => old.baro_height_bias,
    };

    let mut integrator = old.integrator.clone();
    integrator.reset_integration_and_set_bias(bias);

    let nav = NavState {
        rotation: pose.rotation,
        position: pose.translation,
        velocity,
    };
    Some(State::new(
        old.odom_frame_id.clone(),
        nav,
        old.imu,
        integrator,
        baro_height_bias,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Values;
    use crate::imu::{GRAVITY, ImuBias, ImuNoise, ImuSample, Preintegrator};
    use crate::propagation::NodeIndexCounter;
    use crate::smoother::testing::StubSmoother;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use std::time::Duration;

    fn hover_sample(t: f64) -> ImuSample {
        ImuSample::new(t, -GRAVITY, Vector3::zeros())
    }

    fn open_chain(t0: f64, node_idx: u64) -> Propagation {
        let integrator = Preintegrator::new(ImuBias::zero(), ImuNoise::default());
        let initial = State::new(
            "odom",
            NavState::identity(),
            hover_sample(t0),
            integrator,
            None,
        );
        let mut prop = Propagation::new(initial, node_idx, None);
        prop.add_measurement(hover_sample(t0 + 0.5)).unwrap();
        prop.add_measurement(hover_sample(t0 + 1.0)).unwrap();
        prop
    }

    fn wait_for_solve(coordinator: &OptimizationCoordinator) {
        while coordinator.is_solving() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn noises() -> (NoiseModel, NoiseModel, NoiseModel) {
        (
            NoiseModel::isotropic(6, 0.1),
            NoiseModel::isotropic(3, 0.1),
            NoiseModel::isotropic(6, 0.01),
        )
    }

    #[test]
    fn get_result_before_solve_returns_false() {
        let mut coordinator = OptimizationCoordinator::new(Box::new(StubSmoother::new()));
        let mut queue = VecDeque::new();
        let mut timing = TimingMap::new();
        assert!(!coordinator.get_result(&mut queue, &mut timing));
    }

    #[test]
    fn second_solve_is_refused_until_collection() {
        let mut coordinator = OptimizationCoordinator::new(Box::new(StubSmoother::new()));
        let prop = open_chain(0.0, 0);
        let (pose_n, vel_n, bias_n) = noises();
        coordinator.add_prior_factor(&prop, &pose_n, &vel_n, &bias_n);

        let queue: VecDeque<Propagation> = VecDeque::from([prop.clone()]);
        assert!(coordinator.solve(&queue));

        // Queue more work; the open cycle must not swallow it.
        coordinator.add_prior_factor(&prop, &pose_n, &vel_n, &bias_n);
        assert!(!coordinator.solve(&queue));
        assert!(!coordinator.pending_increment().is_empty());

        wait_for_solve(&coordinator);
        let mut live = queue;
        let mut timing = TimingMap::new();
        assert!(coordinator.get_result(&mut live, &mut timing));
        assert!(coordinator.solve(&live));
        wait_for_solve(&coordinator);
        coordinator.get_result(&mut live, &mut timing);
    }

    #[test]
    fn solved_anchor_is_applied_to_queue() {
        let mut smoother = StubSmoother::new();
        // Solver moved the anchor away from its seeded value.
        let shifted = crate::geometry::SE3::new(
            nalgebra::UnitQuaternion::identity(),
            Vector3::new(3.0, -1.0, 0.5),
        );
        smoother.force_estimate(Key::Pose(0), Value::Pose(shifted));
        smoother.force_estimate(Key::Velocity(0), Value::Velocity(Vector3::new(0.2, 0.0, 0.0)));
        smoother.force_estimate(Key::Bias(0), Value::Bias(ImuBias::zero()));

        let mut coordinator = OptimizationCoordinator::new(Box::new(smoother));
        let prop = open_chain(0.0, 0);
        let (pose_n, vel_n, bias_n) = noises();
        coordinator.add_prior_factor(&prop, &pose_n, &vel_n, &bias_n);

        let mut queue = VecDeque::from([prop]);
        assert!(coordinator.solve(&queue));
        wait_for_solve(&coordinator);

        let mut timing = TimingMap::new();
        assert!(coordinator.get_result(&mut queue, &mut timing));

        let anchor = queue[0].first_state().unwrap();
        assert_relative_eq!(anchor.position.x, 3.0, epsilon = 1e-12);
        assert_relative_eq!(anchor.velocity.x, 0.2, epsilon = 1e-12);
        // Hovering chain keeps the anchor velocity throughout.
        let latest = queue[0].latest_state().unwrap();
        assert_relative_eq!(latest.velocity.x, 0.2, epsilon = 1e-9);
        assert!(timing.contains_key("optimize"));
        assert!(timing.contains_key("cachePropagations"));
        assert!(timing.contains_key("dequeueCleanup"));
    }

    #[test]
    fn chain_split_during_solve_is_repropagated() {
        let mut smoother = StubSmoother::new();
        smoother.force_estimate(
            Key::Pose(0),
            Value::Pose(crate::geometry::SE3::new(
                nalgebra::UnitQuaternion::identity(),
                Vector3::new(1.0, 0.0, 0.0),
            )),
        );
        smoother.force_estimate(Key::Velocity(0), Value::Velocity(Vector3::zeros()));
        smoother.force_estimate(Key::Bias(0), Value::Bias(ImuBias::zero()));

        let mut coordinator = OptimizationCoordinator::new(Box::new(smoother));
        let prop = open_chain(0.0, 0);
        let (pose_n, vel_n, bias_n) = noises();
        coordinator.add_prior_factor(&prop, &pose_n, &vel_n, &bias_n);

        let mut queue = VecDeque::from([prop]);
        assert!(coordinator.solve(&queue));
        wait_for_solve(&coordinator);

        // A split lands while the solver runs: the snapshot never saw
        // these two chains.
        let mut counter = NodeIndexCounter::new();
        counter.advance();
        let (to, from) = queue.pop_front().unwrap().split(0.5, &mut counter).unwrap();
        queue.push_back(to);
        queue.push_back(from);

        let mut timing = TimingMap::new();
        assert!(coordinator.get_result(&mut queue, &mut timing));
        // Neither split half matched the snapshot; the first is left
        // untouched, the second is re-anchored on it.
        assert_eq!(queue.len(), 2);
        let boundary = queue[0].latest_state().unwrap().clone();
        let resumed = queue[1].first_state().unwrap();
        assert_eq!(boundary.position, resumed.position);
        assert!(timing.contains_key("repropagateNewPropagations"));
    }

    #[test]
    fn solver_failure_forfeits_cycle() {
        let mut smoother = StubSmoother::new();
        smoother.fail_next_update = true;

        let mut coordinator = OptimizationCoordinator::new(Box::new(smoother));
        let prop = open_chain(0.0, 0);
        let (pose_n, vel_n, bias_n) = noises();
        coordinator.add_prior_factor(&prop, &pose_n, &vel_n, &bias_n);

        let mut queue = VecDeque::from([prop]);
        assert!(coordinator.solve(&queue));
        wait_for_solve(&coordinator);

        let mut timing = TimingMap::new();
        assert!(!coordinator.get_result(&mut queue, &mut timing));
        assert_eq!(queue.len(), 1);

        // The failed cycle is closed; the next solve is accepted.
        assert!(coordinator.solve(&queue));
        wait_for_solve(&coordinator);
        assert!(coordinator.get_result(&mut queue, &mut timing));
    }

    #[test]
    fn set_smoother_refused_while_cycle_open() {
        let mut coordinator = OptimizationCoordinator::new(Box::new(StubSmoother::new()));
        let queue = VecDeque::from([open_chain(0.0, 0)]);
        assert!(coordinator.solve(&queue));
        assert!(!coordinator.set_smoother(Box::new(StubSmoother::new())));

        wait_for_solve(&coordinator);
        let mut live = queue;
        let mut timing = TimingMap::new();
        coordinator.get_result(&mut live, &mut timing);
        assert!(coordinator.set_smoother(Box::new(StubSmoother::new())));
    }

    #[test]
    fn values_are_passed_through_to_smoother() {
        // Sanity check on the stub itself.
        let mut stub = StubSmoother::new();
        let mut values = Values::new();
        values.insert(Key::HeightBias(0), Value::Height(2.0));
        let mut stamps = std::collections::HashMap::new();
        stamps.insert(Key::HeightBias(0), 1.0);
        stub.update(&[], &values, &stamps).unwrap();
        assert_eq!(
            stub.calculate_estimate(Key::HeightBias(0)),
            Some(Value::Height(2.0))
        );
    }
}
