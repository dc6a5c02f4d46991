//! Propagation chain: ordered predicted states between two graph nodes.
//!
//! A `Propagation` owns the IMU samples observed between two radar
//! events, together with the states predicted from its anchor. Radar
//! scans and baro samples arrive asynchronously and split the open chain
//! at the event time; after an optimization cycle the whole chain is
//! regenerated from the solved anchor by replaying the buffered samples.

use tracing::{debug, warn};

use crate::error::PropagationError;
use crate::geometry::SE3;
use crate::imu::ImuSample;
use crate::radar::{RadarDetection, TrackHandle};
use crate::state::State;

/// Identifier of one time-indexed set of estimated variables.
pub type NodeIndex = u64;

/// Monotonic counter handing out globally unique node indices.
///
/// Owned by the orchestrating layer and passed to [`Propagation::split`]
/// by reference, so tests can run independent counters.
#[derive(Debug, Clone, Default)]
pub struct NodeIndexCounter {
    next: NodeIndex,
}

impl NodeIndexCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next successful split will be assigned.
    pub fn peek(&self) -> NodeIndex {
        self.next
    }

    /// Allocate the next node index. `split` calls this exactly once
    /// per successful split; the orchestrating layer allocates the very
    /// first chain's anchor index itself.
    pub fn advance(&mut self) -> NodeIndex {
        let idx = self.next;
        self.next += 1;
        idx
    }
}

/// Chain of states with strictly increasing timestamps, anchored at
/// graph node `first_node_idx` and closed at `last_node_idx` once a
/// split has terminated it.
///
/// Per-split annotations (detections, tracks, baro height, radar
/// mounting) ride along until the factor-graph builder consumes them.
#[derive(Debug, Clone)]
pub struct Propagation {
    states: Vec<State>,
    first_node_idx: NodeIndex,
    last_node_idx: Option<NodeIndex>,

    /// Radar-to-body mounting transform, if known for this split.
    pub b_t_br: Option<SE3>,
    /// CFAR detections attached to the split closing this chain.
    pub radar_detections: Option<Vec<RadarDetection>>,
    /// Tracked landmarks attached to the split closing this chain.
    pub radar_tracks: Option<Vec<TrackHandle>>,
    /// Barometric height attached to the split closing this chain.
    pub baro_height: Option<f64>,
}

impl Propagation {
    pub fn new(
        initial_state: State,
        first_node_idx: NodeIndex,
        last_node_idx: Option<NodeIndex>,
    ) -> Self {
        Self::from_states(vec![initial_state], first_node_idx, last_node_idx)
    }

    fn from_states(
        states: Vec<State>,
        first_node_idx: NodeIndex,
        last_node_idx: Option<NodeIndex>,
    ) -> Self {
        Self {
            states,
            first_node_idx,
            last_node_idx,
            b_t_br: None,
            radar_detections: None,
            radar_tracks: None,
            baro_height: None,
        }
    }

    pub fn first_state(&self) -> Option<&State> {
        self.states.first()
    }

    pub fn latest_state(&self) -> Option<&State> {
        self.states.last()
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn first_node_idx(&self) -> NodeIndex {
        self.first_node_idx
    }

    pub fn last_node_idx(&self) -> Option<NodeIndex> {
        self.last_node_idx
    }

    /// Integrate one IMU sample and append the predicted state.
    ///
    /// The sample must be strictly newer than the chain's latest sample;
    /// `dt <= 0` is rejected without mutating the chain. The states
    /// themselves are complete by construction, so the only structural
    /// failure left is an empty chain.
    pub fn add_measurement(&mut self, sample: ImuSample) -> Result<(), PropagationError> {
        let latest = self.states.last().ok_or_else(|| {
            warn!("no initial state, skipping IMU integration");
            PropagationError::EmptyChain
        })?;

        let dt = sample.timestamp_s - latest.imu.timestamp_s;
        if dt <= 0.0 {
            warn!(dt, "non-monotonic IMU sample, skipping integration");
            return Err(PropagationError::NonMonotonicTime { dt });
        }

        let mut integrator = latest.integrator.clone();
        integrator.integrate(&sample, dt);
        let prediction = integrator.predict(&self.states[0].nav_state());

        let state = State::new(
            latest.odom_frame_id.clone(),
            prediction,
            sample,
            integrator,
            latest.baro_height_bias,
        );
        self.states.push(state);
        Ok(())
    }

    /// Close this chain at exactly `t` and spawn the successor chain.
    ///
    /// Returns `(to, from)`: `to` covers `[first, t]` and is assigned a
    /// fresh node index at its boundary; `from` starts at `t` and stays
    /// open. A zero-order-hold synthetic sample closes `to` at `t`
    /// unless `t` coincides with an existing sample, in which case the
    /// boundary state is shared without duplication. The counter is
    /// advanced exactly once, and only on success.
    pub fn split(
        &self,
        t: f64,
        counter: &mut NodeIndexCounter,
    ) -> Result<(Propagation, Propagation), PropagationError> {
        let first = self.states.first().ok_or_else(|| {
            warn!("no initial state, skipping split");
            PropagationError::EmptyChain
        })?;
        let last = self.states.last().expect("chain is non-empty");

        let (t_first, t_last) = (first.timestamp(), last.timestamp());
        if t < t_first || t > t_last {
            debug!(t, t_first, t_last, "split time outside chain, skipping split");
            return Err(PropagationError::OutOfRangeSplit {
                t,
                first: t_first,
                last: t_last,
            });
        }

        // First state with timestamp >= t.
        let right = self.states.partition_point(|s| s.timestamp() < t);
        if right == 0 {
            warn!(t, "no sample before split time, skipping split");
            return Err(PropagationError::OutOfRangeSplit {
                t,
                first: t_first,
                last: t_last,
            });
        }

        let split_idx = counter.peek();
        let boundary_is_sample = self.states[right].timestamp() == t;

        let to = if boundary_is_sample {
            Propagation::from_states(
                self.states[..=right].to_vec(),
                self.first_node_idx,
                Some(split_idx),
            )
        } else {
            let mut to = Propagation::from_states(
                self.states[..right].to_vec(),
                self.first_node_idx,
                Some(split_idx),
            );
            // Close exactly at t with the next sample's readings held.
            to.add_measurement(self.states[right].imu.zero_order_hold(t))?;
            to
        };

        let from = if boundary_is_sample {
            // t falls on an existing sample: reuse the suffix directly.
            Propagation::from_states(
                self.states[right..].to_vec(),
                split_idx,
                self.last_node_idx,
            )
        } else {
            // Rebuild from the boundary state with a fresh integration
            // window (bias retained) and replay the remaining samples.
            let boundary = to.latest_state().expect("to-chain is non-empty");
            let mut initial = boundary.clone();
            let bias = initial.integrator.bias_hat();
            initial.integrator.reset_integration_and_set_bias(bias);

            let mut from = Propagation::new(initial, split_idx, self.last_node_idx);
            for state in &self.states[right..] {
                from.add_measurement(state.imu)?;
            }
            from
        };

        counter.advance();
        Ok((to, from))
    }

    /// Regenerate the whole chain from a new initial state.
    ///
    /// Replays every buffered sample on a scratch chain and swaps the
    /// result in atomically; the chain is untouched if any replay step
    /// fails. Annotations stay attached, they belong to the node index
    /// rather than to the replaced states.
    pub fn repropagate(&mut self, initial_state: State) -> Result<(), PropagationError> {
        if self.states.is_empty() {
            warn!("no initial state, skipping repropagation");
            return Err(PropagationError::EmptyChain);
        }

        let mut first = initial_state;
        first.integrator.reset_integration();

        let mut scratch = Propagation::new(first, self.first_node_idx, self.last_node_idx);
        for state in self.states.iter().skip(1) {
            if scratch.add_measurement(state.imu).is_err() {
                warn!("failed to integrate sample during repropagation");
                return Err(PropagationError::ReplayFailed);
            }
        }

        self.states = scratch.states;
        Ok(())
    }
}
