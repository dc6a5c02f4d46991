use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nalgebra::Vector3;

/// Shared handle to a tracked landmark.
///
/// The tracker front end keeps its own reference; the graph builder uses
/// the `added` flag to seed each landmark's initial value exactly once.
pub type TrackHandle = Arc<Track>;

/// Tracked radar landmark, positioned in the radar sensor frame.
#[derive(Debug)]
pub struct Track {
    id: u64,
    r_p_rt: Vector3<f64>,
    added: AtomicBool,
}

impl Track {
    pub fn new(id: u64, r_p_rt: Vector3<f64>) -> TrackHandle {
        Arc::new(Self {
            id,
            r_p_rt,
            added: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Landmark position in the radar frame.
    pub fn r_p_rt(&self) -> Vector3<f64> {
        self.r_p_rt
    }

    /// Whether an initial value for this landmark was already inserted
    /// into a graph increment.
    pub fn is_added(&self) -> bool {
        self.added.load(Ordering::SeqCst)
    }

    pub fn set_added(&self) {
        self.added.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn added_flag_latches() {
        let track = Track::new(7, Vector3::new(1.0, 2.0, 3.0));
        assert!(!track.is_added());
        track.set_added();
        assert!(track.is_added());
        track.set_added();
        assert!(track.is_added());
    }
}
