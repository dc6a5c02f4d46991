//! Per-phase timing statistics for the optimization cycle.

use std::collections::HashMap;
use std::time::Duration;

/// Running statistics of one labelled phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    /// Timestamp of the data the latest iteration worked on.
    pub stamp: f64,
    /// Number of recorded iterations.
    pub iteration: u64,
    /// Latest iteration's wall time (s).
    pub latest: f64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Statistics per phase label.
pub type TimingMap = HashMap<String, Timing>;

/// Fold one measured duration into the map entry for `label`.
pub fn record(map: &mut TimingMap, label: &str, elapsed: Duration, stamp: f64) {
    let dt = elapsed.as_secs_f64();
    map.entry(label.to_string())
        .and_modify(|t| {
            t.stamp = stamp;
            t.iteration += 1;
            t.latest = dt;
            t.total += dt;
            t.min = t.min.min(dt);
            t.max = t.max.max(dt);
            t.mean = t.total / t.iteration as f64;
        })
        .or_insert(Timing {
            stamp,
            iteration: 1,
            latest: dt,
            total: dt,
            min: dt,
            max: dt,
            mean: dt,
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn record_accumulates_statistics() {
        let mut map = TimingMap::new();
        record(&mut map, "optimize", Duration::from_millis(10), 1.0);
        record(&mut map, "optimize", Duration::from_millis(30), 2.0);

        let t = &map["optimize"];
        assert_eq!(t.iteration, 2);
        assert_eq!(t.stamp, 2.0);
        assert_relative_eq!(t.min, 0.010, epsilon = 1e-9);
        assert_relative_eq!(t.max, 0.030, epsilon = 1e-9);
        assert_relative_eq!(t.mean, 0.020, epsilon = 1e-9);
        assert_relative_eq!(t.latest, 0.030, epsilon = 1e-9);
    }

    #[test]
    fn labels_are_independent() {
        let mut map = TimingMap::new();
        record(&mut map, "a", Duration::from_millis(1), 0.0);
        record(&mut map, "b", Duration::from_millis(2), 0.0);
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"].iteration, 1);
    }
}
