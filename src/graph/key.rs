use std::fmt;

use crate::propagation::NodeIndex;

/// Typed variable identifier, gtsam symbol-shorthand style.
///
/// Pose/velocity/bias keys share the node index of the split they were
/// created at; landmark keys carry the track id assigned by the radar
/// front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Body pose `I_T_IB` at a node.
    Pose(NodeIndex),
    /// Body velocity `I_v_IB` at a node.
    Velocity(NodeIndex),
    /// IMU bias at a node.
    Bias(NodeIndex),
    /// Landmark position, keyed by track id.
    Landmark(u64),
    /// Barometer height bias at a node.
    HeightBias(NodeIndex),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Pose(i) => write!(f, "x{i}"),
            Key::Velocity(i) => write!(f, "v{i}"),
            Key::Bias(i) => write!(f, "b{i}"),
            Key::Landmark(i) => write!(f, "l{i}"),
            Key::HeightBias(i) => write!(f, "h{i}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_symbol_shorthand() {
        assert_eq!(Key::Pose(3).to_string(), "x3");
        assert_eq!(Key::Landmark(12).to_string(), "l12");
        assert_eq!(Key::HeightBias(0).to_string(), "h0");
    }

    #[test]
    fn keys_with_same_index_differ_by_kind() {
        assert_ne!(Key::Pose(1), Key::Velocity(1));
    }
}
