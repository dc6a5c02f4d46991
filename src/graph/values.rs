use std::collections::HashMap;

use nalgebra::Vector3;
use tracing::warn;

use crate::geometry::SE3;
use crate::imu::ImuBias;

use super::key::Key;

/// One estimated variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Pose(SE3),
    Velocity(Vector3<f64>),
    Bias(ImuBias),
    Point(Vector3<f64>),
    Height(f64),
}

/// Insert-once map of initial values keyed by variable.
#[derive(Debug, Clone, Default)]
pub struct Values {
    map: HashMap<Key, Value>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an initial value. Duplicate keys keep the first value;
    /// seeding the same variable twice is a caller bug worth a warning.
    pub fn insert(&mut self, key: Key, value: Value) -> bool {
        if self.map.contains_key(&key) {
            warn!(%key, "initial value already present, keeping first");
            return false;
        }
        self.map.insert(key, value);
        true
    }

    pub fn contains(&self, key: Key) -> bool {
        self.map.contains_key(&key)
    }

    pub fn get(&self, key: Key) -> Option<&Value> {
        self.map.get(&key)
    }

    pub fn pose(&self, key: Key) -> Option<SE3> {
        match self.map.get(&key) {
            Some(Value::Pose(p)) => Some(*p),
            _ => None,
        }
    }

    pub fn velocity(&self, key: Key) -> Option<Vector3<f64>> {
        match self.map.get(&key) {
            Some(Value::Velocity(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn bias(&self, key: Key) -> Option<ImuBias> {
        match self.map.get(&key) {
            Some(Value::Bias(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn point(&self, key: Key) -> Option<Vector3<f64>> {
        match self.map.get(&key) {
            Some(Value::Point(p)) => Some(*p),
            _ => None,
        }
    }

    pub fn height(&self, key: Key) -> Option<f64> {
        match self.map.get(&key) {
            Some(Value::Height(h)) => Some(*h),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.map.iter()
    }
}
