use nalgebra::Vector3;

/// Gravity vector in the odometry frame (m/s^2), z-up.
pub const GRAVITY: Vector3<f64> = Vector3::new(0.0, 0.0, -9.81);

/// IMU noise densities and bias random-walk densities (1-sigma).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuNoise {
    pub sigma_gyro: f64,
    pub sigma_accel: f64,
    pub sigma_gyro_walk: f64,
    pub sigma_accel_walk: f64,
}

impl Default for ImuNoise {
    fn default() -> Self {
        Self {
            sigma_gyro: 1.7e-4,
            sigma_accel: 2.0e-3,
            sigma_gyro_walk: 1.0e-5,
            sigma_accel_walk: 1.0e-4,
        }
    }
}

/// Constant gyroscope/accelerometer biases.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuBias {
    pub gyro: Vector3<f64>,
    pub accel: Vector3<f64>,
}

impl ImuBias {
    pub fn zero() -> Self {
        Self {
            gyro: Vector3::zeros(),
            accel: Vector3::zeros(),
        }
    }

    pub fn new(gyro: Vector3<f64>, accel: Vector3<f64>) -> Self {
        Self { gyro, accel }
    }

    /// Bias-corrected angular rate.
    pub fn correct_gyro(&self, gyro: &Vector3<f64>) -> Vector3<f64> {
        gyro - self.gyro
    }

    /// Bias-corrected specific force.
    pub fn correct_accel(&self, accel: &Vector3<f64>) -> Vector3<f64> {
        accel - self.accel
    }
}

/// Single inertial measurement: specific force and angular rate in the
/// body frame at `timestamp_s`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    pub timestamp_s: f64,
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
}

impl ImuSample {
    pub fn new(timestamp_s: f64, accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        Self {
            timestamp_s,
            accel,
            gyro,
        }
    }

    /// Synthetic zero-order-hold sample: same readings, new timestamp.
    ///
    /// Used when a propagation is split at a time that falls between two
    /// real samples, so the chain can be closed exactly at the boundary.
    pub fn zero_order_hold(&self, timestamp_s: f64) -> Self {
        Self {
            timestamp_s,
            accel: self.accel,
            gyro: self.gyro,
        }
    }
}
