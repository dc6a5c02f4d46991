use nalgebra::Vector3;

/// Single CFAR radar detection in the radar sensor frame.
///
/// Produced by the detector front end; this crate only consumes them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadarDetection {
    /// Detection position in the radar frame (m).
    pub position: Vector3<f64>,
    /// Measured radial (Doppler) velocity (m/s).
    pub doppler: f64,
    /// Signal-to-noise ratio reported by the detector.
    pub snr: i16,
    /// Noise floor reported by the detector.
    pub noise: i16,
}

impl RadarDetection {
    pub fn new(position: Vector3<f64>, doppler: f64) -> Self {
        Self {
            position,
            doppler,
            snr: 0,
            noise: 0,
        }
    }

    /// Range from the sensor origin.
    pub fn range(&self) -> f64 {
        self.position.norm()
    }

    /// Unit vector from the sensor origin toward the detection, or
    /// `None` at zero range.
    pub fn direction(&self) -> Option<Vector3<f64>> {
        let range = self.range();
        if range > 0.0 {
            Some(self.position / range)
        } else {
            None
        }
    }
}
