//! Barometric height conversion.

/// Convert static pressure (Pa) to height (m) in the standard
/// atmosphere troposphere model.
///
/// <https://www.grc.nasa.gov/www/k-12/airplane/atmosmet.html>
pub fn height_from_pressure(pressure: f64) -> f64 {
    (288.08 * (pressure / 101290.0).powf(1.0 / 5.256) - 273.1 - 15.04) / -0.00649
}
