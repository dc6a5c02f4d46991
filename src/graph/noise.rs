use nalgebra::DVector;

/// Diagonal Gaussian noise model, stored as 1-sigma values.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseModel {
    sigmas: Vec<f64>,
}

impl NoiseModel {
    pub fn diagonal(sigmas: Vec<f64>) -> Self {
        debug_assert!(sigmas.iter().all(|s| *s > 0.0));
        Self { sigmas }
    }

    pub fn isotropic(dim: usize, sigma: f64) -> Self {
        Self::diagonal(vec![sigma; dim])
    }

    pub fn dim(&self) -> usize {
        self.sigmas.len()
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    /// Scale a raw residual by the inverse sigmas.
    pub fn whiten(&self, residual: &DVector<f64>) -> DVector<f64> {
        debug_assert_eq!(residual.len(), self.sigmas.len());
        DVector::from_iterator(
            residual.len(),
            residual.iter().zip(&self.sigmas).map(|(r, s)| r / s),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn whiten_divides_by_sigma() {
        let noise = NoiseModel::diagonal(vec![0.5, 2.0]);
        let whitened = noise.whiten(&DVector::from_vec(vec![1.0, 1.0]));
        assert_relative_eq!(whitened[0], 2.0);
        assert_relative_eq!(whitened[1], 0.5);
    }

    #[test]
    fn isotropic_repeats_sigma() {
        let noise = NoiseModel::isotropic(3, 0.1);
        assert_eq!(noise.dim(), 3);
        assert_eq!(noise.sigmas(), &[0.1, 0.1, 0.1]);
    }
}
