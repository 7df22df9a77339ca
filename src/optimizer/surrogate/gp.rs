use super::Surrogate;
use crate::error::{OptResult, OptobotError};
use faer::prelude::*;
use faer::{Mat, Side};
use ndarray::{Array1, Array2, ArrayView1};

const JITTER: [f64; 5] = [0.0, 1e-10, 1e-8, 1e-6, 1e-4];

/// Gaussian-process regression with a squared-exponential kernel.
/// Targets are standardised before fitting.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    pub length_scale: f64,
    pub signal_variance: f64,
    pub noise: f64,
    /// Training inputs, one row per point.
    train_x: Array2<f64>,
    /// Inverse of the (noisy) kernel matrix.
    k_inv: Array2<f64>,
    alpha: Array1<f64>,
    y_mean: f64,
    y_scale: f64,
}

impl Default for GaussianProcess {
    fn default() -> Self {
        Self::new(0.25, 1.0, 1e-6)
    }
}

impl GaussianProcess {
    pub fn new(length_scale: f64, signal_variance: f64, noise: f64) -> Self {
        Self {
            length_scale,
            signal_variance,
            noise,
            train_x: Array2::zeros((0, 0)),
            k_inv: Array2::zeros((0, 0)),
            alpha: Array1::zeros(0),
            y_mean: 0.0,
            y_scale: 1.0,
        }
    }

    #[inline]
    fn kernel(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        let sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
        self.signal_variance * (-0.5 * sq / (self.length_scale * self.length_scale)).exp()
    }

    fn kernel_matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        Array2::from_shape_fn((n, n), |(i, j)| self.kernel(x.row(i), x.row(j)))
    }
}

impl Surrogate for GaussianProcess {
    fn name(&self) -> &'static str {
        "GP"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> OptResult<()> {
        let n = x.len();
        if n == 0 || n != y.len() {
            return Err(OptobotError::Objective(format!(
                "cannot fit a GP on {} points and {} targets",
                n,
                y.len()
            )));
        }
        let dims = x[0].len();
        let train_x = Array2::from_shape_vec((n, dims), x.concat()).map_err(|e| {
            OptobotError::Objective(format!("GP training points are ragged: {}", e))
        })?;

        let y = ArrayView1::from(y);
        let mean = y.mean().unwrap_or(0.0);
        let var = y.mapv(|v| (v - mean) * (v - mean)).sum() / n as f64;
        let scale = if var > 1e-12 { var.sqrt() } else { 1.0 };
        let y_norm = y.mapv(|v| (v - mean) / scale);

        let k = self.kernel_matrix(&train_x);
        // Retry with growing jitter until the factorisation succeeds.
        let llt = JITTER
            .iter()
            .find_map(|jitter| {
                let diag = self.noise + jitter;
                Mat::<f64>::from_fn(n, n, |i, j| {
                    if i == j {
                        k[[i, j]] + diag
                    } else {
                        k[[i, j]]
                    }
                })
                .cholesky(Side::Lower)
                .ok()
            })
            .ok_or_else(|| {
                OptobotError::Objective("GP kernel matrix is not positive definite".to_string())
            })?;

        let k_inv = llt.solve(&Mat::<f64>::identity(n, n));
        self.k_inv = Array2::from_shape_fn((n, n), |(i, j)| k_inv.read(i, j));
        self.alpha = self.k_inv.dot(&y_norm);
        self.train_x = train_x;
        self.y_mean = mean;
        self.y_scale = scale;
        Ok(())
    }

    fn predict(&self, x: &[f64]) -> (f64, f64) {
        if self.train_x.nrows() == 0 {
            return (self.y_mean, self.signal_variance.sqrt() * self.y_scale);
        }
        let x = ArrayView1::from(x);
        let k_star: Array1<f64> = self
            .train_x
            .rows()
            .into_iter()
            .map(|t| self.kernel(t, x))
            .collect();
        let mean = k_star.dot(&self.alpha);
        let explained = k_star.dot(&self.k_inv.dot(&k_star));
        let var = (self.signal_variance - explained).max(1e-12);
        (
            self.y_mean + mean * self.y_scale,
            var.sqrt() * self.y_scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolates_training_points() {
        let x = vec![vec![0.0], vec![0.5], vec![1.0]];
        let y = vec![1.0, 3.0, 2.0];
        let mut gp = GaussianProcess::default();
        gp.fit(&x, &y).unwrap();
        for (xi, yi) in x.iter().zip(&y) {
            let (mean, std) = gp.predict(xi);
            assert!((mean - yi).abs() < 1e-3, "{} vs {}", mean, yi);
            assert!(std < 0.05);
        }
        let (_, far_std) = gp.predict(&[3.0]);
        assert!(far_std > 0.5);
    }

    #[test]
    fn test_duplicate_points_still_factorise() {
        let x = vec![vec![0.2, 0.2]; 4];
        let y = vec![1.0, 1.0, 1.0, 1.0];
        let mut gp = GaussianProcess::default();
        assert!(gp.fit(&x, &y).is_ok());
    }
}
