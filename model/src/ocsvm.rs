//! One-class margin model with an RBF kernel.
//!
//! Keeps the kernelised-boundary contract of a one-class SVM (`gamma =
//! scale`, `nu`-quantile offset, signed score, lower = more anomalous)
//! over a uniform-weight kernel-mean decision function: the fitted
//! boundary is the `nu`-quantile of the training points' mean kernel
//! similarity, and scores are standardized by the training spread so the
//! downstream normalisation window stays meaningful.

use serde::{Deserialize, Serialize};
use vigil_core::{Result, VigilError};

const SPREAD_FLOOR: f64 = 1e-9;

/// Fitted one-class boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneClassSvm {
    support_vectors: Vec<Vec<f64>>,
    gamma: f64,
    /// `nu`-quantile of training kernel-mean scores.
    rho: f64,
    /// Standard deviation of training kernel-mean scores.
    spread: f64,
}

fn rbf_kernel(a: &[f64], b: &[f64], gamma: f64) -> f64 {
    let squared: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    (-gamma * squared).exp()
}

impl OneClassSvm {
    /// Fit on standardized vectors. `nu` bounds the fraction of training
    /// points allowed outside the boundary.
    pub fn fit(data: &[Vec<f64>], nu: f64) -> Result<Self> {
        if data.len() < 2 {
            return Err(VigilError::InsufficientData(
                "one-class margin model needs at least two vectors".into(),
            ));
        }
        let dims = data[0].len();

        // gamma = scale: 1 / (n_features * Var(X)) over the flattened data
        let flat: Vec<f64> = data.iter().flatten().copied().collect();
        let mean = flat.iter().sum::<f64>() / flat.len() as f64;
        let var = flat.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / flat.len() as f64;
        let gamma = if var > 0.0 { 1.0 / (dims as f64 * var) } else { 1.0 };

        let mut model = Self {
            support_vectors: data.to_vec(),
            gamma,
            rho: 0.0,
            spread: 1.0,
        };

        let raw: Vec<f64> = data.iter().map(|v| model.kernel_mean(v)).collect();
        let mut sorted = raw.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((sorted.len() as f64 - 1.0) * nu) as usize;
        model.rho = sorted[rank.min(sorted.len() - 1)];

        let raw_mean = raw.iter().sum::<f64>() / raw.len() as f64;
        let raw_var =
            raw.iter().map(|v| (v - raw_mean).powi(2)).sum::<f64>() / raw.len() as f64;
        model.spread = raw_var.sqrt().max(SPREAD_FLOOR);

        Ok(model)
    }

    fn kernel_mean(&self, vector: &[f64]) -> f64 {
        self.support_vectors
            .iter()
            .map(|sv| rbf_kernel(vector, sv, self.gamma))
            .sum::<f64>()
            / self.support_vectors.len() as f64
    }

    /// Signed distance from the boundary in training-spread units;
    /// lower means more anomalous.
    pub fn decision_function(&self, vector: &[f64]) -> f64 {
        (self.kernel_mean(vector) - self.rho) / self.spread
    }

    /// +1 inside the boundary, -1 outside.
    pub fn predict(&self, vector: &[f64]) -> i8 {
        if self.decision_function(vector) >= 0.0 {
            1
        } else {
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> Vec<Vec<f64>> {
        (0..40)
            .map(|i| {
                let jitter = (i % 5) as f64 * 0.1;
                vec![0.5 + jitter, -0.5 - jitter]
            })
            .collect()
    }

    #[test]
    fn test_far_point_scores_lower() {
        let model = OneClassSvm::fit(&cluster(), 0.1).unwrap();
        let near = model.decision_function(&[0.6, -0.6]);
        let far = model.decision_function(&[25.0, 25.0]);
        assert!(far < near);
        assert_eq!(model.predict(&[25.0, 25.0]), -1);
    }

    #[test]
    fn test_most_training_points_are_inliers() {
        let data = cluster();
        let model = OneClassSvm::fit(&data, 0.1).unwrap();
        let inliers = data.iter().filter(|v| model.predict(v) == 1).count();
        // nu = 0.1 leaves roughly ninety percent inside
        assert!(inliers as f64 >= data.len() as f64 * 0.8);
    }

    #[test]
    fn test_degenerate_data_does_not_blow_up() {
        let data = vec![vec![1.0, 1.0]; 10];
        let model = OneClassSvm::fit(&data, 0.1).unwrap();
        let score = model.decision_function(&[1.0, 1.0]);
        assert!(score.is_finite());
    }

    #[test]
    fn test_fit_is_deterministic() {
        let a = OneClassSvm::fit(&cluster(), 0.1).unwrap();
        let b = OneClassSvm::fit(&cluster(), 0.1).unwrap();
        assert_eq!(
            a.decision_function(&[0.7, -0.7]),
            b.decision_function(&[0.7, -0.7])
        );
    }

    #[test]
    fn test_serde_round_trip() {
        let model = OneClassSvm::fit(&cluster(), 0.1).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let restored: OneClassSvm = serde_json::from_str(&json).unwrap();
        assert_eq!(
            model.decision_function(&[0.1, 0.2]),
            restored.decision_function(&[0.1, 0.2])
        );
    }
}
