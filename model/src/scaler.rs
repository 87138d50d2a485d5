//! Per-feature standardizer (zero mean, unit variance).

use serde::{Deserialize, Serialize};
use vigil_core::{Result, VigilError};

/// Fitted standardization parameters, one mean/std pair per feature.
/// Features with zero spread pass through centred but unscaled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Scaler {
    /// Fit over a set of equal-length vectors.
    pub fn fit(data: &[Vec<f64>]) -> Result<Self> {
        let first = data
            .first()
            .ok_or_else(|| VigilError::InsufficientData("no vectors to fit scaler".into()))?;
        let dims = first.len();
        if data.iter().any(|v| v.len() != dims) {
            return Err(VigilError::Internal("ragged feature vectors".into()));
        }

        let n = data.len() as f64;
        let mut means = vec![0.0; dims];
        for vector in data {
            for (m, v) in means.iter_mut().zip(vector) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }

        let mut stds = vec![0.0; dims];
        for vector in data {
            for ((s, v), m) in stds.iter_mut().zip(vector).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        for s in &mut stds {
            *s = (*s / n).sqrt();
        }

        Ok(Self { means, stds })
    }

    /// Standardize one vector in place-free style.
    pub fn transform(&self, vector: &[f64]) -> Vec<f64> {
        vector
            .iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| if *s > 0.0 { (v - m) / s } else { v - m })
            .collect()
    }

    pub fn transform_all(&self, data: &[Vec<f64>]) -> Vec<Vec<f64>> {
        data.iter().map(|v| self.transform(v)).collect()
    }
}
