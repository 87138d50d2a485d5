//! Local outlier factor detector in novelty mode.
//!
//! The fitted neighbor set is frozen into the bundle; queries are
//! scored against it. The decision score is the negative outlier
//! factor: around -1 for points in locally dense regions, increasingly
//! negative for points whose local density falls below their neighbors'.

use serde::{Deserialize, Serialize};
use vigil_core::{Result, VigilError};

const DENSITY_FLOOR: f64 = 1e-10;

/// Fitted local-density model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalOutlierFactor {
    points: Vec<Vec<f64>>,
    k: usize,
    /// Per-point k-distance, aligned with `points`.
    k_distances: Vec<f64>,
    /// Per-point local reachability density, aligned with `points`.
    lrds: Vec<f64>,
    /// Contamination-quantile of training negative outlier factors.
    offset: f64,
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Indices and distances of the `k` nearest points to `vector`,
/// excluding `skip` (used to leave a training point out of its own
/// neighborhood).
fn nearest(
    points: &[Vec<f64>],
    vector: &[f64],
    k: usize,
    skip: Option<usize>,
) -> Vec<(usize, f64)> {
    let mut distances: Vec<(usize, f64)> = points
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != skip)
        .map(|(i, p)| (i, euclidean(vector, p)))
        .collect();
    distances.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    distances.truncate(k);
    distances
}

impl LocalOutlierFactor {
    /// Fit on standardized vectors with `n_neighbors` (clamped to n-1).
    pub fn fit(data: &[Vec<f64>], n_neighbors: usize, contamination: f64) -> Result<Self> {
        if data.len() < 3 {
            return Err(VigilError::InsufficientData(
                "local outlier factor needs at least three vectors".into(),
            ));
        }
        let k = n_neighbors.min(data.len() - 1).max(1);

        // k-distance per training point, leave-self-out
        let mut k_distances = Vec::with_capacity(data.len());
        let mut neighborhoods = Vec::with_capacity(data.len());
        for (i, point) in data.iter().enumerate() {
            let neighbors = nearest(data, point, k, Some(i));
            k_distances.push(neighbors.last().map(|(_, d)| *d).unwrap_or(0.0));
            neighborhoods.push(neighbors);
        }

        // local reachability density per training point
        let mut lrds = Vec::with_capacity(data.len());
        for neighbors in &neighborhoods {
            let reach_sum: f64 = neighbors
                .iter()
                .map(|(j, d)| d.max(k_distances[*j]))
                .sum();
            let mean_reach = reach_sum / neighbors.len() as f64;
            lrds.push(1.0 / mean_reach.max(DENSITY_FLOOR));
        }

        let mut model = Self {
            points: data.to_vec(),
            k,
            k_distances,
            lrds,
            offset: -1.5,
        };

        // training negative outlier factors set the predict boundary
        let mut nofs: Vec<f64> = (0..data.len())
            .map(|i| {
                let neighbors = &neighborhoods[i];
                let lrd_ratio: f64 =
                    neighbors.iter().map(|(j, _)| model.lrds[*j]).sum::<f64>()
                        / neighbors.len() as f64;
                -(lrd_ratio / model.lrds[i].max(DENSITY_FLOOR))
            })
            .collect();
        nofs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((nofs.len() as f64 - 1.0) * contamination) as usize;
        model.offset = nofs[rank.min(nofs.len() - 1)];

        Ok(model)
    }

    /// Negative outlier factor of a query point; more negative means
    /// more anomalous.
    pub fn decision_function(&self, vector: &[f64]) -> f64 {
        let neighbors = nearest(&self.points, vector, self.k, None);
        if neighbors.is_empty() {
            return -1.0;
        }
        let reach_sum: f64 = neighbors
            .iter()
            .map(|(j, d)| d.max(self.k_distances[*j]))
            .sum();
        let mean_reach = reach_sum / neighbors.len() as f64;
        let lrd_query = 1.0 / mean_reach.max(DENSITY_FLOOR);

        let neighbor_lrd: f64 =
            neighbors.iter().map(|(j, _)| self.lrds[*j]).sum::<f64>() / neighbors.len() as f64;

        -(neighbor_lrd / lrd_query.max(DENSITY_FLOOR))
    }

    /// +1 for inliers, -1 for outliers relative to the training quantile.
    pub fn predict(&self, vector: &[f64]) -> i8 {
        if self.decision_function(vector) >= self.offset {
            1
        } else {
            -1
        }
    }
}
