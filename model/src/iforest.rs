//! Isolation forest detector.
//!
//! Anomalies isolate in fewer random splits than dense inliers. The
//! decision score follows the usual convention `0.5 - 2^(-E[h]/c(n))`,
//! so inliers land slightly above zero and outliers go negative.
//! Training is seeded, which keeps bundles reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use vigil_core::{Result, VigilError};

const N_ESTIMATORS: usize = 100;
const MAX_SAMPLES: usize = 256;
const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// A fitted forest of isolation trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<Node>,
    /// Normalizing average path length `c(sample_size)`.
    c_norm: f64,
    /// Contamination-quantile of training scores; the inlier/outlier
    /// boundary for `predict`.
    offset: f64,
}

/// Average unsuccessful-search path length of a binary search tree with
/// `n` points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_MASCHERONI) - 2.0 * (n - 1.0) / n
        }
    }
}

fn build_tree(
    data: &[Vec<f64>],
    indices: &[usize],
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> Node {
    if indices.len() <= 1 || depth >= max_depth {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    // features that still spread within this partition
    let dims = data[indices[0]].len();
    let mut splittable = Vec::new();
    for feature in 0..dims {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &i in indices {
            min = min.min(data[i][feature]);
            max = max.max(data[i][feature]);
        }
        if max > min {
            splittable.push((feature, min, max));
        }
    }
    if splittable.is_empty() {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let (feature, min, max) = splittable[rng.random_range(0..splittable.len())];
    let threshold = rng.random_range(min..max);

    let left: Vec<usize> = indices
        .iter()
        .copied()
        .filter(|&i| data[i][feature] < threshold)
        .collect();
    let right: Vec<usize> = indices
        .iter()
        .copied()
        .filter(|&i| data[i][feature] >= threshold)
        .collect();

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_tree(data, &left, depth + 1, max_depth, rng)),
        right: Box::new(build_tree(data, &right, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &Node, vector: &[f64], depth: f64) -> f64 {
    match node {
        Node::Leaf { size } => depth + average_path_length(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            if vector[*feature] < *threshold {
                path_length(left, vector, depth + 1.0)
            } else {
                path_length(right, vector, depth + 1.0)
            }
        }
    }
}

impl IsolationForest {
    /// Fit on standardized vectors. `contamination` sets the training
    /// quantile used as the inlier boundary.
    pub fn fit(data: &[Vec<f64>], contamination: f64, seed: u64) -> Result<Self> {
        if data.len() < 2 {
            return Err(VigilError::InsufficientData(
                "isolation forest needs at least two vectors".into(),
            ));
        }

        let sample_size = MAX_SAMPLES.min(data.len());
        let max_depth = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut trees = Vec::with_capacity(N_ESTIMATORS);
        for _ in 0..N_ESTIMATORS {
            let indices: Vec<usize> = (0..sample_size)
                .map(|_| rng.random_range(0..data.len()))
                .collect();
            trees.push(build_tree(data, &indices, 0, max_depth, &mut rng));
        }

        let mut forest = Self {
            trees,
            c_norm: average_path_length(sample_size),
            offset: 0.0,
        };

        let mut scores: Vec<f64> = data.iter().map(|v| forest.decision_function(v)).collect();
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((scores.len() as f64 - 1.0) * contamination) as usize;
        forest.offset = scores[rank.min(scores.len() - 1)];

        Ok(forest)
    }

    /// Signed decision score; lower means more anomalous.
    pub fn decision_function(&self, vector: &[f64]) -> f64 {
        if self.trees.is_empty() || self.c_norm <= 0.0 {
            return 0.0;
        }
        let mean_path: f64 = self
            .trees
            .iter()
            .map(|tree| path_length(tree, vector, 0.0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let paper_score = 2.0_f64.powf(-mean_path / self.c_norm);
        0.5 - paper_score
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

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Vec<Vec<f64>> {
        let mut data: Vec<Vec<f64>> = (0..60)
            .map(|i| {
                let jitter = (i % 7) as f64 * 0.05;
                vec![1.0 + jitter, -1.0 - jitter, 0.5 + jitter]
            })
            .collect();
        data.push(vec![12.0, 9.0, -8.0]);
        data
    }

    #[test]
    fn test_outlier_scores_below_inliers() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, 0.1, 42).unwrap();

        let inlier_score = forest.decision_function(&[1.0, -1.0, 0.5]);
        let outlier_score = forest.decision_function(&[12.0, 9.0, -8.0]);
        assert!(outlier_score < inlier_score);
        assert_eq!(forest.predict(&[12.0, 9.0, -8.0]), -1);
    }

    #[test]
    fn test_decision_scores_bounded() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, 0.1, 42).unwrap();
        for vector in &data {
            let s = forest.decision_function(vector);
            // paper score lives in (0, 1], so decision lives in [-0.5, 0.5)
            assert!((-0.5..0.5).contains(&s));
        }
    }

    #[test]
    fn test_seeded_fit_is_deterministic() {
        let data = cluster_with_outlier();
        let a = IsolationForest::fit(&data, 0.1, 42).unwrap();
        let b = IsolationForest::fit(&data, 0.1, 42).unwrap();
        for vector in &data {
            assert_eq!(a.decision_function(vector), b.decision_function(vector));
        }
    }

    #[test]
    fn test_too_few_samples() {
        assert!(IsolationForest::fit(&[vec![1.0]], 0.1, 42).is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::fit(&data, 0.1, 42).unwrap();
        let json = serde_json::to_string(&forest).unwrap();
        let restored: IsolationForest = serde_json::from_str(&json).unwrap();
        for vector in data.iter().take(5) {
            assert_eq!(
                forest.decision_function(vector),
                restored.decision_function(vector)
            );
        }
    }
}
