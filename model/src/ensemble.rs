//! Weighted ensemble scoring over the three one-class detectors.
//!
//! Each detector's raw score is normalised into an anomaly probability
//! on its own scale, then combined with the configured weights over
//! whichever detectors are present. Confidence blends prediction
//! agreement with raw-score consistency.

use crate::bundle::{Detectors, DETECTOR_IFOREST, DETECTOR_LOF, DETECTOR_OCSVM};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use vigil_core::config::ModelWeights;
use vigil_core::RiskLevel;

/// A feature flagged as contributing to an anomalous prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalousFeature {
    pub feature: String,
    /// Standardized value of the feature in the scored vector.
    pub value: f64,
    pub importance: f64,
    pub anomaly_type: String,
}

/// Explainability block attached to every prediction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureAnalysis {
    pub anomalous_features: Vec<AnomalousFeature>,
    pub total_features_analyzed: usize,
    pub top_important_features: Vec<String>,
}

/// Result of scoring one session vector against a user's model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub anomaly_score: f64,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub detector_scores: IndexMap<String, f64>,
    pub feature_analysis: FeatureAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Prediction {
    fn neutral(risk_level: RiskLevel, message: &str) -> Self {
        Self {
            anomaly_score: 0.0,
            risk_level,
            confidence: 0.0,
            detector_scores: IndexMap::new(),
            feature_analysis: FeatureAnalysis::default(),
            message: Some(message.to_string()),
        }
    }

    /// No bundle exists for the user.
    pub fn no_model() -> Self {
        Self::neutral(RiskLevel::Unknown, "No trained model available")
    }

    /// A bundle exists but could not be loaded.
    pub fn load_error() -> Self {
        Self::neutral(RiskLevel::Unknown, "Model bundle failed to load")
    }

    /// The session has no scoreable behavioral data yet.
    pub fn insufficient_data() -> Self {
        Self::neutral(RiskLevel::InsufficientData, "Insufficient behavioral data")
    }

    /// Every detector failed at query time.
    pub fn all_detectors_failed() -> Self {
        Self::neutral(RiskLevel::Unknown, "All detectors failed to predict")
    }
}

/// Normalise a detector's raw score into an anomaly probability.
pub fn normalize_score(detector: &str, score: f64) -> f64 {
    let normalized = match detector {
        DETECTOR_IFOREST => (0.5 - score) / 1.0,
        DETECTOR_OCSVM => (2.0 - score) / 4.0,
        DETECTOR_LOF => (-score - 1.0) / 2.0,
        _ => (1.0 - score) / 2.0,
    };
    normalized.clamp(0.0, 1.0)
}

fn weight_for(weights: &ModelWeights, detector: &str) -> f64 {
    match detector {
        DETECTOR_IFOREST => weights.iforest,
        DETECTOR_OCSVM => weights.ocsvm,
        DETECTOR_LOF => weights.lof,
        _ => 1.0 / 3.0,
    }
}

/// Blend of prediction agreement (0.6) and raw-score consistency (0.4).
/// A single surviving detector cannot corroborate itself: 0.5.
pub fn confidence(raw_scores: &[f64], predictions: &[i8]) -> f64 {
    if predictions.len() < 2 {
        return 0.5;
    }
    let inliers = predictions.iter().filter(|p| **p == 1).count();
    let majority = inliers.max(predictions.len() - inliers);
    let agreement = majority as f64 / predictions.len() as f64;

    let mean = raw_scores.iter().sum::<f64>() / raw_scores.len() as f64;
    let variance = raw_scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>()
        / raw_scores.len() as f64;
    let consistency = 1.0 / (1.0 + variance);

    (agreement * 0.6 + consistency * 0.4).clamp(0.0, 1.0)
}

/// Flag features among the top-ten most important whose standardized
/// value sits more than two spreads from the training mean.
pub fn anomalous_features(
    scaled: &[f64],
    vocabulary: &[String],
    importance: &IndexMap<String, f64>,
) -> FeatureAnalysis {
    let top: Vec<(&String, &f64)> = importance.iter().take(10).collect();
    let mut flagged = Vec::new();

    for (name, weight) in &top {
        if let Some(idx) = vocabulary.iter().position(|v| v == *name) {
            let z = scaled.get(idx).copied().unwrap_or(0.0);
            if z.abs() > 2.0 {
                flagged.push(AnomalousFeature {
                    feature: (*name).clone(),
                    value: z,
                    importance: **weight,
                    anomaly_type: "extreme_value".to_string(),
                });
            }
        }
    }

    FeatureAnalysis {
        anomalous_features: flagged,
        total_features_analyzed: scaled.len(),
        top_important_features: top.iter().take(5).map(|(name, _)| (*name).clone()).collect(),
    }
}

/// Score a standardized vector against every available detector and
/// combine the results. `None` when no detector produced a score.
pub fn score_vector(
    detectors: &Detectors,
    weights: &ModelWeights,
    scaled: &[f64],
) -> Option<(f64, IndexMap<String, f64>, Vec<f64>, Vec<i8>)> {
    let mut raw_scores = IndexMap::new();
    let mut raws = Vec::new();
    let mut predictions = Vec::new();

    if let Some(forest) = &detectors.iforest {
        let s = forest.decision_function(scaled);
        raw_scores.insert(DETECTOR_IFOREST.to_string(), s);
        raws.push(s);
        predictions.push(forest.predict(scaled));
    }
    if let Some(svm) = &detectors.ocsvm {
        let s = svm.decision_function(scaled);
        raw_scores.insert(DETECTOR_OCSVM.to_string(), s);
        raws.push(s);
        predictions.push(svm.predict(scaled));
    }
    if let Some(lof) = &detectors.lof {
        let s = lof.decision_function(scaled);
        raw_scores.insert(DETECTOR_LOF.to_string(), s);
        raws.push(s);
        predictions.push(lof.predict(scaled));
    }

    if raw_scores.is_empty() {
        return None;
    }

    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for (name, score) in &raw_scores {
        let weight = weight_for(weights, name);
        weighted += normalize_score(name, *score) * weight;
        total_weight += weight;
    }
    let ensemble = if total_weight > 0.0 {
        (weighted / total_weight).clamp(0.0, 1.0)
    } else {
        0.0
    };

    Some((ensemble, raw_scores, raws, predictions))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iforest_normalisation() {
        // decision 0.5 -> fully normal, -0.5 -> fully anomalous
        assert_eq!(normalize_score(DETECTOR_IFOREST, 0.5), 0.0);
        assert_eq!(normalize_score(DETECTOR_IFOREST, -0.5), 1.0);
        assert!((normalize_score(DETECTOR_IFOREST, 0.0) - 0.5).abs() < 1e-12);
        // clamped outside the window
        assert_eq!(normalize_score(DETECTOR_IFOREST, 2.0), 0.0);
        assert_eq!(normalize_score(DETECTOR_IFOREST, -2.0), 1.0);
    }

    #[test]
    fn test_ocsvm_normalisation() {
        assert_eq!(normalize_score(DETECTOR_OCSVM, 2.0), 0.0);
        assert_eq!(normalize_score(DETECTOR_OCSVM, -2.0), 1.0);
        assert!((normalize_score(DETECTOR_OCSVM, 0.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_lof_normalisation() {
        assert_eq!(normalize_score(DETECTOR_LOF, -1.0), 0.0);
        assert_eq!(normalize_score(DETECTOR_LOF, -3.0), 1.0);
        assert!((normalize_score(DETECTOR_LOF, -2.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_normalisation_always_in_unit_interval() {
        for detector in [DETECTOR_IFOREST, DETECTOR_OCSVM, DETECTOR_LOF] {
            for raw in [-100.0, -1.0, 0.0, 0.3, 1.0, 100.0] {
                let n = normalize_score(detector, raw);
                assert!((0.0..=1.0).contains(&n), "{detector} {raw} -> {n}");
            }
        }
    }

    #[test]
    fn test_single_detector_confidence() {
        assert_eq!(confidence(&[0.1], &[1]), 0.5);
        assert_eq!(confidence(&[], &[]), 0.5);
    }

    #[test]
    fn test_full_agreement_high_confidence() {
        let c = confidence(&[0.1, 0.1, 0.1], &[1, 1, 1]);
        // perfect agreement, near-zero variance
        assert!(c > 0.99);
    }

    #[test]
    fn test_split_vote_lowers_confidence() {
        let agree = confidence(&[0.1, 0.1, 0.1], &[1, 1, 1]);
        let split = confidence(&[0.1, 0.1, 0.1], &[1, -1, 1]);
        assert!(split < agree);
        // majority of two out of three
        assert!((split - (2.0 / 3.0 * 0.6 + 0.4)).abs() < 1e-9);
    }

    #[test]
    fn test_attribution_flags_extreme_values() {
        let vocabulary = vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ];
        let mut importance = IndexMap::new();
        importance.insert("b".to_string(), 1.0);
        importance.insert("a".to_string(), 0.5);
        importance.insert("c".to_string(), 0.2);

        let scaled = vec![0.5, 3.2, -2.5];
        let analysis = anomalous_features(&scaled, &vocabulary, &importance);

        assert_eq!(analysis.anomalous_features.len(), 2);
        assert_eq!(analysis.anomalous_features[0].feature, "b");
        assert_eq!(analysis.anomalous_features[1].feature, "c");
        assert_eq!(analysis.total_features_analyzed, 3);
        assert_eq!(analysis.top_important_features[0], "b");
    }

    #[test]
    fn test_neutral_predictions() {
        let p = Prediction::no_model();
        assert_eq!(p.anomaly_score, 0.0);
        assert_eq!(p.risk_level, vigil_core::RiskLevel::Unknown);
        assert_eq!(p.confidence, 0.0);
        assert_eq!(p.message.as_deref(), Some("No trained model available"));
    }
}
