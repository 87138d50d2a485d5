//! Process-wide predictor with a lazy per-user model cache.
//!
//! Models load from the bundle store on first use and stay cached until
//! evicted (or retrained, which evicts). The cache is read-mostly:
//! readers share the lock, writes happen only on load, eviction, and
//! clear.

use crate::bundle::ModelBundle;
use crate::ensemble::{self, Prediction};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vigil_behavior::SessionFeatureExtractor;
use vigil_core::config::ModelWeights;
use vigil_core::{Result, RiskLevel, VigilError};
use vigil_store::Store;

struct CachedModel {
    bundle: ModelBundle,
    loaded_at: DateTime<Utc>,
}

/// Cache/status summary for one user's model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub loaded: bool,
    pub models_available: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
    pub feature_count: usize,
    pub top_features: Vec<String>,
}

/// Serves anomaly predictions from lazily loaded per-user bundles.
pub struct Predictor {
    model_dir: PathBuf,
    weights: ModelWeights,
    cache: RwLock<HashMap<i64, Arc<CachedModel>>>,
}

impl Predictor {
    pub fn new(model_dir: PathBuf, weights: ModelWeights) -> Self {
        Self {
            model_dir,
            weights,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn load(&self, user_id: i64, now: DateTime<Utc>) -> Result<Arc<CachedModel>> {
        if let Some(model) = self.cache.read().get(&user_id) {
            return Ok(Arc::clone(model));
        }

        let bundle = ModelBundle::load(&self.model_dir, user_id)?;
        let model = Arc::new(CachedModel {
            bundle,
            loaded_at: now,
        });
        info!(user_id, "Loaded model bundle into cache");
        self.cache.write().insert(user_id, Arc::clone(&model));
        Ok(model)
    }

    /// Score a session feature map against the user's model. Degenerate
    /// situations (no bundle, unreadable bundle, no data) come back as
    /// neutral predictions rather than errors: the trust engine must
    /// stay available.
    pub fn predict_features(
        &self,
        user_id: i64,
        features: &BTreeMap<String, f64>,
        now: DateTime<Utc>,
    ) -> Prediction {
        let model = match self.load(user_id, now) {
            Ok(model) => model,
            Err(VigilError::ModelUnavailable(_)) => {
                debug!(user_id, "No trained model available");
                return Prediction::no_model();
            }
            Err(e) => {
                warn!(user_id, error = %e, "Model bundle failed to load");
                return Prediction::load_error();
            }
        };

        if features.is_empty() {
            return Prediction::insufficient_data();
        }

        let bundle = &model.bundle;
        let vector: Vec<f64> = bundle
            .feature_vocabulary
            .iter()
            .map(|name| {
                let v = features.get(name).copied().unwrap_or(0.0);
                if v.is_finite() {
                    v
                } else {
                    0.0
                }
            })
            .collect();
        let scaled = bundle.scaler.transform(&vector);

        let Some((score, detector_scores, raws, predictions)) =
            ensemble::score_vector(&bundle.detectors, &self.weights, &scaled)
        else {
            return Prediction::all_detectors_failed();
        };

        let risk_level = RiskLevel::from_score(score);
        let confidence = ensemble::confidence(&raws, &predictions);
        let feature_analysis = ensemble::anomalous_features(
            &scaled,
            &bundle.feature_vocabulary,
            &bundle.feature_importance,
        );

        if risk_level.is_anomalous() {
            warn!(
                user_id,
                anomaly_score = score,
                risk = risk_level.as_str(),
                "Behavioral anomaly detected"
            );
        } else {
            debug!(user_id, anomaly_score = score, "Scored session vector");
        }

        Prediction {
            anomaly_score: score,
            risk_level,
            confidence,
            detector_scores,
            feature_analysis,
            message: None,
        }
    }

    /// Aggregate a session's stored events and score the result.
    pub fn predict_session(
        &self,
        store: &Store,
        user_id: i64,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Prediction> {
        let events = store.events_for_session(session_id)?;
        let features = SessionFeatureExtractor::extract(&events);
        if features.is_empty() {
            return Ok(Prediction::insufficient_data());
        }
        Ok(self.predict_features(user_id, &features, now))
    }

    /// Score several sessions for one user.
    pub fn batch_predict(
        &self,
        store: &Store,
        user_id: i64,
        session_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<(i64, Prediction)>> {
        session_ids
            .iter()
            .map(|sid| Ok((*sid, self.predict_session(store, user_id, *sid, now)?)))
            .collect()
    }

    /// Cache/bundle status for a user without forcing a load.
    pub fn model_status(&self, user_id: i64) -> ModelStatus {
        match self.cache.read().get(&user_id) {
            Some(model) => ModelStatus {
                loaded: true,
                models_available: model
                    .bundle
                    .detectors
                    .available()
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                loaded_at: Some(model.loaded_at),
                feature_count: model.bundle.feature_importance.len(),
                top_features: model
                    .bundle
                    .feature_importance
                    .keys()
                    .take(5)
                    .cloned()
                    .collect(),
            },
            None => ModelStatus {
                loaded: false,
                models_available: Vec::new(),
                loaded_at: None,
                feature_count: 0,
                top_features: Vec::new(),
            },
        }
    }

    /// Drop one user's cached model (after retraining, for instance).
    pub fn evict(&self, user_id: i64) {
        if self.cache.write().remove(&user_id).is_some() {
            info!(user_id, "Evicted cached model");
        }
    }

    /// Drop every cached model.
    pub fn clear(&self) {
        self.cache.write().clear();
        info!("Cleared model cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{Detectors, BUNDLE_VERSION};
    use crate::iforest::IsolationForest;
    use crate::lof::LocalOutlierFactor;
    use crate::ocsvm::OneClassSvm;
    use crate::scaler::Scaler;
    use chrono::TimeZone;
    use indexmap::IndexMap;
    use vigil_core::feature_vocabulary;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    /// Build and persist a bundle over synthetic "normal" session
    /// vectors that only populate a handful of vocabulary slots.
    fn persist_bundle(dir: &std::path::Path, user_id: i64) -> Vec<BTreeMap<String, f64>> {
        let mut maps = Vec::new();
        for i in 0..30 {
            let mut features = BTreeMap::new();
            features.insert("ks_avg_dwell_mean".to_string(), 85.0 + (i % 5) as f64);
            features.insert("ks_avg_flight_mean".to_string(), 50.0 + (i % 3) as f64);
            features.insert("temporal_event_rate".to_string(), 0.4 + (i % 4) as f64 * 0.02);
            maps.push(features);
        }
        let vectors: Vec<Vec<f64>> = maps.iter().map(vigil_core::vector_from_map).collect();
        let scaler = Scaler::fit(&vectors).unwrap();
        let scaled = scaler.transform_all(&vectors);
        let detectors = Detectors {
            iforest: Some(IsolationForest::fit(&scaled, 0.1, 42).unwrap()),
            ocsvm: Some(OneClassSvm::fit(&scaled, 0.1).unwrap()),
            lof: Some(LocalOutlierFactor::fit(&scaled, 20, 0.1).unwrap()),
        };

        let mut importance = IndexMap::new();
        importance.insert("ks_avg_dwell_mean".to_string(), 1.0);
        importance.insert("ks_avg_flight_mean".to_string(), 0.9);
        importance.insert("temporal_event_rate".to_string(), 0.8);

        let bundle = ModelBundle {
            version: BUNDLE_VERSION,
            scaler,
            detectors,
            feature_importance: importance,
            feature_vocabulary: feature_vocabulary(),
            trained_at: now(),
            sample_count: 30,
        };
        bundle.save(dir, user_id).unwrap();
        maps
    }

    #[test]
    fn test_missing_bundle_neutral_result() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = Predictor::new(dir.path().to_path_buf(), ModelWeights::default());

        let mut features = BTreeMap::new();
        features.insert("ks_avg_dwell_mean".to_string(), 85.0);
        let prediction = predictor.predict_features(1, &features, now());

        assert_eq!(prediction.anomaly_score, 0.0);
        assert_eq!(prediction.risk_level, RiskLevel::Unknown);
        assert_eq!(prediction.confidence, 0.0);
        assert_eq!(
            prediction.message.as_deref(),
            Some("No trained model available")
        );
    }

    #[test]
    fn test_corrupt_bundle_neutral_result() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(crate::bundle::bundle_path(dir.path(), 2), "garbage").unwrap();
        let predictor = Predictor::new(dir.path().to_path_buf(), ModelWeights::default());

        let mut features = BTreeMap::new();
        features.insert("ks_avg_dwell_mean".to_string(), 85.0);
        let prediction = predictor.predict_features(2, &features, now());
        assert_eq!(prediction.risk_level, RiskLevel::Unknown);
        assert_eq!(
            prediction.message.as_deref(),
            Some("Model bundle failed to load")
        );
    }

    #[test]
    fn test_normal_vector_scores_low() {
        let dir = tempfile::tempdir().unwrap();
        let maps = persist_bundle(dir.path(), 3);
        let predictor = Predictor::new(dir.path().to_path_buf(), ModelWeights::default());

        let prediction = predictor.predict_features(3, &maps[0], now());
        assert!(prediction.message.is_none());
        assert!((0.0..=1.0).contains(&prediction.anomaly_score));
        assert!((0.0..=1.0).contains(&prediction.confidence));
        assert_eq!(prediction.detector_scores.len(), 3);
        // in-distribution vector should not land in the high-risk band
        assert_ne!(prediction.risk_level, RiskLevel::HighRisk);
    }

    #[test]
    fn test_outlier_scores_higher_than_inlier() {
        let dir = tempfile::tempdir().unwrap();
        let maps = persist_bundle(dir.path(), 4);
        let predictor = Predictor::new(dir.path().to_path_buf(), ModelWeights::default());

        let normal = predictor.predict_features(4, &maps[0], now());

        let mut weird = BTreeMap::new();
        weird.insert("ks_avg_dwell_mean".to_string(), 900.0);
        weird.insert("ks_avg_flight_mean".to_string(), 0.5);
        weird.insert("temporal_event_rate".to_string(), 80.0);
        let anomalous = predictor.predict_features(4, &weird, now());

        assert!(anomalous.anomaly_score > normal.anomaly_score);
        // extreme standardized values get attributed
        assert!(!anomalous.feature_analysis.anomalous_features.is_empty());
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let maps = persist_bundle(dir.path(), 5);
        let predictor = Predictor::new(dir.path().to_path_buf(), ModelWeights::default());

        let a = predictor.predict_features(5, &maps[1], now());
        let b = predictor.predict_features(5, &maps[1], now());
        assert_eq!(a.anomaly_score, b.anomaly_score);
        assert_eq!(a.detector_scores, b.detector_scores);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn test_empty_features_insufficient() {
        let dir = tempfile::tempdir().unwrap();
        persist_bundle(dir.path(), 6);
        let predictor = Predictor::new(dir.path().to_path_buf(), ModelWeights::default());

        let prediction = predictor.predict_features(6, &BTreeMap::new(), now());
        assert_eq!(prediction.risk_level, RiskLevel::InsufficientData);
    }

    #[test]
    fn test_status_and_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let maps = persist_bundle(dir.path(), 7);
        let predictor = Predictor::new(dir.path().to_path_buf(), ModelWeights::default());

        // not loaded until first use
        assert!(!predictor.model_status(7).loaded);

        predictor.predict_features(7, &maps[0], now());
        let status = predictor.model_status(7);
        assert!(status.loaded);
        assert_eq!(status.models_available.len(), 3);
        assert_eq!(status.feature_count, 3);
        assert_eq!(status.top_features[0], "ks_avg_dwell_mean");

        predictor.evict(7);
        assert!(!predictor.model_status(7).loaded);
    }
}
