//! Persisted per-user model bundle.
//!
//! A bundle is a versioned, self-describing JSON record holding the
//! fitted scaler, the detectors, the feature vocabulary the model was
//! trained against, and the learned importance map. Round-trip is the
//! contract: a loaded bundle scores identically to the one saved.

use crate::iforest::IsolationForest;
use crate::lof::LocalOutlierFactor;
use crate::ocsvm::OneClassSvm;
use crate::scaler::Scaler;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;
use vigil_core::{Result, VigilError};

pub const BUNDLE_VERSION: u32 = 1;

pub const DETECTOR_IFOREST: &str = "iforest";
pub const DETECTOR_OCSVM: &str = "ocsvm";
pub const DETECTOR_LOF: &str = "lof";

/// The fitted detectors; any subset may be present, but a bundle is
/// only ever persisted with at least one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detectors {
    pub iforest: Option<IsolationForest>,
    pub ocsvm: Option<OneClassSvm>,
    pub lof: Option<LocalOutlierFactor>,
}

impl Detectors {
    pub fn available(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.iforest.is_some() {
            names.push(DETECTOR_IFOREST);
        }
        if self.ocsvm.is_some() {
            names.push(DETECTOR_OCSVM);
        }
        if self.lof.is_some() {
            names.push(DETECTOR_LOF);
        }
        names
    }

    pub fn count(&self) -> usize {
        self.available().len()
    }
}

/// Everything needed to score a session vector for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub version: u32,
    pub scaler: Scaler,
    pub detectors: Detectors,
    /// Feature name -> normalised variance importance, sorted descending.
    pub feature_importance: IndexMap<String, f64>,
    /// Vocabulary order the vectors were built with at training time.
    pub feature_vocabulary: Vec<String>,
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
}

/// Bundle file location for a user: `<dir>/user_<uid>_model.json`.
pub fn bundle_path(dir: &Path, user_id: i64) -> PathBuf {
    dir.join(format!("user_{user_id}_model.json"))
}

impl ModelBundle {
    /// Persist atomically: write to a temp file, then rename over the
    /// previous bundle so readers never observe a torn file.
    pub fn save(&self, dir: &Path, user_id: i64) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = bundle_path(dir, user_id);
        let tmp_path = path.with_extension("json.tmp");

        let content = serde_json::to_string(self)?;
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &path)?;

        info!(user_id, path = %path.display(), "Persisted model bundle");
        Ok(path)
    }

    /// Load a user's bundle. A missing file is `ModelUnavailable`;
    /// anything unreadable or from a different format version surfaces
    /// as a load failure.
    pub fn load(dir: &Path, user_id: i64) -> Result<Self> {
        let path = bundle_path(dir, user_id);
        if !path.exists() {
            return Err(VigilError::ModelUnavailable(format!(
                "no bundle for user {user_id}"
            )));
        }
        let content = std::fs::read_to_string(&path)?;
        let bundle: ModelBundle = serde_json::from_str(&content)?;
        if bundle.version != BUNDLE_VERSION {
            return Err(VigilError::Internal(format!(
                "bundle version {} unsupported (expected {BUNDLE_VERSION})",
                bundle.version
            )));
        }
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn training_data() -> Vec<Vec<f64>> {
        (0..40)
            .map(|i| vec![(i % 5) as f64, (i % 3) as f64, 1.0])
            .collect()
    }

    fn fitted_bundle() -> ModelBundle {
        let data = training_data();
        let scaler = Scaler::fit(&data).unwrap();
        let scaled = scaler.transform_all(&data);
        let detectors = Detectors {
            iforest: Some(IsolationForest::fit(&scaled, 0.1, 42).unwrap()),
            ocsvm: Some(OneClassSvm::fit(&scaled, 0.1).unwrap()),
            lof: Some(LocalOutlierFactor::fit(&scaled, 20, 0.1).unwrap()),
        };
        let mut importance = IndexMap::new();
        importance.insert("a".to_string(), 1.0);
        importance.insert("b".to_string(), 0.7);
        ModelBundle {
            version: BUNDLE_VERSION,
            scaler,
            detectors,
            feature_importance: importance,
            feature_vocabulary: vec!["a".into(), "b".into(), "c".into()],
            trained_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            sample_count: 40,
        }
    }

    #[test]
    fn test_round_trip_preserves_scoring() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = fitted_bundle();
        bundle.save(dir.path(), 7).unwrap();

        let restored = ModelBundle::load(dir.path(), 7).unwrap();
        assert_eq!(restored.sample_count, 40);
        assert_eq!(restored.feature_vocabulary, bundle.feature_vocabulary);
        assert_eq!(restored.detectors.count(), 3);

        let query = bundle.scaler.transform(&[2.0, 1.0, 1.0]);
        let a = bundle
            .detectors
            .iforest
            .as_ref()
            .unwrap()
            .decision_function(&query);
        let b = restored
            .detectors
            .iforest
            .as_ref()
            .unwrap()
            .decision_function(&query);
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_bundle_is_model_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelBundle::load(dir.path(), 99).unwrap_err();
        assert!(matches!(err, VigilError::ModelUnavailable(_)));
    }

    #[test]
    fn test_corrupt_bundle_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(bundle_path(dir.path(), 5), "{not json").unwrap();
        let err = ModelBundle::load(dir.path(), 5).unwrap_err();
        assert!(matches!(err, VigilError::Serialization(_)));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut bundle = fitted_bundle();
        bundle.version = 99;
        // bypass save() to write the bad version directly
        std::fs::write(
            bundle_path(dir.path(), 3),
            serde_json::to_string(&bundle).unwrap(),
        )
        .unwrap();
        let err = ModelBundle::load(dir.path(), 3).unwrap_err();
        assert!(matches!(err, VigilError::Internal(_)));
    }

    #[test]
    fn test_save_overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        let mut bundle = fitted_bundle();
        bundle.save(dir.path(), 1).unwrap();
        bundle.sample_count = 99;
        bundle.save(dir.path(), 1).unwrap();
        let restored = ModelBundle::load(dir.path(), 1).unwrap();
        assert_eq!(restored.sample_count, 99);
    }

    #[test]
    fn test_available_names() {
        let detectors = Detectors {
            iforest: None,
            ocsvm: Some(OneClassSvm::fit(&training_data(), 0.1).unwrap()),
            lof: None,
        };
        assert_eq!(detectors.available(), vec![DETECTOR_OCSVM]);
        assert_eq!(detectors.count(), 1);
    }
}
