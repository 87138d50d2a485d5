//! Per-user training pipeline.
//!
//! Collects a user's recent behavioral events, aggregates them into
//! per-session vectors, fits the scaler and the three detectors, and
//! persists the resulting bundle plus a refreshed behavioral profile.
//! Insufficient data or an all-detector failure produce a structured
//! unsuccessful report; an existing bundle is never clobbered on the
//! failure path.

use crate::bundle::{Detectors, ModelBundle, BUNDLE_VERSION};
use crate::iforest::IsolationForest;
use crate::lof::LocalOutlierFactor;
use crate::ocsvm::OneClassSvm;
use crate::scaler::Scaler;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};
use vigil_behavior::SessionFeatureExtractor;
use vigil_core::error::ErrorKind;
use vigil_core::{
    feature_vocabulary, vector_from_map, BehavioralEvent, BehavioralProfile, EngineConfig, Result,
};
use vigil_store::Store;

/// Event-history window considered for training.
const TRAINING_WINDOW_DAYS: i64 = 30;
/// Minimum raw events across the window.
const MIN_EVENTS: usize = 50;
/// Minimum qualifying sessions (vectors) to fit on.
const MIN_SESSIONS: usize = 10;
/// Minimum events for a session to qualify as a training sample.
const MIN_EVENTS_PER_SESSION: usize = 10;
/// Expected outlier fraction in the user's own history.
const CONTAMINATION: f64 = 0.1;
/// Margin-model boundary fraction.
const NU: f64 = 0.1;
const LOF_NEIGHBORS: usize = 20;
/// Fixed seed: training is deterministic per data set.
const FOREST_SEED: u64 = 42;

/// Outcome of one training run, returned verbatim to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub success: bool,
    pub message: String,
    pub samples_collected: usize,
    pub event_count: usize,
    pub models_trained: Vec<String>,
    pub feature_importance: IndexMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl TrainingReport {
    fn failure(message: &str, kind: ErrorKind, samples: usize, events: usize) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            samples_collected: samples,
            event_count: events,
            models_trained: Vec::new(),
            feature_importance: IndexMap::new(),
            bundle_path: None,
            error_kind: Some(kind),
        }
    }
}

/// Train (or retrain) the anomaly model for one user.
pub fn train_user(
    store: &Store,
    config: &EngineConfig,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<TrainingReport> {
    info!(user_id, "Training behavioral model");

    let cutoff = now - Duration::days(TRAINING_WINDOW_DAYS);
    let events = store.events_for_user_since(user_id, cutoff)?;
    if events.len() < MIN_EVENTS {
        warn!(user_id, events = events.len(), "Insufficient training events");
        return Ok(TrainingReport::failure(
            "insufficient training data",
            ErrorKind::InsufficientData,
            0,
            events.len(),
        ));
    }

    let (vectors, session_features) = session_vectors(&events);
    if vectors.len() < MIN_SESSIONS {
        warn!(
            user_id,
            sessions = vectors.len(),
            "Insufficient qualifying sessions"
        );
        return Ok(TrainingReport::failure(
            "insufficient qualifying sessions",
            ErrorKind::InsufficientData,
            vectors.len(),
            events.len(),
        ));
    }

    let scaler = Scaler::fit(&vectors)?;
    let scaled = scaler.transform_all(&vectors);

    let mut detectors = Detectors::default();
    match IsolationForest::fit(&scaled, CONTAMINATION, FOREST_SEED) {
        Ok(forest) => detectors.iforest = Some(forest),
        Err(e) => warn!(user_id, error = %e, "Isolation forest failed to fit"),
    }
    match OneClassSvm::fit(&scaled, NU) {
        Ok(svm) => detectors.ocsvm = Some(svm),
        Err(e) => warn!(user_id, error = %e, "One-class margin model failed to fit"),
    }
    match LocalOutlierFactor::fit(&scaled, LOF_NEIGHBORS, CONTAMINATION) {
        Ok(lof) => detectors.lof = Some(lof),
        Err(e) => warn!(user_id, error = %e, "Local outlier factor failed to fit"),
    }

    if detectors.count() == 0 {
        // never persist a partial bundle; the previous one stays intact
        return Ok(TrainingReport::failure(
            "all detectors failed to fit",
            ErrorKind::Internal,
            vectors.len(),
            events.len(),
        ));
    }

    let importance = feature_importance(&scaled);
    let models_trained: Vec<String> = detectors.available().iter().map(|s| s.to_string()).collect();

    let bundle = ModelBundle {
        version: BUNDLE_VERSION,
        scaler,
        detectors,
        feature_importance: importance.clone(),
        feature_vocabulary: feature_vocabulary(),
        trained_at: now,
        sample_count: vectors.len(),
    };
    let bundle_path = bundle.save(&config.model_dir, user_id)?;

    store.upsert_profile(&build_profile(user_id, &session_features, now))?;

    info!(
        user_id,
        samples = vectors.len(),
        detectors = models_trained.len(),
        "Model trained"
    );

    Ok(TrainingReport {
        success: true,
        message: "model trained successfully".to_string(),
        samples_collected: vectors.len(),
        event_count: events.len(),
        models_trained,
        feature_importance: importance.into_iter().take(10).collect(),
        bundle_path: Some(bundle_path),
        error_kind: None,
    })
}

/// Group events by session and aggregate each qualifying session into a
/// fixed-length vector.
fn session_vectors(
    events: &[BehavioralEvent],
) -> (Vec<Vec<f64>>, Vec<BTreeMap<String, f64>>) {
    let mut by_session: BTreeMap<i64, Vec<BehavioralEvent>> = BTreeMap::new();
    for event in events {
        by_session
            .entry(event.session_id)
            .or_default()
            .push(event.clone());
    }

    let mut vectors = Vec::new();
    let mut feature_maps = Vec::new();
    for session_events in by_session.values() {
        if session_events.len() < MIN_EVENTS_PER_SESSION {
            continue;
        }
        let features = SessionFeatureExtractor::extract(session_events);
        if features.is_empty() {
            continue;
        }
        vectors.push(vector_from_map(&features));
        feature_maps.push(features);
    }
    (vectors, feature_maps)
}

/// Per-feature variance over the scaled matrix, normalised by the
/// largest variance, sorted descending.
fn feature_importance(scaled: &[Vec<f64>]) -> IndexMap<String, f64> {
    let names = feature_vocabulary();
    let dims = scaled.first().map(|v| v.len()).unwrap_or(0);

    let n = scaled.len() as f64;
    let mut variances = vec![0.0_f64; dims];
    for dim in 0..dims {
        let mean: f64 = scaled.iter().map(|v| v[dim]).sum::<f64>() / n;
        variances[dim] = scaled.iter().map(|v| (v[dim] - mean).powi(2)).sum::<f64>() / n;
    }
    let max = variances.iter().copied().fold(0.0_f64, f64::max).max(f64::MIN_POSITIVE);

    let mut entries: Vec<(String, f64)> = names
        .into_iter()
        .zip(variances)
        .map(|(name, var)| (name, var / max))
        .collect();
    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    entries.into_iter().collect()
}

/// Rebuild the user's behavioral profile from the training feature maps.
fn build_profile(
    user_id: i64,
    session_features: &[BTreeMap<String, f64>],
    now: DateTime<Utc>,
) -> BehavioralProfile {
    let mut values_by_name: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for features in session_features {
        for (name, value) in features {
            values_by_name.entry(name).or_default().push(*value);
        }
    }

    let mut keystroke_stats = BTreeMap::new();
    let mut pointer_stats = BTreeMap::new();
    for (name, values) in values_by_name {
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let std =
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64).sqrt();
        let target = if name.starts_with("ks_") {
            &mut keystroke_stats
        } else if name.starts_with("ms_") {
            &mut pointer_stats
        } else {
            continue;
        };
        target.insert(format!("{name}_mean"), mean);
        target.insert(format!("{name}_std"), std);
    }

    BehavioralProfile {
        user_id,
        samples_count: session_features.len() as i64,
        confidence: (session_features.len() as f64 / 100.0).min(1.0),
        keystroke_stats,
        pointer_stats,
        last_updated: now,
    }
}

/// Aggregate outcome of a batch training sweep.
#[derive(Debug, Serialize)]
pub struct BatchTrainingReport {
    pub total_users: usize,
    pub trained: usize,
    pub skipped_existing: usize,
    pub insufficient_data: usize,
    pub failed: usize,
    pub details: Vec<UserTrainingDetail>,
}

#[derive(Debug, Serialize)]
pub struct UserTrainingDetail {
    pub user_id: i64,
    pub username: String,
    pub outcome: String,
}

/// Scan every user and train the ones without a persisted bundle.
pub fn train_missing_models(
    store: &Store,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<BatchTrainingReport> {
    let users = store.all_users()?;
    let mut report = BatchTrainingReport {
        total_users: users.len(),
        trained: 0,
        skipped_existing: 0,
        insufficient_data: 0,
        failed: 0,
        details: Vec::new(),
    };

    for user in users {
        let outcome = if crate::bundle::bundle_path(&config.model_dir, user.id).exists() {
            report.skipped_existing += 1;
            "skipped: bundle exists".to_string()
        } else {
            match train_user(store, config, user.id, now) {
                Ok(result) if result.success => {
                    report.trained += 1;
                    result.message
                }
                Ok(result) => {
                    if matches!(result.error_kind, Some(ErrorKind::InsufficientData)) {
                        report.insufficient_data += 1;
                    } else {
                        report.failed += 1;
                    }
                    result.message
                }
                Err(e) => {
                    report.failed += 1;
                    e.to_string()
                }
            }
        };
        report.details.push(UserTrainingDetail {
            user_id: user.id,
            username: user.username,
            outcome,
        });
    }

    Ok(report)
}
