//! Closed feature vocabulary consumed by the anomaly model.
//!
//! Session aggregation produces an open-ended feature map; the model
//! consumes a fixed-length vector. This module pins the canonical
//! ordering. The list is part of every persisted model bundle; after
//! training it must not change without retraining.

use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Canonical ordering of the session features submitted to the model.
pub const FEATURE_VOCABULARY: [&str; 24] = [
    // Keystroke features
    "ks_avg_dwell_mean",
    "ks_avg_dwell_std",
    "ks_avg_flight_mean",
    "ks_typing_rhythm_variance_mean",
    "ks_pressure_consistency_mean",
    "ks_dwell_consistency",
    "ks_flight_consistency",
    "ks_rhythm_stability",
    "ks_error_consistency",
    // Pointer features
    "ms_velocity_mean_mean",
    "ms_velocity_mean_std",
    "ms_path_efficiency_mean",
    "ms_movement_smoothness_mean",
    "ms_click_precision_mean",
    "ms_velocity_consistency",
    "ms_smoothness_consistency",
    // Temporal features
    "temporal_avg_interval",
    "temporal_std_interval",
    "temporal_event_rate",
    "activity_uniformity",
    "activity_peak_ratio",
    // Cross-modal features
    "cross_ks_ms_ratio",
    "cross_temporal_correlation",
    "multitask_switch_rate",
];

/// Number of entries in the canonical vocabulary.
pub const FEATURE_COUNT: usize = FEATURE_VOCABULARY.len();

/// Closed set of per-event feature names the extractors can emit.
/// Anything outside this list is discarded when events are read back.
pub const EVENT_FEATURE_NAMES: [&str; 27] = [
    // Keystroke extractor
    "avg_dwell",
    "std_dwell",
    "min_dwell",
    "max_dwell",
    "avg_flight",
    "std_flight",
    "min_flight",
    "max_flight",
    "typing_rhythm_variance",
    "pressure_consistency",
    "typing_cadence",
    "special_key_ratio",
    "error_correction_rate",
    // Pointer extractor
    "velocity_mean",
    "velocity_std",
    "velocity_skewness",
    "velocity_kurtosis",
    "path_efficiency",
    "movement_smoothness",
    "direction_consistency",
    "click_precision",
    "double_click_rate",
    "click_duration_variance",
    "pause_frequency",
    "micro_movement_ratio",
    "movement_rhythm",
    "acceleration_consistency",
];

static EVENT_FEATURE_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| EVENT_FEATURE_NAMES.iter().copied().collect());

/// Whether a per-event feature name belongs to the closed extractor set.
pub fn is_event_feature(name: &str) -> bool {
    EVENT_FEATURE_SET.contains(name)
}

static FEATURE_INDEX: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    FEATURE_VOCABULARY
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, i))
        .collect()
});

/// Position of a feature in the canonical vector, if it is part of the
/// vocabulary. Unknown names are rejected.
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_INDEX.get(name).copied()
}

/// The vocabulary as an owned list, in canonical order.
pub fn feature_vocabulary() -> Vec<String> {
    FEATURE_VOCABULARY.iter().map(|s| s.to_string()).collect()
}

/// Assemble a fixed-length vector from a feature map.
///
/// Missing features default to 0.0, non-finite values are zeroed, and
/// keys outside the vocabulary are discarded.
pub fn vector_from_map(features: &BTreeMap<String, f64>) -> Vec<f64> {
    let mut vector = vec![0.0; FEATURE_COUNT];
    for (name, value) in features {
        if let Some(idx) = feature_index(name) {
            vector[idx] = if value.is_finite() { *value } else { 0.0 };
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_has_no_duplicates() {
        let mut names: Vec<&str> = FEATURE_VOCABULARY.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_index_matches_ordering() {
        for (i, name) in FEATURE_VOCABULARY.iter().enumerate() {
            assert_eq!(feature_index(name), Some(i));
        }
        assert_eq!(feature_index("ks_made_up"), None);
    }

    #[test]
    fn test_vector_defaults_and_rejects_unknown() {
        let mut map = BTreeMap::new();
        map.insert("ks_avg_dwell_mean".to_string(), 87.6);
        map.insert("not_a_feature".to_string(), 123.0);
        map.insert("temporal_event_rate".to_string(), f64::NAN);

        let vector = vector_from_map(&map);
        assert_eq!(vector.len(), FEATURE_COUNT);
        assert_eq!(vector[0], 87.6);
        // NaN zeroed
        assert_eq!(vector[feature_index("temporal_event_rate").unwrap()], 0.0);
        // unknown key contributed nothing
        assert_eq!(vector.iter().filter(|v| **v != 0.0).count(), 1);
    }

    #[test]
    fn test_event_feature_membership() {
        assert!(is_event_feature("avg_dwell"));
        assert!(is_event_feature("movement_rhythm"));
        assert!(!is_event_feature("ks_avg_dwell_mean")); // session-level, not per-event
        assert!(!is_event_feature("totally_made_up"));
    }

    #[test]
    fn test_vector_zeroes_infinities() {
        let mut map = BTreeMap::new();
        map.insert("activity_peak_ratio".to_string(), f64::INFINITY);
        map.insert("activity_uniformity".to_string(), f64::NEG_INFINITY);
        let vector = vector_from_map(&map);
        assert!(vector.iter().all(|v| v.is_finite()));
        assert!(vector.iter().all(|v| *v == 0.0));
    }
}
