//! Keystroke dynamics feature extraction.
//!
//! Input is one logical typing burst: an ordered batch of raw key
//! records with press/release timestamps. Output is a flat feature map
//! whose names form a closed set consumed by session aggregation.

use crate::stats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimum records in a burst before any features are emitted.
const MIN_BATCH_SIZE: usize = 5;

/// Feature prefix used for the coarse behavioral signature, in order.
const SIGNATURE_FEATURES: [&str; 5] = [
    "avg_dwell",
    "avg_flight",
    "typing_rhythm_variance",
    "pressure_consistency",
    "typing_cadence",
];

/// One raw key event as captured by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawKeystroke {
    #[serde(rename = "keyCode")]
    pub key_code: String,
    #[serde(rename = "downTs")]
    pub down_ts_ms: f64,
    #[serde(rename = "upTs")]
    pub up_ts_ms: f64,
    #[serde(rename = "isSpecialKey", default)]
    pub is_special: bool,
}

impl RawKeystroke {
    /// Key hold duration in milliseconds, clamped non-negative.
    pub fn dwell(&self) -> f64 {
        (self.up_ts_ms - self.down_ts_ms).max(0.0)
    }
}

/// Extract dwell/flight/rhythm features from an ordered keystroke burst.
///
/// Fewer than five records produce an empty map: bursts that short carry
/// no usable rhythm signal. Flight times may be negative on key rollover
/// and are clamped to zero.
pub fn extract_features(batch: &[RawKeystroke]) -> BTreeMap<String, f64> {
    let mut features = BTreeMap::new();
    if batch.len() < MIN_BATCH_SIZE {
        return features;
    }

    let dwell_times: Vec<f64> = batch.iter().map(RawKeystroke::dwell).collect();
    let flight_times: Vec<f64> = batch
        .windows(2)
        .map(|pair| (pair[1].down_ts_ms - pair[0].up_ts_ms).max(0.0))
        .collect();

    features.insert("avg_dwell".to_string(), stats::mean(&dwell_times));
    features.insert("std_dwell".to_string(), stats::std_dev(&dwell_times));
    features.insert(
        "min_dwell".to_string(),
        dwell_times.iter().copied().fold(f64::INFINITY, f64::min),
    );
    features.insert(
        "max_dwell".to_string(),
        dwell_times.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    );

    if !flight_times.is_empty() {
        features.insert("avg_flight".to_string(), stats::mean(&flight_times));
        features.insert("std_flight".to_string(), stats::std_dev(&flight_times));
        features.insert(
            "min_flight".to_string(),
            flight_times.iter().copied().fold(f64::INFINITY, f64::min),
        );
        features.insert(
            "max_flight".to_string(),
            flight_times.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        );
        features.insert(
            "typing_rhythm_variance".to_string(),
            stats::variance(&flight_times),
        );
    }

    let dwell_mean = stats::mean(&dwell_times);
    if dwell_mean > 0.0 {
        let cv = stats::std_dev(&dwell_times) / dwell_mean;
        features.insert("pressure_consistency".to_string(), 1.0 / (1.0 + cv));
    }

    features.insert("typing_cadence".to_string(), typing_cadence(batch));

    let count = batch.len() as f64;
    let special = batch.iter().filter(|k| k.is_special).count() as f64;
    features.insert("special_key_ratio".to_string(), special / count);

    let backspaces = batch.iter().filter(|k| k.key_code == "Backspace").count() as f64;
    features.insert("error_correction_rate".to_string(), backspaces / count);

    features
}

/// Overall typing cadence in keys per second over the burst, measured
/// between the first and last key-down. Zero when the span collapses.
fn typing_cadence(batch: &[RawKeystroke]) -> f64 {
    if batch.len() < 2 {
        return 0.0;
    }
    let span_s = (batch[batch.len() - 1].down_ts_ms - batch[0].down_ts_ms) / 1000.0;
    if span_s > 0.0 {
        batch.len() as f64 / span_s
    } else {
        0.0
    }
}

/// Compact quantized signature for coarse profile comparison.
///
/// Deterministic: each of the five signature features present in the
/// map is clamped to [0, 1000], floor-divided by 10, and the results
/// are joined with underscores.
pub fn behavioral_signature(features: &BTreeMap<String, f64>) -> String {
    let mut parts = Vec::new();
    for name in SIGNATURE_FEATURES {
        if let Some(value) = features.get(name) {
            let quantized = (value.clamp(0.0, 1000.0) / 10.0).floor() as i64;
            parts.push(quantized.to_string());
        }
    }
    parts.join("_")
}
