//! Session-level feature aggregation.
//!
//! Collapses a session's ordered event stream into one feature map over
//! the closed vocabulary: statistical aggregates of the per-event
//! keystroke and pointer features, temporal activity patterns, and
//! cross-modal interaction features. `vigil_core::vector_from_map` turns
//! the result into the fixed-length vector the model consumes.

use crate::stats;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use vigil_core::{BehavioralEvent, EventKind};

/// Length of one activity histogram bin in seconds.
const ACTIVITY_BIN_SECONDS: f64 = 30.0;
/// Maximum number of activity histogram bins.
const MAX_ACTIVITY_BINS: usize = 10;
/// Gap below which two consecutive events form an activity burst.
const BURST_GAP_SECONDS: f64 = 0.5;
/// Minimum presence-series span for cross-modal correlation.
const MIN_CORRELATION_SPAN_SECONDS: f64 = 10.0;

/// Aggregates one session's events into the model's feature space.
pub struct SessionFeatureExtractor;

impl SessionFeatureExtractor {
    /// Extract the complete session feature map. `events` must be in
    /// time order (the store query guarantees this).
    pub fn extract(events: &[BehavioralEvent]) -> BTreeMap<String, f64> {
        let mut features = BTreeMap::new();
        if events.is_empty() {
            return features;
        }

        let keystroke_maps: Vec<&BTreeMap<String, f64>> = events
            .iter()
            .filter(|e| e.kind == EventKind::Keystroke)
            .map(|e| &e.features)
            .collect();
        let pointer_maps: Vec<&BTreeMap<String, f64>> = events
            .iter()
            .filter(|e| e.kind == EventKind::Pointer)
            .map(|e| &e.features)
            .collect();

        if !keystroke_maps.is_empty() {
            aggregate_modality(&keystroke_maps, "ks", false, &mut features);
            keystroke_patterns(&keystroke_maps, &mut features);
        }
        if !pointer_maps.is_empty() {
            aggregate_modality(&pointer_maps, "ms", true, &mut features);
            pointer_patterns(&pointer_maps, &mut features);
        }

        temporal_features(events, &mut features);

        if !keystroke_maps.is_empty() && !pointer_maps.is_empty() {
            cross_modal_features(events, &mut features);
        }

        debug!(
            events = events.len(),
            features = features.len(),
            "Aggregated session features"
        );
        features
    }
}

/// Per-feature statistical aggregation across a modality's event maps.
/// Keystroke aggregation emits mean/std/median/iqr; pointer aggregation
/// additionally emits min/max.
fn aggregate_modality(
    maps: &[&BTreeMap<String, f64>],
    prefix: &str,
    with_extremes: bool,
    out: &mut BTreeMap<String, f64>,
) {
    let mut names = BTreeSet::new();
    for map in maps {
        names.extend(map.keys().cloned());
    }

    for name in names {
        let values: Vec<f64> = maps.iter().filter_map(|m| m.get(&name)).copied().collect();
        if values.is_empty() {
            continue;
        }
        out.insert(format!("{prefix}_{name}_mean"), stats::mean(&values));
        out.insert(format!("{prefix}_{name}_std"), stats::std_dev(&values));
        out.insert(format!("{prefix}_{name}_median"), stats::median(&values));
        if with_extremes {
            out.insert(
                format!("{prefix}_{name}_min"),
                values.iter().copied().fold(f64::INFINITY, f64::min),
            );
            out.insert(
                format!("{prefix}_{name}_max"),
                values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            );
        } else {
            out.insert(format!("{prefix}_{name}_iqr"), stats::iqr(&values));
        }
    }
}

/// Values of one per-event feature across all maps, absent entries as 0.
fn feature_series(maps: &[&BTreeMap<String, f64>], name: &str) -> Vec<f64> {
    maps.iter()
        .map(|m| m.get(name).copied().unwrap_or(0.0))
        .collect()
}

fn keystroke_patterns(maps: &[&BTreeMap<String, f64>], out: &mut BTreeMap<String, f64>) {
    if maps.len() > 1 {
        let dwell_means = feature_series(maps, "avg_dwell");
        let flight_means = feature_series(maps, "avg_flight");
        out.insert(
            "ks_dwell_consistency".to_string(),
            1.0 / (1.0 + stats::std_dev(&dwell_means)),
        );
        out.insert(
            "ks_flight_consistency".to_string(),
            1.0 / (1.0 + stats::std_dev(&flight_means)),
        );
    }

    let rhythm_vars = feature_series(maps, "typing_rhythm_variance");
    out.insert(
        "ks_rhythm_stability".to_string(),
        1.0 / (1.0 + stats::mean(&rhythm_vars)),
    );

    let error_rates = feature_series(maps, "error_correction_rate");
    out.insert(
        "ks_error_consistency".to_string(),
        1.0 - stats::std_dev(&error_rates),
    );
}

fn pointer_patterns(maps: &[&BTreeMap<String, f64>], out: &mut BTreeMap<String, f64>) {
    if maps.len() > 1 {
        let velocity_means = feature_series(maps, "velocity_mean");
        let smoothness = feature_series(maps, "movement_smoothness");
        out.insert(
            "ms_velocity_consistency".to_string(),
            1.0 / (1.0 + stats::std_dev(&velocity_means)),
        );
        out.insert(
            "ms_smoothness_consistency".to_string(),
            1.0 / (1.0 + stats::std_dev(&smoothness)),
        );
    }

    let precisions = feature_series(maps, "click_precision");
    out.insert(
        "ms_click_stability".to_string(),
        1.0 - stats::std_dev(&precisions),
    );

    let efficiencies = feature_series(maps, "path_efficiency");
    out.insert(
        "ms_efficiency_trend".to_string(),
        stats::mean(&efficiencies),
    );
}

fn timestamps(events: &[BehavioralEvent]) -> Vec<DateTime<Utc>> {
    events.iter().map(|e| e.timestamp).collect()
}

fn seconds_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (b - a).num_milliseconds() as f64 / 1000.0
}

fn temporal_features(events: &[BehavioralEvent], out: &mut BTreeMap<String, f64>) {
    if events.len() < 2 {
        return;
    }
    let times = timestamps(events);
    let gaps: Vec<f64> = times
        .windows(2)
        .map(|pair| seconds_between(pair[0], pair[1]))
        .collect();

    out.insert("temporal_avg_interval".to_string(), stats::mean(&gaps));
    out.insert("temporal_std_interval".to_string(), stats::std_dev(&gaps));
    out.insert(
        "temporal_max_gap".to_string(),
        gaps.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    );
    out.insert(
        "temporal_activity_bursts".to_string(),
        gaps.iter().filter(|g| **g < BURST_GAP_SECONDS).count() as f64,
    );

    let duration = seconds_between(times[0], times[times.len() - 1]);
    out.insert("temporal_session_duration".to_string(), duration);
    out.insert(
        "temporal_event_rate".to_string(),
        if duration > 0.0 {
            events.len() as f64 / duration
        } else {
            0.0
        },
    );

    activity_distribution(&times, out);
}

/// Histogram the session into 30-second bins (at most ten) and derive
/// how evenly activity is spread and how sharp its peak is.
fn activity_distribution(times: &[DateTime<Utc>], out: &mut BTreeMap<String, f64>) {
    if times.len() < 10 {
        return;
    }
    let duration = seconds_between(times[0], times[times.len() - 1]);
    if duration <= 0.0 {
        return;
    }
    let num_bins = MAX_ACTIVITY_BINS.min((duration / ACTIVITY_BIN_SECONDS) as usize);
    if num_bins < 2 {
        return;
    }

    let bin_size = duration / num_bins as f64;
    let mut counts = vec![0.0_f64; num_bins];
    for t in times {
        let offset = seconds_between(times[0], *t);
        let idx = ((offset / bin_size) as usize).min(num_bins - 1);
        counts[idx] += 1.0;
    }

    let mean = stats::mean(&counts);
    if mean > 0.0 {
        out.insert(
            "activity_uniformity".to_string(),
            1.0 - stats::std_dev(&counts) / mean,
        );
        out.insert(
            "activity_peak_ratio".to_string(),
            counts.iter().copied().fold(f64::NEG_INFINITY, f64::max) / mean,
        );
    }
}

fn cross_modal_features(events: &[BehavioralEvent], out: &mut BTreeMap<String, f64>) {
    let ks_times: Vec<DateTime<Utc>> = events
        .iter()
        .filter(|e| e.kind == EventKind::Keystroke)
        .map(|e| e.timestamp)
        .collect();
    let ms_times: Vec<DateTime<Utc>> = events
        .iter()
        .filter(|e| e.kind == EventKind::Pointer)
        .map(|e| e.timestamp)
        .collect();

    out.insert(
        "cross_ks_ms_ratio".to_string(),
        ks_times.len() as f64 / ms_times.len() as f64,
    );
    out.insert(
        "cross_temporal_correlation".to_string(),
        temporal_correlation(&ks_times, &ms_times),
    );

    multitask_patterns(events, out);
}

/// Pearson correlation of the 1 Hz binary presence series of the two
/// modalities. Sessions shorter than ten seconds (or with fewer than
/// five events on either side) carry no signal and score 0.
fn temporal_correlation(ks_times: &[DateTime<Utc>], ms_times: &[DateTime<Utc>]) -> f64 {
    if ks_times.len() < 5 || ms_times.len() < 5 {
        return 0.0;
    }
    let start = match ks_times.iter().chain(ms_times.iter()).min() {
        Some(t) => *t,
        None => return 0.0,
    };
    let end = match ks_times.iter().chain(ms_times.iter()).max() {
        Some(t) => *t,
        None => return 0.0,
    };
    let duration = seconds_between(start, end);
    if duration < MIN_CORRELATION_SPAN_SECONDS {
        return 0.0;
    }

    let bins = duration as usize;
    let mut ks_series = vec![0.0_f64; bins];
    let mut ms_series = vec![0.0_f64; bins];
    for t in ks_times {
        let idx = (seconds_between(start, *t) as usize).min(bins - 1);
        ks_series[idx] = 1.0;
    }
    for t in ms_times {
        let idx = (seconds_between(start, *t) as usize).min(bins - 1);
        ms_series[idx] = 1.0;
    }

    stats::pearson(&ks_series, &ms_series)
}

/// Modality-switching behavior: how often the user alternates between
/// typing and pointing, and how long they persist in one mode.
fn multitask_patterns(events: &[BehavioralEvent], out: &mut BTreeMap<String, f64>) {
    if events.len() < 10 {
        return;
    }

    let mut switches = 0usize;
    let mut current = events[0].kind;
    for event in &events[1..] {
        if event.kind != current {
            switches += 1;
            current = event.kind;
        }
    }
    out.insert(
        "multitask_switch_rate".to_string(),
        switches as f64 / events.len() as f64,
    );

    let mut durations = Vec::new();
    let mut mode_start = events[0].timestamp;
    let mut mode = events[0].kind;
    for event in &events[1..] {
        if event.kind != mode {
            durations.push(seconds_between(mode_start, event.timestamp));
            mode_start = event.timestamp;
            mode = event.kind;
        }
    }
    if !durations.is_empty() {
        out.insert(
            "multitask_avg_persistence".to_string(),
            stats::mean(&durations),
        );
        out.insert(
            "multitask_persistence_variance".to_string(),
            stats::variance(&durations),
        );
    }
}
