//! Pointer (mouse) behavioral feature extraction.
//!
//! A batch mixes movement samples and clicks. Movement carries the
//! client-computed distance/velocity/direction per sample; clicks carry
//! position and time. The extracted features form a closed set consumed
//! by session aggregation under the `ms_` prefix.

use crate::stats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimum records in a batch before any features are emitted.
const MIN_BATCH_SIZE: usize = 10;
/// Minimum movement samples within the batch.
const MIN_MOVE_EVENTS: usize = 5;
/// Inter-click gap below which a pair counts toward the double-click rate.
const DOUBLE_CLICK_WINDOW_MS: f64 = 500.0;
/// Velocity below which a movement sample counts as a pause.
const PAUSE_VELOCITY: f64 = 0.1;
/// Distance below which a movement sample counts as a micro movement.
const MICRO_DISTANCE: f64 = 5.0;

/// One raw pointer event as captured by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawPointerEvent {
    Move {
        x: f64,
        y: f64,
        distance: f64,
        velocity: f64,
        #[serde(rename = "direction")]
        direction_deg: f64,
        #[serde(rename = "timestamp")]
        ts_ms: f64,
    },
    Click {
        x: f64,
        y: f64,
        button: u8,
        #[serde(rename = "timestamp")]
        ts_ms: f64,
    },
}

struct MoveSample {
    x: f64,
    y: f64,
    distance: f64,
    velocity: f64,
    direction_deg: f64,
}

struct ClickSample {
    x: f64,
    y: f64,
    ts_ms: f64,
}

/// Extract movement/click features from an ordered pointer batch.
///
/// Requires at least ten records, five of them movement samples;
/// anything smaller returns an empty map.
pub fn extract_features(batch: &[RawPointerEvent]) -> BTreeMap<String, f64> {
    let mut features = BTreeMap::new();
    if batch.len() < MIN_BATCH_SIZE {
        return features;
    }

    let moves: Vec<MoveSample> = batch
        .iter()
        .filter_map(|e| match e {
            RawPointerEvent::Move {
                x,
                y,
                distance,
                velocity,
                direction_deg,
                ..
            } => Some(MoveSample {
                x: *x,
                y: *y,
                distance: *distance,
                velocity: *velocity,
                direction_deg: *direction_deg,
            }),
            _ => None,
        })
        .collect();
    let clicks: Vec<ClickSample> = batch
        .iter()
        .filter_map(|e| match e {
            RawPointerEvent::Click { x, y, ts_ms, .. } => Some(ClickSample {
                x: *x,
                y: *y,
                ts_ms: *ts_ms,
            }),
            _ => None,
        })
        .collect();

    if moves.len() < MIN_MOVE_EVENTS {
        return features;
    }

    // Velocity distribution over samples with actual motion
    let moving: Vec<f64> = moves
        .iter()
        .map(|m| m.velocity)
        .filter(|v| *v > 0.0)
        .collect();
    if !moving.is_empty() {
        features.insert("velocity_mean".to_string(), stats::mean(&moving));
        features.insert("velocity_std".to_string(), stats::std_dev(&moving));
        features.insert("velocity_skewness".to_string(), stats::skewness(&moving));
        features.insert("velocity_kurtosis".to_string(), stats::kurtosis(&moving));
    }

    features.insert("path_efficiency".to_string(), path_efficiency(&moves));

    let all_velocities: Vec<f64> = moves.iter().map(|m| m.velocity).collect();
    features.insert(
        "movement_smoothness".to_string(),
        movement_smoothness(&all_velocities),
    );
    features.insert(
        "direction_consistency".to_string(),
        direction_consistency(&moves),
    );

    if !clicks.is_empty() {
        features.insert("click_precision".to_string(), click_precision(&clicks));
        features.insert(
            "double_click_rate".to_string(),
            double_click_rate(&clicks),
        );
        features.insert(
            "click_duration_variance".to_string(),
            click_interval_variance(&clicks),
        );
    }

    let pauses = moves.iter().filter(|m| m.velocity < PAUSE_VELOCITY).count();
    features.insert(
        "pause_frequency".to_string(),
        pauses as f64 / moves.len() as f64,
    );

    let micro = moves.iter().filter(|m| m.distance < MICRO_DISTANCE).count();
    features.insert(
        "micro_movement_ratio".to_string(),
        micro as f64 / moves.len() as f64,
    );

    features.insert(
        "movement_rhythm".to_string(),
        movement_rhythm(&all_velocities),
    );
    features.insert(
        "acceleration_consistency".to_string(),
        acceleration_consistency(&moving),
    );

    features
}

/// Straight-line displacement divided by total travelled path length.
/// A path with no travelled distance is considered perfectly efficient.
fn path_efficiency(moves: &[MoveSample]) -> f64 {
    if moves.len() < 2 {
        return 1.0;
    }
    let total: f64 = moves.iter().map(|m| m.distance).sum();
    if total == 0.0 {
        return 1.0;
    }
    let start = &moves[0];
    let end = &moves[moves.len() - 1];
    let direct = ((end.x - start.x).powi(2) + (end.y - start.y).powi(2)).sqrt();
    direct / total
}

/// Inverse mean jerk: lower velocity change between consecutive samples
/// means smoother movement.
fn movement_smoothness(velocities: &[f64]) -> f64 {
    if velocities.len() < 3 {
        return 1.0;
    }
    let jerks: Vec<f64> = velocities
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).abs())
        .collect();
    1.0 / (1.0 + stats::mean(&jerks))
}

/// Fraction of consecutive samples that do NOT change direction by more
/// than 45 degrees, clamped non-negative.
fn direction_consistency(moves: &[MoveSample]) -> f64 {
    if moves.len() < 2 {
        return 1.0;
    }
    let mut changes = 0usize;
    for pair in moves.windows(2) {
        let raw = (pair[1].direction_deg - pair[0].direction_deg).abs();
        let angle = raw.min(360.0 - raw);
        if angle > 45.0 {
            changes += 1;
        }
    }
    (1.0 - changes as f64 / moves.len() as f64).max(0.0)
}

/// Inverse of the mean pairwise distance between click positions,
/// normalized by 100 px. Tight clusters score near 1.
fn click_precision(clicks: &[ClickSample]) -> f64 {
    if clicks.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..clicks.len() {
        for j in (i + 1)..clicks.len() {
            let dx = clicks[i].x - clicks[j].x;
            let dy = clicks[i].y - clicks[j].y;
            total += (dx * dx + dy * dy).sqrt();
            pairs += 1;
        }
    }
    let avg = total / pairs as f64;
    1.0 / (1.0 + avg / 100.0)
}

/// Fraction of consecutive click pairs landing inside the double-click
/// window.
fn double_click_rate(clicks: &[ClickSample]) -> f64 {
    if clicks.len() < 2 {
        return 0.0;
    }
    let doubles = clicks
        .windows(2)
        .filter(|pair| pair[1].ts_ms - pair[0].ts_ms < DOUBLE_CLICK_WINDOW_MS)
        .count();
    doubles as f64 / clicks.len() as f64
}

/// Variance of inter-click intervals in milliseconds.
fn click_interval_variance(clicks: &[ClickSample]) -> f64 {
    if clicks.len() < 2 {
        return 0.0;
    }
    let intervals: Vec<f64> = clicks
        .windows(2)
        .map(|pair| pair[1].ts_ms - pair[0].ts_ms)
        .collect();
    stats::variance(&intervals)
}

/// Rhythmic regularity of movement: mean absolute autocorrelation of
/// the velocity series over lags 1..min(10, n/2). NaN correlations
/// (constant windows) contribute zero.
fn movement_rhythm(velocities: &[f64]) -> f64 {
    if velocities.len() < 10 {
        return 0.0;
    }
    let max_lag = 10.min(velocities.len() / 2);
    if max_lag < 2 {
        return 0.0;
    }
    let mut score = 0.0;
    let mut lags = 0usize;
    for lag in 1..max_lag {
        let head = &velocities[..velocities.len() - lag];
        let tail = &velocities[lag..];
        score += stats::pearson(head, tail).abs();
        lags += 1;
    }
    score / lags as f64
}

/// Inverse variance of the acceleration series (consecutive velocity
/// deltas).
fn acceleration_consistency(velocities: &[f64]) -> f64 {
    if velocities.len() < 3 {
        return 0.0;
    }
    let accelerations: Vec<f64> = velocities
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect();
    1.0 / (1.0 + stats::variance(&accelerations))
}
