//! Composite trust scoring.
//!
//! One calculation reads a self-consistent store snapshot, combines
//! five component signals into a bounded score, classifies it, applies
//! the write-back rules (idle decay, per-update decay cap, re-auth
//! clamp, termination), and reports the result. Failures downstream
//! degrade into a neutral-moderate result with an `error` field; the
//! stored trust is never modified on that path.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vigil_behavior::{stats, SessionFeatureExtractor};
use vigil_core::config::TrustWeights;
use vigil_core::{
    EngineConfig, Result, RiskLevel, SecurityAction, SessionRecord, TrustLevel, VigilError,
};
use vigil_model::{Prediction, Predictor};
use vigil_store::{Snapshot, Store};

/// Window for the temporal-consistency component.
const TEMPORAL_WINDOW_MIN: i64 = 10;
/// Most recent events considered for temporal consistency.
const TEMPORAL_EVENT_LIMIT: usize = 20;
/// Window for the anomaly-frequency component.
const ANOMALY_WINDOW_MIN: i64 = 15;
/// History considered for the historical-trust component.
const HISTORY_DAYS: i64 = 7;
const HISTORY_SESSION_LIMIT: usize = 10;
/// Session-context duration boundaries in seconds.
const SHORT_SESSION_S: f64 = 60.0;
const LONG_SESSION_S: f64 = 8.0 * 3600.0;
/// Trend band: smaller swings count as stable.
const STABLE_BAND: f64 = 0.05;

/// The five component scores feeding the composite.
#[derive(Debug, Clone, Serialize)]
pub struct TrustComponents {
    pub behavioral: f64,
    pub temporal: f64,
    pub context: f64,
    pub historical: f64,
    pub anomaly_freq: f64,
}

/// Direction of the score relative to the previous stored value.
#[derive(Debug, Clone, Serialize)]
pub struct TrustTrend {
    pub trend: &'static str,
    pub change: f64,
    pub previous_score: f64,
    pub change_magnitude: f64,
}

impl TrustTrend {
    fn from_change(previous: f64, current: f64) -> Self {
        let change = current - previous;
        let trend = if change.abs() < STABLE_BAND {
            "stable"
        } else if change > 0.0 {
            "increasing"
        } else {
            "decreasing"
        };
        Self {
            trend,
            change,
            previous_score: previous,
            change_magnitude: change.abs(),
        }
    }
}

/// Complete result of one trust calculation.
#[derive(Debug, Clone, Serialize)]
pub struct TrustReport {
    pub session_id: i64,
    pub user_id: Option<i64>,
    pub trust_score: f64,
    pub trust_level: TrustLevel,
    pub recommended_action: SecurityAction,
    pub confidence: f64,
    pub trust_components: Option<TrustComponents>,
    pub behavioral_analysis: Option<Prediction>,
    pub trust_trend: Option<TrustTrend>,
    pub calculated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TrustReport {
    /// Neutral-moderate fallback: the engine must stay available even
    /// when a calculation fails.
    pub fn fallback(session_id: i64, now: DateTime<Utc>, error: &str) -> Self {
        Self {
            session_id,
            user_id: None,
            trust_score: 0.5,
            trust_level: TrustLevel::Moderate,
            recommended_action: SecurityAction::IncreaseMonitoring,
            confidence: 0.0,
            trust_components: None,
            behavioral_analysis: None,
            trust_trend: None,
            calculated_at: now,
            error: Some(error.to_string()),
        }
    }
}

/// Weighted composite of the five components, normalised by the weight
/// sum and clamped to [0, 1].
pub fn compose(components: &TrustComponents, weights: &TrustWeights) -> f64 {
    let sum = weights.sum();
    if sum <= 0.0 {
        return 0.5;
    }
    let weighted = components.behavioral * weights.behavioral
        + components.temporal * weights.temporal
        + components.context * weights.context
        + components.historical * weights.historical
        + components.anomaly_freq * weights.anomaly_freq;
    (weighted / sum).clamp(0.0, 1.0)
}

/// Composite trust scoring service. Construct once at startup and share.
pub struct TrustEngine {
    config: Arc<EngineConfig>,
    predictor: Arc<Predictor>,
}

impl TrustEngine {
    pub fn new(config: Arc<EngineConfig>, predictor: Arc<Predictor>) -> Self {
        Self { config, predictor }
    }

    /// Calculate, classify, and write back the trust score for a
    /// session. Never fails outward: internal failures produce the
    /// neutral fallback with an `error` field.
    pub fn calculate(&self, store: &Store, session_id: i64, now: DateTime<Utc>) -> TrustReport {
        match store.snapshot(|snap| self.calculate_in(snap, session_id, now)) {
            Ok(report) => report,
            Err(e) => {
                warn!(session_id, error = %e, "Trust calculation failed, returning fallback");
                TrustReport::fallback(session_id, now, &e.to_string())
            }
        }
    }

    fn calculate_in(
        &self,
        snap: &Snapshot<'_>,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> Result<TrustReport> {
        let session = snap
            .session_by_id(session_id)?
            .ok_or_else(|| VigilError::NotFound(format!("session {session_id}")))?;
        if !session.is_active {
            return Err(VigilError::Unauthorized(format!(
                "session {session_id} is terminated"
            )));
        }

        // behavioral component from the anomaly model
        let events = snap.events_for_session(session_id)?;
        let features = SessionFeatureExtractor::extract(&events);
        let analysis = self
            .predictor
            .predict_features(session.user_id, &features, now);

        // no model for this user: the engine stays neutral rather than
        // inventing a score from nothing
        if analysis.risk_level == RiskLevel::Unknown {
            debug!(session_id, "No usable model, neutral trust result");
            let mut report = TrustReport::fallback(session_id, now, "");
            report.user_id = Some(session.user_id);
            report.behavioral_analysis = Some(analysis);
            report.error = None;
            return Ok(report);
        }

        let components = TrustComponents {
            behavioral: behavioral_score(&analysis),
            temporal: self.temporal_consistency(snap, session_id, now)?,
            context: self.session_context(snap, &session, now)?,
            historical: self.historical_trust(snap, &session, now)?,
            anomaly_freq: self.anomaly_frequency(snap, session_id, now)?,
        };

        let trust_score = compose(&components, &self.config.trust_weights);
        let trust_level = TrustLevel::from_score(trust_score);
        let recommended_action = trust_level.action();
        let trend = TrustTrend::from_change(session.current_trust, trust_score);

        self.write_back(snap, &session, trust_score, recommended_action, now)?;

        if matches!(trust_level, TrustLevel::Critical | TrustLevel::Low) {
            warn!(
                session_id,
                trust = trust_score,
                level = trust_level.as_str(),
                action = recommended_action.as_str(),
                "Low trust detected"
            );
        } else {
            debug!(session_id, trust = trust_score, "Trust score calculated");
        }

        Ok(TrustReport {
            session_id,
            user_id: Some(session.user_id),
            trust_score,
            trust_level,
            recommended_action,
            confidence: analysis.confidence,
            trust_components: Some(components),
            behavioral_analysis: Some(analysis),
            trust_trend: Some(trend),
            calculated_at: now,
            error: None,
        })
    }

    /// Event-timing regularity over the last ten minutes. Humans are
    /// neither perfectly regular nor chaotic: machine-gun regularity is
    /// penalised as bot-like.
    fn temporal_consistency(
        &self,
        snap: &Snapshot<'_>,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let cutoff = now - Duration::minutes(TEMPORAL_WINDOW_MIN);
        let recent = snap.recent_events_for_session(session_id, cutoff, TEMPORAL_EVENT_LIMIT)?;
        if recent.len() < 5 {
            return Ok(0.7);
        }

        // events come newest first; consecutive deltas are positive
        let intervals: Vec<f64> = recent
            .windows(2)
            .map(|pair| (pair[0].timestamp - pair[1].timestamp).num_milliseconds() as f64 / 1000.0)
            .collect();

        let avg = stats::mean(&intervals);
        let var = stats::variance(&intervals);
        let mut score = 1.0 / (1.0 + var / avg.max(1.0));
        if var < 0.1 && avg < 1.0 {
            score *= 0.5;
        }
        Ok(score.clamp(0.0, 1.0))
    }

    /// Session metadata sanity: very fresh or very old sessions and
    /// abnormal event rates each shave the score.
    fn session_context(
        &self,
        snap: &Snapshot<'_>,
        session: &SessionRecord,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let mut score: f64 = 1.0;

        let duration = session.age_seconds(now);
        if duration < SHORT_SESSION_S {
            score *= 0.7;
        } else if duration > LONG_SESSION_S {
            score *= 0.8;
        }

        if duration > 0.0 {
            let total_events = snap.event_count_for_session(session.id)? as f64;
            let events_per_minute = total_events * 60.0 / duration;
            if events_per_minute < 1.0 {
                score *= 0.6;
            } else if events_per_minute > 100.0 {
                score *= 0.5;
            }
        }

        Ok(score.clamp(0.0, 1.0))
    }

    /// Average trust of the user's other recent sessions, damped by its
    /// variance. The session under evaluation is excluded so repeated
    /// calculations do not feed back into their own input.
    fn historical_trust(
        &self,
        snap: &Snapshot<'_>,
        session: &SessionRecord,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let cutoff = now - Duration::days(HISTORY_DAYS);
        let sessions =
            snap.sessions_for_user_since(session.user_id, cutoff, HISTORY_SESSION_LIMIT)?;
        let scores: Vec<f64> = sessions
            .iter()
            .filter(|s| s.id != session.id)
            .map(|s| s.current_trust)
            .collect();
        if scores.is_empty() {
            return Ok(0.5);
        }

        let avg = stats::mean(&scores);
        let stability = 1.0 / (1.0 + stats::variance(&scores));
        Ok((avg * stability).clamp(0.0, 1.0))
    }

    /// Fraction of the last fifteen minutes' events that were benign.
    fn anomaly_frequency(
        &self,
        snap: &Snapshot<'_>,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        let cutoff = now - Duration::minutes(ANOMALY_WINDOW_MIN);
        let recent = snap.events_for_session_since(session_id, cutoff)?;
        if recent.is_empty() {
            return Ok(1.0);
        }
        let anomalous = recent.iter().filter(|e| e.is_anomalous).count();
        let rate = anomalous as f64 / recent.len() as f64;
        Ok((1.0 - rate).clamp(0.0, 1.0))
    }

    /// Apply the stored-trust update rules:
    /// - idle decay erodes the previous score before comparison
    /// - a single update may lower the stored score by at most
    ///   `max_per_update` (raises are uncapped)
    /// - `REQUIRE_REAUTH` clamps the stored score to at most 0.3 and
    ///   `TERMINATE_SESSION` deactivates the session; both are security
    ///   overrides and bypass the cap
    fn write_back(
        &self,
        snap: &Snapshot<'_>,
        session: &SessionRecord,
        trust_score: f64,
        action: SecurityAction,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let decay = &self.config.decay;
        let idle_minutes = (session.idle_seconds(now) / 60.0).max(0.0);
        let idle_decay = (decay.idle * idle_minutes).min(decay.max_per_update);
        let decayed_prev = (session.current_trust - idle_decay).max(0.0);

        let mut stored = if trust_score < decayed_prev {
            trust_score.max(decayed_prev - decay.max_per_update)
        } else {
            trust_score
        };

        match action {
            SecurityAction::RequireReauth => {
                stored = stored.min(0.3);
                info!(session_id = session.id, "Re-authentication required");
            }
            SecurityAction::TerminateSession => {
                info!(session_id = session.id, "Terminating session on critical trust");
            }
            _ => {}
        }

        snap.update_session_trust(session.id, stored.clamp(0.0, 1.0), now)?;
        if action == SecurityAction::TerminateSession {
            snap.terminate_session(session.id)?;
        }
        Ok(())
    }
}

/// Behavioral trust from the anomaly analysis, tempered by the model's
/// confidence: an unconfident model pulls the component toward neutral.
fn behavioral_score(analysis: &Prediction) -> f64 {
    let base = 1.0 - analysis.anomaly_score;
    let c = analysis.confidence;
    (base * c + 0.5 * (1.0 - c)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::config::TrustWeights;

    fn components(b: f64, t: f64, x: f64, h: f64, f: f64) -> TrustComponents {
        TrustComponents {
            behavioral: b,
            temporal: t,
            context: x,
            historical: h,
            anomaly_freq: f,
        }
    }

    #[test]
    fn test_compose_reference_scenario() {
        // behavioral anomaly 0.95 at full confidence, everything else
        // at its no-data default
        let c = components(1.0 - 0.95, 0.7, 1.0, 0.5, 1.0);
        let score = compose(&c, &TrustWeights::default());
        assert!((score - 0.485).abs() < 1e-9);
        assert_eq!(TrustLevel::from_score(score), TrustLevel::Moderate);
        assert_eq!(
            TrustLevel::from_score(score).action(),
            SecurityAction::RestrictAccess
        );
    }

    #[test]
    fn test_compose_saturated_anomaly_is_critical() {
        let c = components(0.0, 0.0, 0.0, 0.0, 0.0);
        let score = compose(&c, &TrustWeights::default());
        assert_eq!(score, 0.0);
        assert_eq!(TrustLevel::from_score(score), TrustLevel::Critical);
        assert_eq!(
            TrustLevel::from_score(score).action(),
            SecurityAction::TerminateSession
        );
    }

    #[test]
    fn test_compose_all_ones_is_maximum() {
        let c = components(1.0, 1.0, 1.0, 1.0, 1.0);
        let score = compose(&c, &TrustWeights::default());
        assert!((score - 1.0).abs() < 1e-9);
        assert_eq!(TrustLevel::from_score(score), TrustLevel::Maximum);
    }

    #[test]
    fn test_compose_normalises_drifted_weights() {
        let weights = TrustWeights {
            behavioral: 0.8,
            temporal: 0.4,
            context: 0.3,
            historical: 0.3,
            anomaly_freq: 0.2,
        };
        // doubled weights must not change the score
        let c = components(0.6, 0.7, 0.8, 0.5, 1.0);
        let doubled = compose(&c, &weights);
        let reference = compose(&c, &TrustWeights::default());
        assert!((doubled - reference).abs() < 1e-9);
    }

    #[test]
    fn test_behavioral_score_confidence_tempering() {
        let mut analysis = Prediction::no_model();
        analysis.anomaly_score = 0.9;
        analysis.confidence = 0.0;
        // zero confidence collapses to neutral regardless of anomaly
        assert!((behavioral_score(&analysis) - 0.5).abs() < 1e-9);

        analysis.confidence = 1.0;
        assert!((behavioral_score(&analysis) - 0.1).abs() < 1e-9);

        analysis.anomaly_score = 0.2;
        analysis.confidence = 0.5;
        // halfway between 0.8 and 0.5
        assert!((behavioral_score(&analysis) - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_trend_bands() {
        let stable = TrustTrend::from_change(0.80, 0.83);
        assert_eq!(stable.trend, "stable");

        let up = TrustTrend::from_change(0.5, 0.7);
        assert_eq!(up.trend, "increasing");
        assert!((up.change - 0.2).abs() < 1e-9);

        let down = TrustTrend::from_change(0.7, 0.5);
        assert_eq!(down.trend, "decreasing");
        assert!((down.change_magnitude - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_shape() {
        let now = Utc::now();
        let report = TrustReport::fallback(9, now, "timeout");
        assert_eq!(report.trust_score, 0.5);
        assert_eq!(report.trust_level, TrustLevel::Moderate);
        assert_eq!(
            report.recommended_action,
            SecurityAction::IncreaseMonitoring
        );
        assert_eq!(report.error.as_deref(), Some("timeout"));
    }
}
