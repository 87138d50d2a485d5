//! Shared domain types for the Vigil continuous-authentication engine.
//!
//! These mirror the persistent schema (users, sessions, events, profiles)
//! plus the classification enums the trust engine produces. They are
//! designed to be:
//! - Serializable for persistence and the JSON transport
//! - Cheap to clone (rows are small; feature maps are the largest field)
//! - Free of behavior beyond total score-to-level mappings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Identity & Session Rows
// ============================================================================

/// A registered account. The password verifier is an opaque bcrypt hash;
/// the core never inspects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// An authenticated session bounded by login and termination.
///
/// Invariants: `login_time <= last_activity`; `current_trust` stays in
/// [0, 1]; terminated sessions are never revived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub user_id: i64,
    pub session_token: String,
    pub initial_trust: f64,
    pub current_trust: f64,
    pub min_trust_threshold: f64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub login_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
}

impl SessionRecord {
    /// Session age relative to the supplied clock.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.login_time).num_milliseconds() as f64 / 1000.0
    }

    /// Idle time since the last recorded activity.
    pub fn idle_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_activity).num_milliseconds() as f64 / 1000.0
    }
}

// ============================================================================
// Behavioral Events & Profiles
// ============================================================================

/// Modality of a captured behavioral event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Keystroke,
    Pointer,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Keystroke => "keystroke",
            EventKind::Pointer => "pointer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keystroke" => Some(EventKind::Keystroke),
            "pointer" => Some(EventKind::Pointer),
            _ => None,
        }
    }
}

/// One processed behavioral event: the raw payload is kept opaque, the
/// extracted features are a name -> value map drawn from the closed
/// vocabulary of the extractors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralEvent {
    pub id: i64,
    pub session_id: i64,
    pub kind: EventKind,
    pub raw_data: String,
    pub features: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
    pub anomaly_score: Option<f64>,
    pub is_anomalous: bool,
}

/// Aggregated per-user behavioral statistics, rewritten on every retrain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralProfile {
    pub user_id: i64,
    pub samples_count: i64,
    /// `min(samples / 100, 1)`; saturates once a hundred session
    /// vectors have contributed.
    pub confidence: f64,
    pub keystroke_stats: BTreeMap<String, f64>,
    pub pointer_stats: BTreeMap<String, f64>,
    pub last_updated: DateTime<Utc>,
}

// ============================================================================
// Trust Classification
// ============================================================================

/// Trust level bands over the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Critical,
    Low,
    Moderate,
    High,
    Maximum,
}

impl TrustLevel {
    /// Band a composite trust score. Total over all of [0, 1] (and
    /// tolerant of values outside it).
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            TrustLevel::Maximum
        } else if score >= 0.6 {
            TrustLevel::High
        } else if score >= 0.4 {
            TrustLevel::Moderate
        } else if score >= 0.2 {
            TrustLevel::Low
        } else {
            TrustLevel::Critical
        }
    }

    /// The security action mandated at this trust level.
    pub fn action(&self) -> SecurityAction {
        match self {
            TrustLevel::Critical => SecurityAction::TerminateSession,
            TrustLevel::Low => SecurityAction::RequireReauth,
            TrustLevel::Moderate => SecurityAction::RestrictAccess,
            TrustLevel::High => SecurityAction::IncreaseMonitoring,
            TrustLevel::Maximum => SecurityAction::NoAction,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Critical => "critical",
            TrustLevel::Low => "low",
            TrustLevel::Moderate => "moderate",
            TrustLevel::High => "high",
            TrustLevel::Maximum => "maximum",
        }
    }
}

/// Security responses the engine can recommend or execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityAction {
    TerminateSession,
    RequireReauth,
    RestrictAccess,
    IncreaseMonitoring,
    NoAction,
}

impl SecurityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityAction::TerminateSession => "terminate_session",
            SecurityAction::RequireReauth => "require_reauth",
            SecurityAction::RestrictAccess => "restrict_access",
            SecurityAction::IncreaseMonitoring => "increase_monitoring",
            SecurityAction::NoAction => "no_action",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "terminate_session" => Some(SecurityAction::TerminateSession),
            "require_reauth" => Some(SecurityAction::RequireReauth),
            "restrict_access" => Some(SecurityAction::RestrictAccess),
            "increase_monitoring" => Some(SecurityAction::IncreaseMonitoring),
            "no_action" => Some(SecurityAction::NoAction),
            _ => None,
        }
    }
}

/// Risk bands over the ensemble anomaly score, plus the degenerate
/// states a prediction can land in before any detector runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Normal,
    LowRisk,
    MediumRisk,
    HighRisk,
    /// No model bundle exists for the user.
    Unknown,
    /// A model exists but the session has too little data to score.
    InsufficientData,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            RiskLevel::HighRisk
        } else if score >= 0.6 {
            RiskLevel::MediumRisk
        } else if score >= 0.3 {
            RiskLevel::LowRisk
        } else {
            RiskLevel::Normal
        }
    }

    /// Whether events scored at this level should be flagged anomalous.
    pub fn is_anomalous(&self) -> bool {
        matches!(self, RiskLevel::MediumRisk | RiskLevel::HighRisk)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Normal => "normal",
            RiskLevel::LowRisk => "low_risk",
            RiskLevel::MediumRisk => "medium_risk",
            RiskLevel::HighRisk => "high_risk",
            RiskLevel::Unknown => "unknown",
            RiskLevel::InsufficientData => "insufficient_data",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_level_bands() {
        assert_eq!(TrustLevel::from_score(1.0), TrustLevel::Maximum);
        assert_eq!(TrustLevel::from_score(0.8), TrustLevel::Maximum);
        assert_eq!(TrustLevel::from_score(0.79), TrustLevel::High);
        assert_eq!(TrustLevel::from_score(0.6), TrustLevel::High);
        assert_eq!(TrustLevel::from_score(0.485), TrustLevel::Moderate);
        assert_eq!(TrustLevel::from_score(0.4), TrustLevel::Moderate);
        assert_eq!(TrustLevel::from_score(0.2), TrustLevel::Low);
        assert_eq!(TrustLevel::from_score(0.0), TrustLevel::Critical);
    }

    #[test]
    fn test_trust_level_actions() {
        assert_eq!(
            TrustLevel::Critical.action(),
            SecurityAction::TerminateSession
        );
        assert_eq!(TrustLevel::Low.action(), SecurityAction::RequireReauth);
        assert_eq!(TrustLevel::Moderate.action(), SecurityAction::RestrictAccess);
        assert_eq!(TrustLevel::High.action(), SecurityAction::IncreaseMonitoring);
        assert_eq!(TrustLevel::Maximum.action(), SecurityAction::NoAction);
    }

    #[test]
    fn test_risk_level_bands() {
        assert_eq!(RiskLevel::from_score(0.85), RiskLevel::HighRisk);
        assert_eq!(RiskLevel::from_score(0.6), RiskLevel::MediumRisk);
        assert_eq!(RiskLevel::from_score(0.3), RiskLevel::LowRisk);
        assert_eq!(RiskLevel::from_score(0.1), RiskLevel::Normal);
        assert!(RiskLevel::HighRisk.is_anomalous());
        assert!(!RiskLevel::LowRisk.is_anomalous());
    }

    #[test]
    fn test_security_action_round_trip() {
        for action in [
            SecurityAction::TerminateSession,
            SecurityAction::RequireReauth,
            SecurityAction::RestrictAccess,
            SecurityAction::IncreaseMonitoring,
            SecurityAction::NoAction,
        ] {
            assert_eq!(SecurityAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(SecurityAction::parse("escalate"), None);
    }

    #[test]
    fn test_event_kind_round_trip() {
        assert_eq!(EventKind::parse("keystroke"), Some(EventKind::Keystroke));
        assert_eq!(EventKind::parse("pointer"), Some(EventKind::Pointer));
        assert_eq!(EventKind::parse("gamepad"), None);
    }

    proptest::proptest! {
        #[test]
        fn trust_level_total_over_unit_interval(score in -1.0f64..2.0) {
            let level = TrustLevel::from_score(score);
            // every level maps to a defined action
            let _ = level.action();
            if (0.0..0.2).contains(&score) {
                proptest::prop_assert_eq!(level, TrustLevel::Critical);
            }
            if score >= 0.8 {
                proptest::prop_assert_eq!(level, TrustLevel::Maximum);
            }
        }
    }

    #[test]
    fn test_session_age_and_idle() {
        let login = Utc::now();
        let session = SessionRecord {
            id: 1,
            user_id: 1,
            session_token: "tok".into(),
            initial_trust: 1.0,
            current_trust: 1.0,
            min_trust_threshold: 0.3,
            ip_address: None,
            user_agent: None,
            login_time: login,
            last_activity: login + chrono::Duration::seconds(30),
            is_active: true,
        };
        let now = login + chrono::Duration::seconds(90);
        assert!((session.age_seconds(now) - 90.0).abs() < 1e-9);
        assert!((session.idle_seconds(now) - 60.0).abs() < 1e-9);
    }
}
