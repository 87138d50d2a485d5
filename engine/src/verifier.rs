//! Session verification and continuous reverification.

use crate::trust::{TrustEngine, TrustReport};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use vigil_core::{EngineConfig, Result, SecurityAction, SessionRecord, TrustLevel, VigilError};
use vigil_store::Store;

/// Outcome of comparing a session's trust to its minimum threshold.
#[derive(Debug, Clone, Serialize)]
pub struct TrustVerification {
    pub verified: bool,
    pub trust_score: f64,
    pub trust_level: TrustLevel,
    pub action_required: SecurityAction,
}

/// Full continuous-verification result for a session token.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub session_id: i64,
    pub user_id: i64,
    pub session_verified: bool,
    pub trust_verification: TrustVerification,
    pub last_activity: DateTime<Utc>,
}

/// Validates session tokens and runs the continuous-verification loop.
pub struct SessionVerifier {
    config: Arc<EngineConfig>,
    engine: Arc<TrustEngine>,
}

impl SessionVerifier {
    pub fn new(config: Arc<EngineConfig>, engine: Arc<TrustEngine>) -> Self {
        Self { config, engine }
    }

    /// Resolve a session token to a live session.
    ///
    /// Rejects tokens that are unknown or belong to inactive sessions,
    /// and expires sessions past the configured age cap. Expiry is
    /// persisted, so subsequent calls keep failing.
    pub fn verify_session_token(
        &self,
        store: &Store,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let session = store
            .active_session_by_token(token)?
            .ok_or_else(|| VigilError::Unauthorized("invalid or expired session".into()))?;

        let age = now - session.login_time;
        if age > Duration::hours(self.config.session_timeout_h) {
            store.terminate_session(session.id)?;
            info!(session_id = session.id, "Session expired past age cap");
            return Err(VigilError::Unauthorized("session expired".into()));
        }

        Ok(session)
    }

    /// Compare a trust result against the session's minimum threshold.
    pub fn verify_trust_level(
        &self,
        session: &SessionRecord,
        report: &TrustReport,
    ) -> TrustVerification {
        if report.trust_score < session.min_trust_threshold {
            warn!(
                session_id = session.id,
                trust = report.trust_score,
                threshold = session.min_trust_threshold,
                "Trust below session threshold"
            );
            return TrustVerification {
                verified: false,
                trust_score: report.trust_score,
                trust_level: report.trust_level,
                action_required: report.recommended_action,
            };
        }
        TrustVerification {
            verified: true,
            trust_score: report.trust_score,
            trust_level: report.trust_level,
            action_required: SecurityAction::NoAction,
        }
    }

    /// Verify the token, recalculate trust, and bump the session's
    /// activity timestamp.
    pub fn continuous_verification(
        &self,
        store: &Store,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<VerificationReport> {
        let session = self.verify_session_token(store, token, now)?;
        let report = self.engine.calculate(store, session.id, now);
        let trust_verification = self.verify_trust_level(&session, &report);
        store.touch_activity(session.id, now)?;

        Ok(VerificationReport {
            session_id: session.id,
            user_id: session.user_id,
            session_verified: true,
            trust_verification,
            last_activity: now,
        })
    }
}
