//! Execution of recommended security actions.
//!
//! Terminate and re-auth mutate session state. Restrict and monitor are
//! advisory: there is no authorization boundary in this system to
//! enforce them against, so they are logged and reported back.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use vigil_core::{Result, SecurityAction};
use vigil_store::Store;

/// Stored trust ceiling once re-authentication is demanded.
const REAUTH_TRUST_CAP: f64 = 0.3;

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub action: &'static str,
    pub message: String,
}

/// Execute a security action against a session.
pub fn execute_action(
    store: &Store,
    session_id: i64,
    action: SecurityAction,
    now: DateTime<Utc>,
) -> Result<ActionResult> {
    let exists = store.session_by_id(session_id)?.is_some();
    if !exists {
        return Ok(ActionResult {
            success: false,
            action: action.as_str(),
            message: format!("session {session_id} not found"),
        });
    }

    let result = match action {
        SecurityAction::TerminateSession => {
            store.terminate_session(session_id)?;
            warn!(session_id, "Session terminated by security action");
            ActionResult {
                success: true,
                action: "session_terminated",
                message: "session terminated due to security concerns".into(),
            }
        }
        SecurityAction::RequireReauth => {
            store.snapshot(|snap| {
                let session = snap
                    .session_by_id(session_id)?
                    .ok_or_else(|| vigil_core::VigilError::NotFound(format!("session {session_id}")))?;
                snap.update_session_trust(
                    session_id,
                    session.current_trust.min(REAUTH_TRUST_CAP),
                    now,
                )
            })?;
            info!(session_id, "Re-authentication required");
            ActionResult {
                success: true,
                action: "reauth_required",
                message: "re-authentication required".into(),
            }
        }
        SecurityAction::RestrictAccess => {
            info!(session_id, "Access restriction advised");
            ActionResult {
                success: true,
                action: "access_restricted",
                message: "access restriction advised (advisory only)".into(),
            }
        }
        SecurityAction::IncreaseMonitoring => {
            info!(session_id, "Monitoring increase advised");
            ActionResult {
                success: true,
                action: "monitoring_increased",
                message: "monitoring frequency increased (advisory only)".into(),
            }
        }
        SecurityAction::NoAction => ActionResult {
            success: true,
            action: "no_action",
            message: "no action required".into(),
        },
    };

    Ok(result)
}
