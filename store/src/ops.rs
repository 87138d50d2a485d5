//! Row-level operations shared by the store handle and snapshots.
//!
//! Every function takes a plain `&Connection` so the same code path
//! serves both autocommit calls and transactional snapshots
//! (`Transaction` derefs to `Connection`).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use vigil_core::{
    is_event_feature, BehavioralEvent, BehavioralProfile, EventKind, Result, SessionRecord, User,
    VigilError,
};

use crate::map_sqlite_err;

// ============================================================================
// Column helpers
// ============================================================================

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Parse a stored feature map, discarding names outside the closed
/// per-event vocabulary.
fn features_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<BTreeMap<String, f64>> {
    let text: String = row.get(idx)?;
    let raw: BTreeMap<String, f64> = serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(raw
        .into_iter()
        .filter(|(name, _)| is_event_feature(name))
        .collect())
}

fn stats_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<BTreeMap<String, f64>> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        is_active: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_token: row.get(2)?,
        initial_trust: row.get(3)?,
        current_trust: row.get(4)?,
        min_trust_threshold: row.get(5)?,
        ip_address: row.get(6)?,
        user_agent: row.get(7)?,
        login_time: ts_col(row, 8)?,
        last_activity: ts_col(row, 9)?,
        is_active: row.get(10)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<BehavioralEvent> {
    let kind_text: String = row.get(2)?;
    let kind = EventKind::parse(&kind_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown event kind {kind_text:?}").into(),
        )
    })?;
    Ok(BehavioralEvent {
        id: row.get(0)?,
        session_id: row.get(1)?,
        kind,
        raw_data: row.get(3)?,
        features: features_col(row, 4)?,
        anomaly_score: row.get(5)?,
        is_anomalous: row.get(6)?,
        timestamp: ts_col(row, 7)?,
    })
}

const SESSION_COLUMNS: &str = "id, user_id, session_token, initial_trust, current_trust, \
     min_trust_threshold, ip_address, user_agent, login_time, last_activity, is_active";
const EVENT_COLUMNS: &str = "id, session_id, event_type, event_data, processed_features, \
     anomaly_score, is_anomalous, timestamp";

// ============================================================================
// Users
// ============================================================================

pub(crate) fn create_user(
    conn: &Connection,
    username: &str,
    email: &str,
    password_hash: &str,
    now: DateTime<Utc>,
) -> Result<User> {
    conn.execute(
        "INSERT INTO users (username, email, password_hash, is_active, created_at)
         VALUES (?1, ?2, ?3, 1, ?4)",
        params![username, email, password_hash, now.to_rfc3339()],
    )
    .map_err(|e| map_sqlite_err("create user", e))?;

    let id = conn.last_insert_rowid();
    user_by_id(conn, id)?.ok_or_else(|| VigilError::Internal("user vanished after insert".into()))
}

pub(crate) fn user_by_id(conn: &Connection, id: i64) -> Result<Option<User>> {
    conn.query_row(
        "SELECT id, username, email, password_hash, is_active, created_at
         FROM users WHERE id = ?1",
        [id],
        user_from_row,
    )
    .optional()
    .map_err(|e| map_sqlite_err("user by id", e))
}

pub(crate) fn user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    conn.query_row(
        "SELECT id, username, email, password_hash, is_active, created_at
         FROM users WHERE username = ?1",
        [username],
        user_from_row,
    )
    .optional()
    .map_err(|e| map_sqlite_err("user by username", e))
}

pub(crate) fn user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    conn.query_row(
        "SELECT id, username, email, password_hash, is_active, created_at
         FROM users WHERE email = ?1",
        [email],
        user_from_row,
    )
    .optional()
    .map_err(|e| map_sqlite_err("user by email", e))
}

pub(crate) fn all_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, username, email, password_hash, is_active, created_at
             FROM users ORDER BY id",
        )
        .map_err(|e| map_sqlite_err("list users", e))?;
    let users = stmt
        .query_map([], user_from_row)
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| map_sqlite_err("list users", e))?;
    Ok(users)
}

// ============================================================================
// Sessions
// ============================================================================

#[allow(clippy::too_many_arguments)]
pub(crate) fn create_session(
    conn: &Connection,
    user_id: i64,
    session_token: &str,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
    now: DateTime<Utc>,
) -> Result<SessionRecord> {
    conn.execute(
        "INSERT INTO user_sessions
             (user_id, session_token, ip_address, user_agent, login_time, last_activity)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![user_id, session_token, ip_address, user_agent, now.to_rfc3339()],
    )
    .map_err(|e| map_sqlite_err("create session", e))?;

    let id = conn.last_insert_rowid();
    session_by_id(conn, id)?
        .ok_or_else(|| VigilError::Internal("session vanished after insert".into()))
}

pub(crate) fn session_by_id(conn: &Connection, id: i64) -> Result<Option<SessionRecord>> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM user_sessions WHERE id = ?1"),
        [id],
        session_from_row,
    )
    .optional()
    .map_err(|e| map_sqlite_err("session by id", e))
}

pub(crate) fn active_session_by_token(
    conn: &Connection,
    token: &str,
) -> Result<Option<SessionRecord>> {
    conn.query_row(
        &format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions
             WHERE session_token = ?1 AND is_active = 1"
        ),
        [token],
        session_from_row,
    )
    .optional()
    .map_err(|e| map_sqlite_err("session by token", e))
}

pub(crate) fn update_session_trust(
    conn: &Connection,
    session_id: i64,
    trust: f64,
    now: DateTime<Utc>,
) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE user_sessions SET current_trust = ?2, last_activity = ?3 WHERE id = ?1",
            params![session_id, trust, now.to_rfc3339()],
        )
        .map_err(|e| map_sqlite_err("update trust", e))?;
    if changed == 0 {
        return Err(VigilError::NotFound(format!("session {session_id}")));
    }
    Ok(())
}

pub(crate) fn touch_activity(
    conn: &Connection,
    session_id: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "UPDATE user_sessions SET last_activity = ?2 WHERE id = ?1",
        params![session_id, now.to_rfc3339()],
    )
    .map_err(|e| map_sqlite_err("touch activity", e))?;
    Ok(())
}

pub(crate) fn terminate_session(conn: &Connection, session_id: i64) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE user_sessions SET is_active = 0 WHERE id = ?1",
            [session_id],
        )
        .map_err(|e| map_sqlite_err("terminate session", e))?;
    if changed == 0 {
        return Err(VigilError::NotFound(format!("session {session_id}")));
    }
    Ok(())
}

pub(crate) fn sessions_for_user_since(
    conn: &Connection,
    user_id: i64,
    cutoff: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<SessionRecord>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions
             WHERE user_id = ?1 AND login_time >= ?2
             ORDER BY login_time DESC LIMIT ?3"
        ))
        .map_err(|e| map_sqlite_err("sessions for user", e))?;
    let sessions = stmt
        .query_map(
            params![user_id, cutoff.to_rfc3339(), limit as i64],
            session_from_row,
        )
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| map_sqlite_err("sessions for user", e))?;
    Ok(sessions)
}

// ============================================================================
// Behavioral events
// ============================================================================

#[allow(clippy::too_many_arguments)]
pub(crate) fn append_event(
    conn: &Connection,
    session_id: i64,
    kind: EventKind,
    raw_data: &str,
    features: &BTreeMap<String, f64>,
    timestamp: DateTime<Utc>,
    anomaly_score: Option<f64>,
    is_anomalous: bool,
) -> Result<i64> {
    let features_json = serde_json::to_string(features)?;
    conn.execute(
        "INSERT INTO behavioral_events
             (session_id, event_type, event_data, processed_features,
              anomaly_score, is_anomalous, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            session_id,
            kind.as_str(),
            raw_data,
            features_json,
            anomaly_score,
            is_anomalous,
            timestamp.to_rfc3339()
        ],
    )
    .map_err(|e| map_sqlite_err("append event", e))?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn events_for_session(conn: &Connection, session_id: i64) -> Result<Vec<BehavioralEvent>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM behavioral_events
             WHERE session_id = ?1 ORDER BY timestamp, id"
        ))
        .map_err(|e| map_sqlite_err("events for session", e))?;
    let events = stmt
        .query_map([session_id], event_from_row)
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| map_sqlite_err("events for session", e))?;
    Ok(events)
}

/// Most recent events for a session since `cutoff`, newest first.
pub(crate) fn recent_events_for_session(
    conn: &Connection,
    session_id: i64,
    cutoff: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<BehavioralEvent>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM behavioral_events
             WHERE session_id = ?1 AND timestamp >= ?2
             ORDER BY timestamp DESC, id DESC LIMIT ?3"
        ))
        .map_err(|e| map_sqlite_err("recent events", e))?;
    let events = stmt
        .query_map(
            params![session_id, cutoff.to_rfc3339(), limit as i64],
            event_from_row,
        )
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| map_sqlite_err("recent events", e))?;
    Ok(events)
}

/// Every event for a session at or after `cutoff`, in time order.
pub(crate) fn events_for_session_since(
    conn: &Connection,
    session_id: i64,
    cutoff: DateTime<Utc>,
) -> Result<Vec<BehavioralEvent>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM behavioral_events
             WHERE session_id = ?1 AND timestamp >= ?2
             ORDER BY timestamp, id"
        ))
        .map_err(|e| map_sqlite_err("events since", e))?;
    let events = stmt
        .query_map(params![session_id, cutoff.to_rfc3339()], event_from_row)
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| map_sqlite_err("events since", e))?;
    Ok(events)
}

pub(crate) fn event_count_for_session(conn: &Connection, session_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM behavioral_events WHERE session_id = ?1",
        [session_id],
        |row| row.get(0),
    )
    .map_err(|e| map_sqlite_err("event count", e))
}

/// All events across a user's sessions since `cutoff`, in time order.
/// This is the training read path.
pub(crate) fn events_for_user_since(
    conn: &Connection,
    user_id: i64,
    cutoff: DateTime<Utc>,
) -> Result<Vec<BehavioralEvent>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT e.{} FROM behavioral_events e
             JOIN user_sessions s ON e.session_id = s.id
             WHERE s.user_id = ?1 AND e.timestamp >= ?2
             ORDER BY e.timestamp, e.id",
            EVENT_COLUMNS.replace(", ", ", e.")
        ))
        .map_err(|e| map_sqlite_err("events for user", e))?;
    let events = stmt
        .query_map(params![user_id, cutoff.to_rfc3339()], event_from_row)
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(|e| map_sqlite_err("events for user", e))?;
    Ok(events)
}

// ============================================================================
// Behavioral profiles
// ============================================================================

pub(crate) fn upsert_profile(conn: &Connection, profile: &BehavioralProfile) -> Result<()> {
    let keystroke_stats = serde_json::to_string(&profile.keystroke_stats)?;
    let pointer_stats = serde_json::to_string(&profile.pointer_stats)?;
    conn.execute(
        "INSERT INTO behavioral_profiles
             (user_id, samples_count, confidence, keystroke_stats, pointer_stats, last_updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id) DO UPDATE SET
             samples_count = ?2,
             confidence = ?3,
             keystroke_stats = ?4,
             pointer_stats = ?5,
             last_updated = ?6",
        params![
            profile.user_id,
            profile.samples_count,
            profile.confidence,
            keystroke_stats,
            pointer_stats,
            profile.last_updated.to_rfc3339()
        ],
    )
    .map_err(|e| map_sqlite_err("upsert profile", e))?;
    Ok(())
}

pub(crate) fn profile_for_user(
    conn: &Connection,
    user_id: i64,
) -> Result<Option<BehavioralProfile>> {
    conn.query_row(
        "SELECT user_id, samples_count, confidence, keystroke_stats, pointer_stats, last_updated
         FROM behavioral_profiles WHERE user_id = ?1",
        [user_id],
        |row| {
            Ok(BehavioralProfile {
                user_id: row.get(0)?,
                samples_count: row.get(1)?,
                confidence: row.get(2)?,
                keystroke_stats: stats_col(row, 3)?,
                pointer_stats: stats_col(row, 4)?,
                last_updated: ts_col(row, 5)?,
            })
        },
    )
    .optional()
    .map_err(|e| map_sqlite_err("profile for user", e))
}
