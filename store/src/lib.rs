//! # Vigil Store
//!
//! SQLite-backed event store: users, sessions, behavioral events, and
//! behavioral profiles. One connection guarded by a mutex. Every
//! operation the trust engine performs against a session runs inside a
//! single transaction (`Store::snapshot`), which gives each calculation
//! a self-consistent view and serialises concurrent calculations for
//! the same session on the store itself.

mod ops;
mod schema;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;
use vigil_core::{
    BehavioralEvent, BehavioralProfile, EventKind, Result, SessionRecord, User, VigilError,
};

/// Translate a SQLite failure into the shared error type. Uniqueness
/// violations (duplicate username/email/session token) surface as
/// `Conflict`; everything else is a storage fault.
pub(crate) fn map_sqlite_err(context: &str, err: rusqlite::Error) -> VigilError {
    if let rusqlite::Error::SqliteFailure(failure, ref message) = err {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            let detail = message.clone().unwrap_or_else(|| "constraint".to_string());
            return VigilError::Conflict(detail);
        }
    }
    VigilError::Storage(format!("{context}: {err}"))
}

/// Shared handle to the relational store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| map_sqlite_err("open database", e))?;
        schema::init_schema(&conn)?;
        info!(path = %path.display(), "Opened event store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| map_sqlite_err("open in-memory", e))?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` against a snapshot: all reads and writes inside share one
    /// transaction, committed when `f` succeeds and rolled back when it
    /// fails. No partial writes escape.
    pub fn snapshot<T>(&self, f: impl FnOnce(&Snapshot<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| map_sqlite_err("begin transaction", e))?;
        let result = f(&Snapshot { conn: &tx });
        match result {
            Ok(value) => {
                tx.commit().map_err(|e| map_sqlite_err("commit", e))?;
                Ok(value)
            }
            Err(e) => Err(e), // tx dropped -> rollback
        }
    }

    // ------------------------------------------------------------------
    // Autocommit convenience wrappers
    // ------------------------------------------------------------------

    pub fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<User> {
        ops::create_user(&self.conn.lock(), username, email, password_hash, now)
    }

    pub fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        ops::user_by_id(&self.conn.lock(), id)
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        ops::user_by_username(&self.conn.lock(), username)
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        ops::user_by_email(&self.conn.lock(), email)
    }

    pub fn all_users(&self) -> Result<Vec<User>> {
        ops::all_users(&self.conn.lock())
    }

    pub fn create_session(
        &self,
        user_id: i64,
        session_token: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        ops::create_session(
            &self.conn.lock(),
            user_id,
            session_token,
            ip_address,
            user_agent,
            now,
        )
    }

    pub fn session_by_id(&self, id: i64) -> Result<Option<SessionRecord>> {
        ops::session_by_id(&self.conn.lock(), id)
    }

    pub fn active_session_by_token(&self, token: &str) -> Result<Option<SessionRecord>> {
        ops::active_session_by_token(&self.conn.lock(), token)
    }

    pub fn touch_activity(&self, session_id: i64, now: DateTime<Utc>) -> Result<()> {
        ops::touch_activity(&self.conn.lock(), session_id, now)
    }

    pub fn terminate_session(&self, session_id: i64) -> Result<()> {
        ops::terminate_session(&self.conn.lock(), session_id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn append_event(
        &self,
        session_id: i64,
        kind: EventKind,
        raw_data: &str,
        features: &BTreeMap<String, f64>,
        timestamp: DateTime<Utc>,
        anomaly_score: Option<f64>,
        is_anomalous: bool,
    ) -> Result<i64> {
        ops::append_event(
            &self.conn.lock(),
            session_id,
            kind,
            raw_data,
            features,
            timestamp,
            anomaly_score,
            is_anomalous,
        )
    }

    pub fn events_for_session(&self, session_id: i64) -> Result<Vec<BehavioralEvent>> {
        ops::events_for_session(&self.conn.lock(), session_id)
    }

    pub fn event_count_for_session(&self, session_id: i64) -> Result<i64> {
        ops::event_count_for_session(&self.conn.lock(), session_id)
    }

    pub fn events_for_user_since(
        &self,
        user_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BehavioralEvent>> {
        ops::events_for_user_since(&self.conn.lock(), user_id, cutoff)
    }

    pub fn upsert_profile(&self, profile: &BehavioralProfile) -> Result<()> {
        ops::upsert_profile(&self.conn.lock(), profile)
    }

    pub fn profile_for_user(&self, user_id: i64) -> Result<Option<BehavioralProfile>> {
        ops::profile_for_user(&self.conn.lock(), user_id)
    }
}

/// Transactional view over the store. Mirrors the `Store` operations;
/// everything called through one snapshot commits or rolls back
/// together.
pub struct Snapshot<'a> {
    conn: &'a Connection,
}

impl Snapshot<'_> {
    pub fn session_by_id(&self, id: i64) -> Result<Option<SessionRecord>> {
        ops::session_by_id(self.conn, id)
    }

    pub fn active_session_by_token(&self, token: &str) -> Result<Option<SessionRecord>> {
        ops::active_session_by_token(self.conn, token)
    }

    pub fn update_session_trust(
        &self,
        session_id: i64,
        trust: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        ops::update_session_trust(self.conn, session_id, trust, now)
    }

    pub fn touch_activity(&self, session_id: i64, now: DateTime<Utc>) -> Result<()> {
        ops::touch_activity(self.conn, session_id, now)
    }

    pub fn terminate_session(&self, session_id: i64) -> Result<()> {
        ops::terminate_session(self.conn, session_id)
    }

    pub fn sessions_for_user_since(
        &self,
        user_id: i64,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SessionRecord>> {
        ops::sessions_for_user_since(self.conn, user_id, cutoff, limit)
    }

    pub fn events_for_session(&self, session_id: i64) -> Result<Vec<BehavioralEvent>> {
        ops::events_for_session(self.conn, session_id)
    }

    pub fn recent_events_for_session(
        &self,
        session_id: i64,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<BehavioralEvent>> {
        ops::recent_events_for_session(self.conn, session_id, cutoff, limit)
    }

    pub fn events_for_session_since(
        &self,
        session_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BehavioralEvent>> {
        ops::events_for_session_since(self.conn, session_id, cutoff)
    }

    pub fn event_count_for_session(&self, session_id: i64) -> Result<i64> {
        ops::event_count_for_session(self.conn, session_id)
    }
}
