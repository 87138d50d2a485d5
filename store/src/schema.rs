//! SQLite schema for the event store.
//!
//! One relational schema, four tables. Timestamps are RFC 3339 text;
//! feature maps and raw payloads are JSON text. Events are append-only.

use rusqlite::Connection;
use vigil_core::Result;

use crate::map_sqlite_err;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS user_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            session_token TEXT NOT NULL UNIQUE,
            initial_trust REAL NOT NULL DEFAULT 1.0,
            current_trust REAL NOT NULL DEFAULT 1.0,
            min_trust_threshold REAL NOT NULL DEFAULT 0.3,
            ip_address TEXT,
            user_agent TEXT,
            login_time TEXT NOT NULL,
            last_activity TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT 1,
            FOREIGN KEY (user_id) REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS behavioral_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            event_data TEXT NOT NULL,
            processed_features TEXT NOT NULL,
            anomaly_score REAL,
            is_anomalous BOOLEAN NOT NULL DEFAULT 0,
            timestamp TEXT NOT NULL,
            FOREIGN KEY (session_id) REFERENCES user_sessions(id)
        );

        CREATE TABLE IF NOT EXISTS behavioral_profiles (
            user_id INTEGER PRIMARY KEY,
            samples_count INTEGER NOT NULL DEFAULT 0,
            confidence REAL NOT NULL DEFAULT 0.0,
            keystroke_stats TEXT NOT NULL DEFAULT '{}',
            pointer_stats TEXT NOT NULL DEFAULT '{}',
            last_updated TEXT NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id)
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_token ON user_sessions(session_token);
        CREATE INDEX IF NOT EXISTS idx_sessions_user ON user_sessions(user_id, login_time DESC);
        CREATE INDEX IF NOT EXISTS idx_events_session ON behavioral_events(session_id, timestamp);
        "#,
    )
    .map_err(|e| map_sqlite_err("init schema", e))?;

    Ok(())
}
