//! Sqlite-backed session store.
//!
//! Connection handling follows the repo pattern used elsewhere in the
//! stack: one `Connection` behind a std `Mutex`, synchronous queries,
//! schema created at startup. Timestamps are stored as unix epoch
//! seconds.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::error::HubError;

use super::{AttachedDevice, CaptureSession, FrameUser, NewFrame, SessionStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS attached_input_devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_name TEXT NOT NULL,
    device_code TEXT NOT NULL UNIQUE,
    auth_token TEXT NOT NULL,
    valid_until INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS capture_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_type TEXT NOT NULL DEFAULT 'face-authorization',
    attached_device_id INTEGER NOT NULL REFERENCES attached_input_devices(id),
    end_time INTEGER,
    completion_token TEXT
);

CREATE INDEX IF NOT EXISTS idx_sessions_device ON capture_sessions(attached_device_id);

CREATE TABLE IF NOT EXISTS session_frames (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES capture_sessions(id) ON DELETE CASCADE,
    frame_details TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_frames_session ON session_frames(session_id);

CREATE TABLE IF NOT EXISTS session_frame_users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    frame_id INTEGER NOT NULL REFERENCES session_frames(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL,
    value REAL NOT NULL
);
"#;

/// Sqlite-backed [`SessionStore`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

fn storage_err<E: std::fmt::Display>(e: E) -> HubError {
    HubError::Storage(e.to_string())
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HubError> {
        let conn = Connection::open(path.as_ref()).map_err(storage_err)?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(storage_err)?;
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        info!(path = %path.as_ref().display(), "session store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Self, HubError> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(storage_err)?;
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provision a device row. Devices are normally provisioned by the
    /// upstream management console; this exists for seeding and tests.
    pub fn insert_device(
        &self,
        device_code: &str,
        device_name: &str,
        auth_token: Uuid,
        valid_until: DateTime<Utc>,
    ) -> Result<i64, HubError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO attached_input_devices (device_name, device_code, auth_token, valid_until)
             VALUES (?1, ?2, ?3, ?4)",
            params![device_name, device_code, auth_token.to_string(), ts(valid_until)],
        )
        .map_err(storage_err)?;
        Ok(conn.last_insert_rowid())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn find_attached_device(
        &self,
        device_code: &str,
        auth_token: Uuid,
    ) -> Result<Option<AttachedDevice>, HubError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT id, device_code, device_name, auth_token, valid_until
             FROM attached_input_devices
             WHERE device_code = ?1 AND auth_token = ?2 AND valid_until > ?3",
            params![device_code, auth_token.to_string(), ts(Utc::now())],
            |row| {
                Ok(AttachedDevice {
                    id: row.get(0)?,
                    device_code: row.get(1)?,
                    device_name: row.get(2)?,
                    auth_token,
                    valid_until: from_ts(row.get(4)?),
                })
            },
        )
        .optional()
        .map_err(storage_err)
    }

    async fn find_open_session(
        &self,
        device_code: &str,
    ) -> Result<Option<CaptureSession>, HubError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT cs.id, cs.session_type, aid.device_code, cs.end_time
             FROM capture_sessions cs
             JOIN attached_input_devices aid ON aid.id = cs.attached_device_id
             WHERE aid.device_code = ?1 AND cs.end_time IS NULL",
            params![device_code],
            |row| {
                Ok(CaptureSession {
                    id: row.get(0)?,
                    session_type: row.get(1)?,
                    device_code: row.get(2)?,
                    end_time: row.get::<_, Option<i64>>(3)?.map(from_ts),
                })
            },
        )
        .optional()
        .map_err(storage_err)
    }

    async fn create_session(&self, device_token: Uuid) -> Result<(), HubError> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction().map_err(storage_err)?;

        let device_id: i64 = tx
            .query_row(
                "SELECT id FROM attached_input_devices WHERE auth_token = ?1",
                params![device_token.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?
            .ok_or(HubError::DeviceNotFound)?;

        // The open-session invariant is enforced inside the transaction
        // so a concurrent start can never insert a second open row.
        let open: Option<i64> = tx
            .query_row(
                "SELECT id FROM capture_sessions
                 WHERE attached_device_id = ?1 AND end_time IS NULL",
                params![device_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        if open.is_some() {
            return Err(HubError::SessionAlreadyOpen);
        }

        tx.execute(
            "INSERT INTO capture_sessions (attached_device_id) VALUES (?1)",
            params![device_id],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)
    }

    async fn count_frames(&self, session_id: i64) -> Result<u32, HubError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT COUNT(*) FROM session_frames WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .map_err(storage_err)
    }

    async fn create_frame(
        &self,
        frame: NewFrame,
        user: Option<FrameUser>,
    ) -> Result<(), HubError> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction().map_err(storage_err)?;

        tx.execute(
            "INSERT INTO session_frames (session_id, frame_details, timestamp)
             VALUES (?1, ?2, ?3)",
            params![frame.session_id, frame.outcome, ts(frame.timestamp)],
        )
        .map_err(storage_err)?;

        if let Some(user) = user {
            let frame_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO session_frame_users (frame_id, user_id, value)
                 VALUES (?1, ?2, ?3)",
                params![frame_id, user.user_id, user.confidence],
            )
            .map_err(storage_err)?;
        }

        tx.commit().map_err(storage_err)
    }

    async fn complete_session(&self, session_id: i64) -> Result<String, HubError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let token = Uuid::new_v4().to_string();
        let updated = conn
            .execute(
                "UPDATE capture_sessions SET end_time = ?1, completion_token = ?2
                 WHERE id = ?3 AND end_time IS NULL",
                params![ts(Utc::now()), token, session_id],
            )
            .map_err(storage_err)?;
        if updated == 0 {
            return Err(HubError::Storage(format!(
                "session {} not open",
                session_id
            )));
        }
        Ok(token)
    }
}
