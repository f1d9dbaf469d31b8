//! Session store: persistence for attached devices, capture sessions
//! and per-frame recognition outcomes.
//!
//! The hub core only sees the [`SessionStore`] capability interface.
//! Two backends are provided: [`SqliteStore`] for production and
//! [`MemoryStore`] for tests and database-less operation.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::HubError;

/// A capture device provisioned upstream. Read-only to the hub.
#[derive(Debug, Clone)]
pub struct AttachedDevice {
    pub id: i64,
    pub device_code: String,
    pub device_name: String,
    pub auth_token: Uuid,
    pub valid_until: DateTime<Utc>,
}

/// A capture session. `end_time` is null while the session is open.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub id: i64,
    pub session_type: String,
    pub device_code: String,
    pub end_time: Option<DateTime<Utc>>,
}

/// A frame record to persist.
#[derive(Debug, Clone)]
pub struct NewFrame {
    pub session_id: i64,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

/// Recognized-user association for a frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameUser {
    pub user_id: i64,
    pub confidence: f64,
}

/// Capability interface over the capture-session datastore.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up a device by code and token. Only matches while the
    /// device authorization is unexpired.
    async fn find_attached_device(
        &self,
        device_code: &str,
        auth_token: Uuid,
    ) -> Result<Option<AttachedDevice>, HubError>;

    /// Find the open session (end time null) for a device, if any.
    async fn find_open_session(
        &self,
        device_code: &str,
    ) -> Result<Option<CaptureSession>, HubError>;

    /// Open a new session for the device identified by its auth token.
    /// Fails without creating a row when an open session already exists.
    async fn create_session(&self, device_token: Uuid) -> Result<(), HubError>;

    /// Number of frames recorded for a session.
    async fn count_frames(&self, session_id: i64) -> Result<u32, HubError>;

    /// Persist a frame and its optional user association atomically:
    /// either both rows land or neither does.
    async fn create_frame(&self, frame: NewFrame, user: Option<FrameUser>)
        -> Result<(), HubError>;

    /// Close a session and return the issued token. Fails when the
    /// session does not exist or is already completed.
    async fn complete_session(&self, session_id: i64) -> Result<String, HubError>;
}
