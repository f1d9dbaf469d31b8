//! In-memory session store.
//!
//! Backs the test suites and database-less runs. Failure injection
//! knobs let the capture-controller tests drive the collaborator-error
//! paths (persistence hiccups, completion failures).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::HubError;

use super::{AttachedDevice, CaptureSession, FrameUser, NewFrame, SessionStore};

#[derive(Default)]
struct Inner {
    devices: Vec<AttachedDevice>,
    sessions: Vec<CaptureSession>,
    frames: Vec<(NewFrame, Option<FrameUser>)>,
}

/// In-memory [`SessionStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    next_id: AtomicI64,
    fail_create_frame: AtomicBool,
    fail_complete_session: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    /// Provision a device, returning its auth token.
    pub fn provision_device(
        &self,
        device_code: &str,
        device_name: &str,
        valid_until: DateTime<Utc>,
    ) -> Uuid {
        let token = Uuid::new_v4();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .devices
            .push(AttachedDevice {
                id,
                device_code: device_code.to_string(),
                device_name: device_name.to_string(),
                auth_token: token,
                valid_until,
            });
        token
    }

    /// Make every subsequent `create_frame` fail.
    pub fn set_fail_create_frame(&self, fail: bool) {
        self.fail_create_frame.store(fail, Ordering::Relaxed);
    }

    /// Make every subsequent `complete_session` fail.
    pub fn set_fail_complete_session(&self, fail: bool) {
        self.fail_complete_session.store(fail, Ordering::Relaxed);
    }

    /// Number of frames recorded across all sessions.
    pub fn frame_count(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").frames.len()
    }

    /// The user association of the most recent frame, if any.
    pub fn last_frame(&self) -> Option<(String, Option<FrameUser>)> {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .frames
            .last()
            .map(|(frame, user)| (frame.outcome.clone(), *user))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find_attached_device(
        &self,
        device_code: &str,
        auth_token: Uuid,
    ) -> Result<Option<AttachedDevice>, HubError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .devices
            .iter()
            .find(|d| {
                d.device_code == device_code
                    && d.auth_token == auth_token
                    && d.valid_until > Utc::now()
            })
            .cloned())
    }

    async fn find_open_session(
        &self,
        device_code: &str,
    ) -> Result<Option<CaptureSession>, HubError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .sessions
            .iter()
            .find(|s| s.device_code == device_code && s.end_time.is_none())
            .cloned())
    }

    async fn create_session(&self, device_token: Uuid) -> Result<(), HubError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let device_code = inner
            .devices
            .iter()
            .find(|d| d.auth_token == device_token)
            .map(|d| d.device_code.clone())
            .ok_or(HubError::DeviceNotFound)?;

        if inner
            .sessions
            .iter()
            .any(|s| s.device_code == device_code && s.end_time.is_none())
        {
            return Err(HubError::SessionAlreadyOpen);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        inner.sessions.push(CaptureSession {
            id,
            session_type: "face-authorization".into(),
            device_code,
            end_time: None,
        });
        Ok(())
    }

    async fn count_frames(&self, session_id: i64) -> Result<u32, HubError> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner
            .frames
            .iter()
            .filter(|(f, _)| f.session_id == session_id)
            .count() as u32)
    }

    async fn create_frame(
        &self,
        frame: NewFrame,
        user: Option<FrameUser>,
    ) -> Result<(), HubError> {
        if self.fail_create_frame.load(Ordering::Relaxed) {
            return Err(HubError::Storage("simulated frame write failure".into()));
        }
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .frames
            .push((frame, user));
        Ok(())
    }

    async fn complete_session(&self, session_id: i64) -> Result<String, HubError> {
        if self.fail_complete_session.load(Ordering::Relaxed) {
            return Err(HubError::Storage("simulated completion failure".into()));
        }
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let session = inner
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id && s.end_time.is_none())
            .ok_or_else(|| HubError::Storage(format!("session {} not open", session_id)))?;
        session.end_time = Some(Utc::now());
        Ok(Uuid::new_v4().to_string())
    }
}
