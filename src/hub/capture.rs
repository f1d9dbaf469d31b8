//! Capture-session lifecycle: opening a session, running frames
//! through recognition, and forcing completion at the frame limit.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::HubError;
use crate::recognition::{RecognitionClient, RecognitionOutcome};
use crate::store::{FrameUser, NewFrame, SessionStore};

/// Where a device's capture session currently stands. Derived from the
/// store, never cached: the store is the single source of truth.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    /// No open session for the device.
    Idle,
    /// An open session with the given number of recorded frames.
    Open { session_id: i64, frames: u32 },
}

/// What one frame intake produced.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Frame was classified; broadcast `image` to observers.
    Captured { image: String },
    /// The frame limit was reached and the session closed with `token`.
    Completed { token: String },
    /// The frame limit was reached but closing the session failed.
    CompletionFailed { message: String },
}

/// Drives sessions for all devices. Stateless between calls; every
/// decision is made against the store so concurrent connections for
/// the same device cannot diverge.
pub struct CaptureController {
    store: Arc<dyn SessionStore>,
    recognizer: Arc<dyn RecognitionClient>,
    frame_limit: u32,
}

impl CaptureController {
    pub fn new(
        store: Arc<dyn SessionStore>,
        recognizer: Arc<dyn RecognitionClient>,
        frame_limit: u32,
    ) -> Self {
        Self {
            store,
            recognizer,
            frame_limit,
        }
    }

    pub async fn phase(&self, device_code: &str) -> Result<SessionPhase, HubError> {
        match self.store.find_open_session(device_code).await? {
            None => Ok(SessionPhase::Idle),
            Some(session) => {
                let frames = self.store.count_frames(session.id).await?;
                Ok(SessionPhase::Open {
                    session_id: session.id,
                    frames,
                })
            }
        }
    }

    /// Open a session for the device. One open session per device.
    pub async fn start_session(
        &self,
        device_code: &str,
        device_token: Uuid,
    ) -> Result<(), HubError> {
        if self.store.find_open_session(device_code).await?.is_some() {
            return Err(HubError::SessionAlreadyOpen);
        }
        self.store.create_session(device_token).await?;
        info!(device = device_code, "capture session opened");
        Ok(())
    }

    /// Run one frame through the session.
    ///
    /// With the frame limit already reached this intake does not touch
    /// recognition at all: it closes the session and reports the token
    /// (or the failure) instead. Below the limit the frame is
    /// classified, recorded when a face was found, and echoed back for
    /// the observer broadcast. Persistence failures are logged and do
    /// not interrupt the session.
    pub async fn ingest_frame(
        &self,
        device_code: &str,
        image: String,
    ) -> Result<FrameOutcome, HubError> {
        let session = self
            .store
            .find_open_session(device_code)
            .await?
            .ok_or(HubError::NoOpenSession)?;

        let frames = self.store.count_frames(session.id).await?;
        if frames >= self.frame_limit {
            return match self.store.complete_session(session.id).await {
                Ok(token) => {
                    info!(device = device_code, session = session.id, "capture session completed");
                    Ok(FrameOutcome::Completed { token })
                }
                Err(e) => {
                    warn!(device = device_code, session = session.id, "session completion failed: {}", e);
                    Ok(FrameOutcome::CompletionFailed {
                        message: e.to_string(),
                    })
                }
            };
        }

        let classification = self.recognizer.classify(&image).await?;
        debug!(device = device_code, outcome = ?classification.outcome, "frame classified");

        let broadcast_image = match classification.outcome {
            // Nothing to record; observers still see the raw frame.
            RecognitionOutcome::NotDetected => image,
            RecognitionOutcome::NotRecognized => {
                self.record_frame(session.id, "not recognized", None).await;
                image
            }
            RecognitionOutcome::Recognized {
                user_id,
                confidence,
            } => {
                self.record_frame(
                    session.id,
                    "recognized",
                    Some(FrameUser {
                        user_id,
                        confidence,
                    }),
                )
                .await;
                classification.image
            }
        };

        Ok(FrameOutcome::Captured {
            image: broadcast_image,
        })
    }

    async fn record_frame(&self, session_id: i64, outcome: &str, user: Option<FrameUser>) {
        let frame = NewFrame {
            session_id,
            outcome: outcome.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.store.create_frame(frame, user).await {
            warn!(session = session_id, "failed to record frame: {}", e);
        }
    }
}
