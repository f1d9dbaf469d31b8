//! Error taxonomy for the hub core.
//!
//! Everything except a protocol error (malformed envelope, handled by
//! terminating the read loop) is converted into an error reply on the
//! originating connection; the display message becomes the payload.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("malformed payload: {0}")]
    BadPayload(String),

    #[error("invalid auth token: {0}")]
    InvalidToken(String),

    #[error("device not found or authorization expired")]
    DeviceNotFound,

    #[error("connection is already authorized")]
    AlreadyAuthorized,

    #[error("not authorized as admin")]
    NotAdmin,

    #[error("not authorized as input device")]
    NotDevice,

    #[error("capture session already exists")]
    SessionAlreadyOpen,

    #[error("no open capture session")]
    NoOpenSession,

    #[error("recognition failed: {0}")]
    Recognition(String),

    #[error("storage error: {0}")]
    Storage(String),
}
