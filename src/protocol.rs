//! Wire protocol for the hub's persistent connections.
//!
//! Every application message is a JSON envelope carrying a correlation
//! id, a command name and an opaque payload. Inbound envelopes are
//! parsed into the closed [`Command`] set; anything outside that set is
//! rejected instead of falling through.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::HubError;

/// The only broadcast room in the base design.
pub const ADMIN_ROOM: &str = "admin";

pub const CMD_AUTHORIZE_DEVICE: &str = "authorize-device";
pub const CMD_GET_DEVICES: &str = "get-devices";
pub const CMD_START_CAPTURE_SESSION: &str = "start-capture-session";
pub const CMD_FACE_CAPTURE_FRAME: &str = "face-capture-frame";

/// Server-initiated event names (consumed by the admin console).
pub const EVT_DEVICE_AUTHORIZED: &str = "device-authorized";
pub const EVT_DEVICE_DISCONNECTED: &str = "device-disconnected";
pub const EVT_FRAME_CAPTURED: &str = "frame-captured";
pub const EVT_AUTHORIZATION_RESULT: &str = "authorization-result";

/// An inbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub uuid: Uuid,
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

/// Result tag carried by every outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultTag {
    Success,
    Error,
}

/// An outbound envelope: a correlated reply or a server-initiated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub uuid: Uuid,
    pub command: String,
    pub result: ResultTag,
    #[serde(default)]
    pub data: Value,
}

impl Reply {
    /// Success reply echoing the inbound correlation id and command.
    pub fn success(env: &Envelope, data: Value) -> Self {
        Self {
            uuid: env.uuid,
            command: env.command.clone(),
            result: ResultTag::Success,
            data,
        }
    }

    /// Error reply echoing the inbound correlation id and command, with
    /// the error message as payload.
    pub fn error(env: &Envelope, message: &str) -> Self {
        Self {
            uuid: env.uuid,
            command: env.command.clone(),
            result: ResultTag::Error,
            data: Value::String(message.to_string()),
        }
    }

    /// Server-initiated event with a fresh correlation id.
    pub fn event(command: &str, data: Value) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            command: command.to_string(),
            result: ResultTag::Success,
            data,
        }
    }
}

/// Closed set of commands a connection may issue.
#[derive(Debug, Clone)]
pub enum Command {
    AuthorizeDevice(DeviceAuthorization),
    GetDevices,
    StartCaptureSession,
    FaceCaptureFrame(FaceCaptureFrame),
}

impl Command {
    /// Parse an envelope into a command, validating the payload shape.
    pub fn parse(env: &Envelope) -> Result<Self, HubError> {
        match env.command.as_str() {
            CMD_AUTHORIZE_DEVICE => {
                let dto: DeviceAuthorization = serde_json::from_value(env.data.clone())
                    .map_err(|e| HubError::BadPayload(e.to_string()))?;
                Ok(Command::AuthorizeDevice(dto))
            }
            CMD_GET_DEVICES => Ok(Command::GetDevices),
            CMD_START_CAPTURE_SESSION => Ok(Command::StartCaptureSession),
            CMD_FACE_CAPTURE_FRAME => {
                let dto: FaceCaptureFrame = serde_json::from_value(env.data.clone())
                    .map_err(|e| HubError::BadPayload(e.to_string()))?;
                Ok(Command::FaceCaptureFrame(dto))
            }
            other => Err(HubError::UnknownCommand(other.to_string())),
        }
    }
}

/// Payload of `authorize-device`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuthorization {
    pub device_id: String,
    pub auth_token: String,
}

/// Payload of `face-capture-frame`: a base64-encoded image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceCaptureFrame {
    pub image: String,
}

/// Payload of the `device-authorized` event, also one entry of the
/// `get-devices` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuthorized {
    pub device_id: String,
    pub device_name: String,
}

/// Payload of the `device-disconnected` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDisconnected {
    pub device_id: String,
}

/// Payload of the `frame-captured` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameCaptured {
    pub device_id: String,
    pub image: String,
}

/// Payload of the `authorization-result` reply sent when a capture
/// session is forced to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationResult {
    pub result: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub token: String,
}

impl AuthorizationResult {
    pub fn issued(token: String) -> Self {
        Self {
            result: "success".into(),
            message: String::new(),
            token,
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            result: "error".into(),
            message,
            token: String::new(),
        }
    }
}
