//! Command dispatch and the per-connection read loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AdminIdentity;
use crate::config::Config;
use crate::error::HubError;
use crate::protocol::{
    AuthorizationResult, Command, DeviceAuthorization, DeviceAuthorized, DeviceDisconnected,
    Envelope, FaceCaptureFrame, FrameCaptured, Reply, ResultTag, ADMIN_ROOM, EVT_AUTHORIZATION_RESULT,
    EVT_DEVICE_AUTHORIZED, EVT_DEVICE_DISCONNECTED, EVT_FRAME_CAPTURED,
};
use crate::recognition::RecognitionClient;
use crate::store::SessionStore;

use super::capture::{CaptureController, FrameOutcome};
use super::connection::{ConnectionContext, ConnectionHandle};
use super::registry::Registry;

/// Everything a connection needs to serve commands.
pub struct HubState {
    pub registry: Registry,
    pub controller: CaptureController,
    pub store: Arc<dyn SessionStore>,
    pub config: Config,
}

impl HubState {
    pub fn new(
        config: Config,
        store: Arc<dyn SessionStore>,
        recognizer: Arc<dyn RecognitionClient>,
    ) -> Self {
        Self {
            registry: Registry::new(config.write_timeout),
            controller: CaptureController::new(store.clone(), recognizer, config.frame_limit),
            store,
            config,
        }
    }
}

/// Drive one websocket connection to completion.
///
/// An admin identity from the connect-time gate lands the connection in
/// the admin room; everyone else starts unauthenticated and has to
/// authorize as a device. Either way, a single loop owns the read half
/// until close, protocol violation or transport error.
pub async fn run_connection(socket: WebSocket, identity: Option<AdminIdentity>, state: Arc<HubState>) {
    let (sink, mut stream) = socket.split();

    let (context, rooms): (ConnectionContext, &[&str]) = match identity {
        Some(AdminIdentity { user_id }) => {
            (ConnectionContext::Admin { user_id }, &[ADMIN_ROOM])
        }
        None => (ConnectionContext::Unauthenticated, &[]),
    };
    let handle = Arc::new(ConnectionHandle::new(Box::new(sink), context, rooms));
    state.registry.add(handle.clone()).await;
    info!(connection = %handle.id, "connection accepted");

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Binary(_)) => {
                warn!(connection = %handle.id, "binary frame on a text protocol, closing");
                break;
            }
            Err(e) => {
                warn!(connection = %handle.id, "transport error: {}", e);
                break;
            }
        };

        let env: Envelope = match serde_json::from_str(&text) {
            Ok(env) => env,
            Err(e) => {
                warn!(connection = %handle.id, "undecodable envelope, closing: {}", e);
                break;
            }
        };

        let reply = handle_envelope(&state, &handle, env).await;
        if let Ok(payload) = serde_json::to_string(&reply) {
            // A lost reply is the requester's problem; only read
            // failures terminate the loop.
            if let Err(e) = handle.send(&payload, state.config.write_timeout).await {
                warn!(connection = %handle.id, "reply write failed: {}", e);
            }
        }
    }

    teardown(&state, &handle).await;
}

/// On disconnect, a device's departure is announced to the admin room
/// before the connection leaves the registry. The open session, if any,
/// stays open for the device to resume.
async fn teardown(state: &HubState, handle: &ConnectionHandle) {
    if let ConnectionContext::Device { device_id, .. } = handle.context().await {
        info!(connection = %handle.id, device = %device_id, "device disconnected");
        let event = Reply::event(
            EVT_DEVICE_DISCONNECTED,
            serde_json::json!(DeviceDisconnected { device_id }),
        );
        state.registry.send_to_room(ADMIN_ROOM, &event).await;
    } else {
        info!(connection = %handle.id, "connection closed");
    }
    state.registry.remove(handle.id).await;
}

/// Parse and dispatch one envelope. Every failure turns into an error
/// reply on the same correlation id; nothing here closes the connection.
pub async fn handle_envelope(
    state: &HubState,
    handle: &ConnectionHandle,
    env: Envelope,
) -> Reply {
    let command = match Command::parse(&env) {
        Ok(command) => command,
        Err(e) => {
            warn!(connection = %handle.id, command = %env.command, "rejected: {}", e);
            return Reply::error(&env, &e.to_string());
        }
    };

    let result = match command {
        Command::AuthorizeDevice(dto) => authorize_device(state, handle, &env, dto).await,
        Command::GetDevices => get_devices(state, handle, &env).await,
        Command::StartCaptureSession => start_capture_session(state, handle, &env).await,
        Command::FaceCaptureFrame(dto) => face_capture_frame(state, handle, &env, dto).await,
    };

    result.unwrap_or_else(|e| {
        warn!(connection = %handle.id, command = %env.command, "failed: {}", e);
        Reply::error(&env, &e.to_string())
    })
}

async fn authorize_device(
    state: &HubState,
    handle: &ConnectionHandle,
    env: &Envelope,
    dto: DeviceAuthorization,
) -> Result<Reply, HubError> {
    let token = Uuid::parse_str(&dto.auth_token)
        .map_err(|_| HubError::InvalidToken("auth token is not a UUID".into()))?;

    let device = state
        .store
        .find_attached_device(&dto.device_id, token)
        .await?
        .ok_or(HubError::DeviceNotFound)?;

    handle
        .authorize_device(device.device_code.clone(), device.device_name.clone(), token)
        .await?;
    info!(connection = %handle.id, device = %device.device_code, "device authorized");

    let event = Reply::event(
        EVT_DEVICE_AUTHORIZED,
        serde_json::json!(DeviceAuthorized {
            device_id: device.device_code,
            device_name: device.device_name,
        }),
    );
    state.registry.send_to_room(ADMIN_ROOM, &event).await;

    Ok(Reply::success(env, serde_json::Value::Null))
}

async fn get_devices(
    state: &HubState,
    handle: &ConnectionHandle,
    env: &Envelope,
) -> Result<Reply, HubError> {
    if !handle.context().await.is_admin() {
        return Err(HubError::NotAdmin);
    }
    let devices = state.registry.device_contexts().await;
    Ok(Reply::success(env, serde_json::json!(devices)))
}

async fn start_capture_session(
    state: &HubState,
    handle: &ConnectionHandle,
    env: &Envelope,
) -> Result<Reply, HubError> {
    let (device_id, auth_token) = match handle.context().await {
        ConnectionContext::Device {
            device_id,
            auth_token,
            ..
        } => (device_id, auth_token),
        _ => return Err(HubError::NotDevice),
    };

    state.controller.start_session(&device_id, auth_token).await?;
    Ok(Reply::success(env, serde_json::Value::Null))
}

async fn face_capture_frame(
    state: &HubState,
    handle: &ConnectionHandle,
    env: &Envelope,
    dto: FaceCaptureFrame,
) -> Result<Reply, HubError> {
    let device_id = match handle.context().await {
        ConnectionContext::Device { device_id, .. } => device_id,
        _ => return Err(HubError::NotDevice),
    };

    match state.controller.ingest_frame(&device_id, dto.image).await? {
        FrameOutcome::Captured { image } => {
            let event = Reply::event(
                EVT_FRAME_CAPTURED,
                serde_json::json!(FrameCaptured { device_id, image }),
            );
            state.registry.send_to_room(ADMIN_ROOM, &event).await;
            Ok(Reply::success(env, serde_json::Value::Null))
        }
        // Session completion is announced on its own correlation id,
        // not as a reply to the triggering frame.
        FrameOutcome::Completed { token } => Ok(Reply {
            uuid: Uuid::new_v4(),
            command: EVT_AUTHORIZATION_RESULT.to_string(),
            result: ResultTag::Success,
            data: serde_json::json!(AuthorizationResult::issued(token)),
        }),
        FrameOutcome::CompletionFailed { message } => Ok(Reply {
            uuid: Uuid::new_v4(),
            command: EVT_AUTHORIZATION_RESULT.to_string(),
            result: ResultTag::Error,
            data: serde_json::json!(AuthorizationResult::failed(message)),
        }),
    }
}
