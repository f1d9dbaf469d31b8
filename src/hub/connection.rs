//! Per-connection state: context, room memberships and the write half
//! of the transport.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::HubError;

/// Who a connection is, after the dispatcher has seen it.
///
/// Written exactly once: either at accept (admin, from the gate
/// identity) or during the authorize-device transition. Immutable for
/// the rest of the connection's life.
#[derive(Debug, Clone)]
pub enum ConnectionContext {
    Unauthenticated,
    Device {
        device_id: String,
        device_name: String,
        auth_token: Uuid,
    },
    Admin {
        user_id: String,
    },
}

impl ConnectionContext {
    pub fn is_admin(&self) -> bool {
        matches!(self, ConnectionContext::Admin { .. })
    }

    pub fn is_device(&self) -> bool {
        matches!(self, ConnectionContext::Device { .. })
    }
}

/// Write half of a connection's transport. A seam so the registry and
/// dispatcher can be exercised without sockets.
#[async_trait]
pub trait WireSink: Send {
    async fn send_text(&mut self, text: &str) -> Result<()>;
}

#[async_trait]
impl WireSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| anyhow::anyhow!("websocket send: {}", e))
    }
}

/// One live connection, owned by the registry for its lifetime.
///
/// The sink is behind an async mutex shared between the connection's
/// own loop (replies) and broadcasters; there is no separate writer
/// task. Every write is bounded by the caller's timeout so a stalled
/// peer cannot wedge a broadcast.
pub struct ConnectionHandle {
    pub id: Uuid,
    context: RwLock<ConnectionContext>,
    rooms: RwLock<HashSet<String>>,
    sink: Mutex<Box<dyn WireSink>>,
}

impl ConnectionHandle {
    pub fn new(sink: Box<dyn WireSink>, context: ConnectionContext, rooms: &[&str]) -> Self {
        Self {
            id: Uuid::new_v4(),
            context: RwLock::new(context),
            rooms: RwLock::new(rooms.iter().map(|r| r.to_string()).collect()),
            sink: Mutex::new(sink),
        }
    }

    pub async fn context(&self) -> ConnectionContext {
        self.context.read().await.clone()
    }

    pub async fn in_room(&self, room: &str) -> bool {
        self.rooms.read().await.contains(room)
    }

    /// The single context transition: unauthenticated to device.
    /// Rejected on an already-identified connection.
    pub async fn authorize_device(
        &self,
        device_id: String,
        device_name: String,
        auth_token: Uuid,
    ) -> Result<(), HubError> {
        let mut ctx = self.context.write().await;
        if !matches!(*ctx, ConnectionContext::Unauthenticated) {
            return Err(HubError::AlreadyAuthorized);
        }
        *ctx = ConnectionContext::Device {
            device_id,
            device_name,
            auth_token,
        };
        Ok(())
    }

    /// Write a frame of text to the peer, bounded by `timeout`.
    pub async fn send(&self, text: &str, timeout: Duration) -> Result<()> {
        let mut sink = self.sink.lock().await;
        tokio::time::timeout(timeout, sink.send_text(text))
            .await
            .map_err(|_| anyhow::anyhow!("write timed out after {:?}", timeout))?
    }
}
