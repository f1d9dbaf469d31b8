//! Connection registry and room broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::{DeviceAuthorized, Reply};

use super::connection::{ConnectionContext, ConnectionHandle};

/// Point-in-time counters for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub devices: usize,
    pub admins: usize,
    pub events_broadcast: u64,
}

/// Every live connection, keyed by connection id.
///
/// Broadcast takes a snapshot of the membership and then writes outside
/// the map lock, so a slow peer never blocks registration. Each write
/// is bounded by the configured timeout and failures are logged and
/// skipped; delivery to the rest of the room proceeds regardless.
pub struct Registry {
    connections: RwLock<HashMap<Uuid, Arc<ConnectionHandle>>>,
    events_broadcast: AtomicU64,
    write_timeout: Duration,
}

impl Registry {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            events_broadcast: AtomicU64::new(0),
            write_timeout,
        }
    }

    pub async fn add(&self, handle: Arc<ConnectionHandle>) {
        let mut conns = self.connections.write().await;
        conns.insert(handle.id, handle);
        debug!(connections = conns.len(), "connection registered");
    }

    /// Idempotent: removing an unknown id is a no-op.
    pub async fn remove(&self, id: Uuid) {
        let mut conns = self.connections.write().await;
        if conns.remove(&id).is_some() {
            debug!(connections = conns.len(), "connection removed");
        }
    }

    /// Deliver `event` to every member of `room`, returning how many
    /// peers it actually reached.
    pub async fn send_to_room(&self, room: &str, event: &Reply) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                warn!(command = %event.command, "failed to encode event: {}", e);
                return 0;
            }
        };

        let members = {
            let conns = self.connections.read().await;
            let mut members = Vec::new();
            for handle in conns.values() {
                if handle.in_room(room).await {
                    members.push(handle.clone());
                }
            }
            members
        };

        let mut delivered = 0;
        for handle in members {
            match handle.send(&payload, self.write_timeout).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection = %handle.id, room, "dropping event for peer: {}", e);
                }
            }
        }

        self.events_broadcast.fetch_add(1, Ordering::Relaxed);
        debug!(room, command = %event.command, delivered, "event broadcast");
        delivered
    }

    /// Contexts of every connection currently identified as a device.
    pub async fn device_contexts(&self) -> Vec<DeviceAuthorized> {
        let conns = self.connections.read().await;
        let mut devices = Vec::new();
        for handle in conns.values() {
            if let ConnectionContext::Device {
                device_id,
                device_name,
                ..
            } = handle.context().await
            {
                devices.push(DeviceAuthorized {
                    device_id,
                    device_name,
                });
            }
        }
        devices
    }

    pub async fn stats(&self) -> HubStats {
        let conns = self.connections.read().await;
        let mut devices = 0;
        let mut admins = 0;
        for handle in conns.values() {
            match handle.context().await {
                ConnectionContext::Device { .. } => devices += 1,
                ConnectionContext::Admin { .. } => admins += 1,
                ConnectionContext::Unauthenticated => {}
            }
        }
        HubStats {
            connections: conns.len(),
            devices,
            admins,
            events_broadcast: self.events_broadcast.load(Ordering::Relaxed),
        }
    }
}
