//! Kao Hub - realtime relay for face-capture devices
//!
//! This crate provides everything needed to run the capture hub:
//! - Protocol: the JSON command/event envelopes on the wire
//! - Hub: connection registry, admin-room broadcast, command dispatch,
//!   and the capture-session state machine
//! - Store: sqlite-backed device authorizations, sessions and frames
//! - Recognition: HTTP client for the face-recognition service
//! - Web: axum WebSocket endpoint and status API
//!
//! # Architecture
//!
//! Input devices and admin consoles share one WebSocket endpoint.
//! Admins are admitted by a signed token at connect time and join the
//! `admin` room; devices start unauthenticated and present a
//! provisioned device token over the protocol. Devices drive capture
//! sessions; everything worth observing is broadcast into the admin
//! room as it happens.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kao_hub::{web, Config, HttpRecognitionClient, HubState, SqliteStore};
//!
//! let config = Config::from_env()?;
//! let store = Arc::new(SqliteStore::open(&config.database_path)?);
//! let recognizer = Arc::new(HttpRecognitionClient::new(&config.api_host, config.http_timeout)?);
//! let state = Arc::new(HubState::new(config.clone(), store, recognizer));
//! web::serve(state, config.bind).await?;
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod recognition;
pub mod store;
pub mod web;

pub use config::Config;
pub use error::HubError;
pub use hub::{CaptureController, HubState, Registry};
pub use recognition::{HttpRecognitionClient, RecognitionClient};
pub use store::{MemoryStore, SessionStore, SqliteStore};
