//! Kao Hub binary
//!
//! Realtime relay between face-capture input devices, the recognition
//! service and admin consoles.
//!
//! ## Usage
//!
//! ```bash
//! # Run the hub
//! kao-hub
//!
//! # On a different port with a custom database
//! PORT=9000 DATABASE_PATH=/var/lib/kao/hub.db kao-hub
//!
//! # With verbose logging
//! RUST_LOG=kao_hub=debug kao-hub
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use kao_hub::{web, Config, HttpRecognitionClient, HubState, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kao_hub=info".parse().unwrap()),
        )
        .init();

    let config = Config::from_env()?;

    info!("Kao Hub starting");
    info!("  Bind: {}", config.bind);
    info!("  Database: {:?}", config.database_path);
    info!("  Recognition API: {}", config.api_host);
    info!("  Frame limit: {}", config.frame_limit);

    let store = Arc::new(SqliteStore::open(&config.database_path)?);
    let recognizer = Arc::new(HttpRecognitionClient::new(
        &config.api_host,
        config.http_timeout,
    )?);

    let bind = config.bind;
    let state = Arc::new(HubState::new(config, store, recognizer));

    web::serve(state, bind).await
}
