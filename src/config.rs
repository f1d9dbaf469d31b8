//! Process configuration from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Hub configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the WebSocket listener binds to (HOST/PORT, default 0.0.0.0:5005).
    pub bind: SocketAddr,
    /// Sqlite database path (DATABASE_PATH, default ./kao_hub.db).
    pub database_path: PathBuf,
    /// Recognition service base URL (API_HOST, default http://localhost:8000/api).
    pub api_host: String,
    /// HMAC secret for validating admin tokens (AUTH_SECRET).
    pub auth_secret: String,
    /// Recorded-frame threshold that forces session completion (KAO_FRAME_LIMIT, default 10).
    pub frame_limit: u32,
    /// Timeout on outbound recognition calls (KAO_HTTP_TIMEOUT_SECS, default 10).
    pub http_timeout: Duration,
    /// Per-connection timeout on broadcast writes (KAO_WRITE_TIMEOUT_SECS, default 5).
    pub write_timeout: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = env_or("HOST", "0.0.0.0");
        let port = env_or("PORT", "5005");
        let bind: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid HOST/PORT: {}:{}", host, port))?;

        let frame_limit: u32 = env_or("KAO_FRAME_LIMIT", "10")
            .parse()
            .context("invalid KAO_FRAME_LIMIT")?;

        let http_timeout_secs: u64 = env_or("KAO_HTTP_TIMEOUT_SECS", "10")
            .parse()
            .context("invalid KAO_HTTP_TIMEOUT_SECS")?;

        let write_timeout_secs: u64 = env_or("KAO_WRITE_TIMEOUT_SECS", "5")
            .parse()
            .context("invalid KAO_WRITE_TIMEOUT_SECS")?;

        Ok(Self {
            bind,
            database_path: PathBuf::from(env_or("DATABASE_PATH", "./kao_hub.db")),
            api_host: env_or("API_HOST", "http://localhost:8000/api"),
            auth_secret: env_or("AUTH_SECRET", "kao-dev-secret"),
            frame_limit,
            http_timeout: Duration::from_secs(http_timeout_secs),
            write_timeout: Duration::from_secs(write_timeout_secs),
        })
    }
}

impl Default for Config {
    /// Defaults used by tests; `from_env` is the production path.
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:0".parse().expect("static addr"),
            database_path: PathBuf::from("./kao_hub.db"),
            api_host: "http://localhost:8000/api".into(),
            auth_secret: "kao-dev-secret".into(),
            frame_limit: 10,
            http_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
        }
    }
}
