//! Client for the remote face-recognition service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::HubError;

const FACE_NOT_DETECTED: &str = "face not detected";
const NOT_RECOGNIZED: &str = "not recognized";
const RECOGNIZED: &str = "recognized";

/// Outcome tag of one classification call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecognitionOutcome {
    /// No face in the frame.
    NotDetected,
    /// A face, but not a known user.
    NotRecognized,
    /// A known user, with a confidence score.
    Recognized { user_id: i64, confidence: f64 },
}

/// Result of classifying one frame. `image` is the service's returned
/// (possibly annotated) image; on a recognized outcome it replaces the
/// original in the observer broadcast.
#[derive(Debug, Clone)]
pub struct Classification {
    pub outcome: RecognitionOutcome,
    pub image: String,
}

/// Capability interface over the recognition service.
#[async_trait]
pub trait RecognitionClient: Send + Sync {
    async fn classify(&self, image_base64: &str) -> Result<Classification, HubError>;
}

#[derive(Serialize)]
struct RecognitionRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecognitionResponse {
    result: String,
    #[serde(default)]
    user_id: i64,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    image: String,
}

/// HTTP implementation posting frames to `{base}/recognition/binary`.
pub struct HttpRecognitionClient {
    client: Client,
    base_url: String,
}

impl HttpRecognitionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HubError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HubError::Recognition(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RecognitionClient for HttpRecognitionClient {
    async fn classify(&self, image_base64: &str) -> Result<Classification, HubError> {
        let resp = self
            .client
            .post(format!("{}/recognition/binary", self.base_url))
            .json(&RecognitionRequest { image: image_base64 })
            .send()
            .await
            .map_err(|e| HubError::Recognition(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HubError::Recognition(format!("{}: {}", status, body)));
        }

        let body: RecognitionResponse = resp
            .json()
            .await
            .map_err(|e| HubError::Recognition(e.to_string()))?;

        let outcome = match body.result.as_str() {
            FACE_NOT_DETECTED => RecognitionOutcome::NotDetected,
            NOT_RECOGNIZED => RecognitionOutcome::NotRecognized,
            RECOGNIZED => RecognitionOutcome::Recognized {
                user_id: body.user_id,
                confidence: body.confidence,
            },
            other => {
                return Err(HubError::Recognition(format!(
                    "unexpected result tag: {}",
                    other
                )))
            }
        };
        debug!(?outcome, "frame classified");

        Ok(Classification {
            outcome,
            image: body.image,
        })
    }
}
