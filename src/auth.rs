//! Authorization gate for inbound connections.
//!
//! An upstream console attaches an HS256-signed token to the
//! connection-establishing request (`auth_token` query parameter). The
//! gate verifies the signature and expiry and extracts the `user_id`
//! claim. It never rejects a connection: absent or invalid tokens
//! simply yield no identity, and the connection starts unauthenticated.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Identity resolved by the gate from a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    pub user_id: String,
}

/// Verify an HS256 token and extract the admin identity.
///
/// Returns `None` for anything that is not a well-formed, correctly
/// signed, unexpired token carrying a `user_id` claim.
pub fn verify_token(token: &str, secret: &str) -> Option<AdminIdentity> {
    let mut parts = token.split('.');
    let (header_b64, claims_b64, sig_b64) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let header: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header_b64).ok()?).ok()?;
    if header.get("alg").and_then(Value::as_str) != Some("HS256") {
        debug!("rejecting token with unexpected algorithm");
        return None;
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(claims_b64.as_bytes());
    let sig = URL_SAFE_NO_PAD.decode(sig_b64).ok()?;
    if mac.verify_slice(&sig).is_err() {
        debug!("rejecting token with bad signature");
        return None;
    }

    let claims: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(claims_b64).ok()?).ok()?;
    if let Some(exp) = claims.get("exp").and_then(Value::as_i64) {
        if Utc::now().timestamp() >= exp {
            debug!("rejecting expired token");
            return None;
        }
    }

    let user_id = match claims.get("user_id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return None,
    };

    Some(AdminIdentity { user_id })
}

/// Issue an HS256 token for a user id. Used by the development tooling
/// and the test suites; production tokens come from the upstream
/// console.
pub fn issue_token(user_id: &str, secret: &str, expires_at: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(
        serde_json::json!({"user_id": user_id, "exp": expires_at}).to_string(),
    );
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(header.as_bytes());
    mac.update(b".");
    mac.update(claims.as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{}.{}.{}", header, claims, sig)
}
