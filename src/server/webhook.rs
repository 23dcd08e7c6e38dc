// src/server/webhook.rs

//! Push-event webhook: authentication and sync debouncing.
//!
//! `POST /webhook` accepts GitHub push events authenticated with an
//! HMAC-SHA256 signature over the raw body. Accepted events put a token
//! on a single-slot channel; the sync worker consumes tokens one at a
//! time, so any number of pushes during a running sync coalesce into at
//! most one queued cycle.

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ServerState;

type HmacSha256 = Hmac<Sha256>;

/// Environment variable holding the shared webhook secret
pub const SECRET_ENV: &str = "LURE_API_GITHUB_SECRET";

/// Handle `POST /webhook`
pub async fn handle(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event = headers
        .get("X-GitHub-Event")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if event != "push" {
        return (
            StatusCode::BAD_REQUEST,
            "Only push events are accepted by this bot",
        )
            .into_response();
    }

    if let Err(reason) = verify_signature(&headers, &body) {
        warn!(from = %addr, reason = %reason, "insecure webhook request");
        return (StatusCode::INTERNAL_SERVER_ERROR, reason).into_response();
    }

    enqueue_sync(&state.sig_tx);
    StatusCode::OK.into_response()
}

/// Verify the `X-Hub-Signature-256` header against the body.
///
/// The comparison is constant-time. Errors carry an operator-facing
/// reason and map to a 500 response.
fn verify_signature(headers: &HeaderMap, body: &[u8]) -> Result<(), String> {
    let header = headers
        .get("X-Hub-Signature-256")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let signature = hex::decode(header.trim_start_matches("sha256="))
        .map_err(|_| "malformed webhook signature".to_string())?;

    let secret = std::env::var(SECRET_ENV).map_err(|_| {
        format!("{SECRET_ENV} must be set to the secret used for setting up the webhook")
    })?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid webhook secret".to_string())?;
    mac.update(body);
    mac.verify_slice(&signature)
        .map_err(|_| "webhook signature mismatch".to_string())
}

/// Put a token on the single-slot signal channel.
///
/// A full slot means a sync is already queued; dropping the token keeps
/// the at-least-one-sync-after-last-send guarantee.
pub fn enqueue_sync(sig_tx: &mpsc::Sender<()>) {
    match sig_tx.try_send(()) {
        Ok(()) => debug!("sync signal enqueued"),
        Err(mpsc::error::TrySendError::Full(())) => debug!("sync already queued; signal coalesced"),
        Err(mpsc::error::TrySendError::Closed(())) => warn!("sync worker is gone; signal dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn headers_with_signature(signature: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-Hub-Signature-256", signature.parse().unwrap());
        headers
    }

    #[test]
    fn test_verify_signature_accepts_valid() {
        std::env::set_var(SECRET_ENV, "s");
        let headers = headers_with_signature(&sign("s", b"hello"));
        assert!(verify_signature(&headers, b"hello").is_ok());
    }

    #[test]
    fn test_verify_signature_rejects_wrong_secret() {
        std::env::set_var(SECRET_ENV, "s");
        let headers = headers_with_signature(&sign("other", b"hello"));
        assert!(verify_signature(&headers, b"hello").is_err());
    }

    #[test]
    fn test_verify_signature_rejects_tampered_body() {
        std::env::set_var(SECRET_ENV, "s");
        let headers = headers_with_signature(&sign("s", b"hello"));
        assert!(verify_signature(&headers, b"tampered").is_err());
    }

    #[test]
    fn test_enqueue_coalesces_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        enqueue_sync(&tx);
        enqueue_sync(&tx);
        enqueue_sync(&tx);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
