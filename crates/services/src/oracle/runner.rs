//! Signed runner callbacks.
//!
//! When a request succeeds and a runner is configured, the dispatcher
//! POSTs `{request_id, payload, signature}` to the callback URL with the
//! `X-Oracle-Runner-Token` header. The signature covers
//! `request_id || canonical(payload)`; canonical form is the default
//! serde_json rendering, whose object keys are sorted.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use strato_crypto::{verify_hex, SigningPair};
use strato_primitives::id::RequestId;
use strato_primitives::Payload;

use super::transport::TransportError;

pub const RUNNER_TOKEN_HEADER: &str = "X-Oracle-Runner-Token";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CallbackError {
    #[error("runner_token_invalid")]
    TokenInvalid,

    #[error("callback signature verification failed")]
    Signature,
}

/// Bytes the callback signature covers.
pub fn callback_message(request_id: &RequestId, payload: &Payload) -> Vec<u8> {
    let mut message = request_id.as_str().as_bytes().to_vec();
    message.extend_from_slice(payload.to_string().as_bytes());
    message
}

/// Runner-side verification: token first (when configured), then the
/// signature against the dispatcher's public key.
pub fn verify_callback(
    public_key: &str,
    expected_token: Option<&str>,
    presented_token: Option<&str>,
    request_id: &RequestId,
    payload: &Payload,
    signature: &str,
) -> Result<(), CallbackError> {
    if let Some(expected) = expected_token {
        if presented_token != Some(expected) {
            return Err(CallbackError::TokenInvalid);
        }
    }

    let message = callback_message(request_id, payload);
    verify_hex(public_key, &message, signature).map_err(|_| CallbackError::Signature)
}

/// Dispatcher-side callback sender.
#[derive(Clone)]
pub struct RunnerClient {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    signer: Arc<SigningPair>,
}

impl RunnerClient {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        signer: Arc<SigningPair>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(Self { client, url: url.into(), token, signer })
    }

    pub fn public_key_hex(&self) -> String {
        self.signer.public_key_hex()
    }

    pub async fn notify(
        &self,
        request_id: &RequestId,
        payload: &Payload,
    ) -> Result<(), TransportError> {
        let signature = self.signer.sign_hex(&callback_message(request_id, payload));
        let body = json!({
            "request_id": request_id,
            "payload": payload,
            "signature": signature,
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.header(RUNNER_TOKEN_HEADER, token);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(err.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(TransportError::Network(format!(
                "runner rejected callback: http {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RunnerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerClient").field("url", &self.url).finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn round_trip_verification() {
        let signer = SigningPair::from_bytes([8u8; 32]);
        let request_id = RequestId::new("req-1");
        let payload = json!({"price": 42, "pair": "NEO/USD"});

        let signature = signer.sign_hex(&callback_message(&request_id, &payload));
        verify_callback(
            &signer.public_key_hex(),
            Some("token"),
            Some("token"),
            &request_id,
            &payload,
            &signature,
        )
        .unwrap();
    }

    #[test]
    fn wrong_or_missing_token_is_rejected() {
        let signer = SigningPair::from_bytes([8u8; 32]);
        let request_id = RequestId::new("req-1");
        let payload = json!({});
        let signature = signer.sign_hex(&callback_message(&request_id, &payload));

        let err = verify_callback(
            &signer.public_key_hex(),
            Some("token"),
            Some("other"),
            &request_id,
            &payload,
            &signature,
        )
        .unwrap_err();
        assert_eq!(err, CallbackError::TokenInvalid);

        let err = verify_callback(
            &signer.public_key_hex(),
            Some("token"),
            None,
            &request_id,
            &payload,
            &signature,
        )
        .unwrap_err();
        assert_eq!(err, CallbackError::TokenInvalid);
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let signer = SigningPair::from_bytes([8u8; 32]);
        let request_id = RequestId::new("req-1");
        let signature = signer.sign_hex(&callback_message(&request_id, &json!({"price": 42})));

        let err = verify_callback(
            &signer.public_key_hex(),
            None,
            None,
            &request_id,
            &json!({"price": 43}),
            &signature,
        )
        .unwrap_err();
        assert_eq!(err, CallbackError::Signature);
    }

    #[test]
    fn canonical_payload_is_key_order_independent() {
        // serde_json maps are BTree-backed, so logically equal objects
        // serialize identically.
        let a: Payload = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        let b: Payload = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let id = RequestId::new("r");
        assert_eq!(callback_message(&id, &a), callback_message(&id, &b));
    }
}
