use std::time::Duration;

use async_trait::async_trait;

/// Fully rendered HTTP call, produced from a data source definition plus
/// the request payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedCall {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

/// HTTP seam of the dispatcher; tests substitute scripted transports.
#[async_trait]
pub trait OracleTransport: Send + Sync {
    async fn fetch(&self, call: &RenderedCall) -> Result<FetchResponse, TransportError>;
}

/// Production transport backed by `reqwest` with a per-call deadline.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OracleTransport for HttpTransport {
    async fn fetch(&self, call: &RenderedCall) -> Result<FetchResponse, TransportError> {
        let method: reqwest::Method = call
            .method
            .to_uppercase()
            .parse()
            .map_err(|_| TransportError::Network(format!("invalid method {}", call.method)))?;

        let mut request = self.client.request(method, &call.url);
        for (name, value) in &call.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &call.body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(FetchResponse { status, body })
    }
}
