//! HTTP upstream used by the bundled binary.
//!
//! Maps transport failures and non-success responses onto [`UpstreamError`]
//! so the classifier sees status codes, error codes and `Retry-After`.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use url::Url;

use crate::error::UpstreamError;

/// Fetches one JSON document per call.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: Url,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }

    /// Client shared by all probes. `request_timeout` bounds the whole
    /// exchange, so a stalled server surfaces as `ETIMEDOUT`.
    pub fn client(
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(concat!("pollguard/", env!("CARGO_PKG_VERSION")))
            .build()
    }

    pub async fn fetch(&self) -> Result<Value, UpstreamError> {
        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            let mut error = UpstreamError::new(
                status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            )
            .with_status(status.as_u16());
            if let Some(retry_after) = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
            {
                error = error.with_header("retry-after", retry_after);
            }
            return Err(error);
        }

        Ok(response.json::<Value>().await?)
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        let mut error = UpstreamError::new(err.to_string());
        if let Some(status) = err.status() {
            error = error.with_status(status.as_u16());
        }
        if err.is_timeout() {
            error = error.with_code("ETIMEDOUT");
        } else if err.is_connect() {
            error = error.with_code("ECONNREFUSED");
        } else if err.is_decode() {
            error = error.with_code("EDECODE");
        }
        error
    }
}
