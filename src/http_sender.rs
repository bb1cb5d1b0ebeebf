//! The boundary between the uploader and the network: a testable
//! [`HttpSender`] trait plus the production `reqwest`-based implementation.

use crate::error::EventUploadResult;
use base64::Engine;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Abstracts the single network call the uploader makes per attempt, so the
/// retry state machine can be tested without a real socket.
#[async_trait::async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, payload: String, headers: HashMap<String, String>) -> EventUploadResult;

    /// Update the `AnonymousId` header used for subsequent sends. Only the
    /// uploader's worker calls this, giving it de-facto exclusive access.
    fn set_anonymous_id(&self, anonymous_id: &str);
}

/// Production `HttpSender`: gzip body compression, Basic-auth from the
/// write key, and the `AnonymousId` header, posted to `<dataPlaneUrl>/v1/batch`.
pub struct ReqwestHttpSender {
    client: reqwest::Client,
    endpoint: String,
    write_key: String,
    gzip_enabled: bool,
    anonymous_id: Mutex<String>,
}

impl ReqwestHttpSender {
    pub fn new(
        data_plane_url: &str,
        write_key: &str,
        gzip_enabled: bool,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/batch", data_plane_url.trim_end_matches('/')),
            write_key: write_key.to_string(),
            gzip_enabled,
            anonymous_id: Mutex::new(String::new()),
        })
    }

    fn auth_header(&self) -> String {
        let token = format!("{}:", self.write_key);
        format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(token))
    }

    fn compress(&self, body: &str) -> Result<Vec<u8>, std::io::Error> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body.as_bytes())?;
        encoder.finish()
    }

    fn classify_transport_error(err: &reqwest::Error) -> EventUploadResult {
        use crate::error::RetryAbleError;

        if err.is_timeout() {
            EventUploadResult::RetryAble(RetryAbleError::ErrorTimeout)
        } else if err.is_connect() {
            EventUploadResult::RetryAble(RetryAbleError::ErrorNetworkUnavailable)
        } else {
            EventUploadResult::RetryAble(RetryAbleError::ErrorUnknown)
        }
    }
}

#[async_trait::async_trait]
impl HttpSender for ReqwestHttpSender {
    async fn send(&self, payload: String, headers: HashMap<String, String>) -> EventUploadResult {
        let anonymous_id = self.anonymous_id.lock().clone();
        let anonymous_id_header = base64::engine::general_purpose::STANDARD.encode(&anonymous_id);

        let mut request = self
            .client
            .post(&self.endpoint)
            .header(http::header::AUTHORIZATION, self.auth_header())
            .header(http::header::CONTENT_TYPE, "application/json")
            .header("AnonymousId", anonymous_id_header);

        for (name, value) in &headers {
            request = request.header(name, value);
        }

        let body = if self.gzip_enabled {
            match self.compress(&payload) {
                Ok(bytes) => {
                    request = request.header(http::header::CONTENT_ENCODING, "gzip");
                    bytes
                }
                Err(e) => {
                    tracing::warn!(error = %e, "gzip compression failed, sending uncompressed body");
                    payload.into_bytes()
                }
            }
        } else {
            payload.into_bytes()
        };

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "transport error sending batch");
                return Self::classify_transport_error(&err);
            }
        };

        let status = response.status().as_u16();
        let body_text = response.text().await.unwrap_or_default();

        tracing::debug!(status, "upload attempt completed");
        EventUploadResult::from_status(status, body_text)
    }

    fn set_anonymous_id(&self, anonymous_id: &str) {
        *self.anonymous_id.lock() = anonymous_id.to_string();
    }
}

/// Wraps a sender so callers can share it cheaply between tasks without
/// boxing at every call site.
pub type SharedHttpSender = Arc<dyn HttpSender>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_header_is_basic_base64_of_write_key_colon() {
        let sender = ReqwestHttpSender::new("https://example.com", "wk_123", false, Duration::from_secs(1)).unwrap();
        let expected = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("wk_123:")
        );
        assert_eq!(sender.auth_header(), expected);
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let sender = ReqwestHttpSender::new("https://example.com/", "wk", false, Duration::from_secs(1)).unwrap();
        assert_eq!(sender.endpoint, "https://example.com/v1/batch");
    }

    #[test]
    fn gzip_roundtrips_through_flate2() {
        let sender = ReqwestHttpSender::new("https://example.com", "wk", true, Duration::from_secs(1)).unwrap();
        let compressed = sender.compress("{\"batch\":[]}").unwrap();
        assert!(!compressed.is_empty());
    }
}
