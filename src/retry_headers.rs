//! Persisted per-batch retry state and the three retry headers derived
//! from it.

use crate::batch_manager::BatchId;
use crate::error::{NonRetryAbleError, RetryAbleError};
use crate::storage::{Storage, RETRY_METADATA_KEY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const HEADER_RETRY_ATTEMPT: &str = "Rsa-Retry-Attempt";
pub const HEADER_SINCE_LAST_ATTEMPT: &str = "Rsa-Since-Last-Attempt";
pub const HEADER_RETRY_REASON: &str = "Rsa-Retry-Reason";

/// Persisted record describing the retry state of the batch currently being
/// uploaded. At most one instance exists at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryMetadata {
    pub batch_id: u64,
    pub attempt: u32,
    pub last_attempt_timestamp_ms: i64,
    pub reason: String,
}

impl RetryMetadata {
    fn to_json(&self) -> String {
        serde_json::to_string(self).expect("RetryMetadata always serializes")
    }

    /// Any parse error (empty string, malformed JSON, missing required
    /// field) is treated as absent.
    fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Map a retry-able error to the wire `reason` token.
/// `ErrorRetry(Some(status))` renders `server-<status>`; every other variant
/// maps to a fixed token.
fn reason_string(error: &RetryAbleError) -> String {
    match error {
        RetryAbleError::ErrorRetry(Some(status)) => format!("server-{status}"),
        RetryAbleError::ErrorRetry(None) => "client-network".to_string(),
        RetryAbleError::ErrorNetworkUnavailable => "client-network".to_string(),
        RetryAbleError::ErrorTimeout => "client-timeout".to_string(),
        RetryAbleError::ErrorUnknown => "client-unknown".to_string(),
    }
}

/// Derives and persists the three retry headers across attempts and process
/// restarts, backed by `Storage`'s typed string accessor.
pub struct RetryHeadersProvider {
    storage: Arc<Storage>,
}

impl RetryHeadersProvider {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    fn load(&self) -> Option<RetryMetadata> {
        let raw = self.storage.read_string(RETRY_METADATA_KEY, "");
        if raw.is_empty() {
            return None;
        }
        RetryMetadata::from_json(&raw)
    }

    /// Returns the three headers for `batch_id`, or an empty map if no
    /// record exists or the stored record belongs to a different batch
    /// (stale metadata is ignored, not deleted, on read).
    pub fn get_headers(&self, batch_id: BatchId, now_ms: i64) -> HashMap<String, String> {
        let Some(record) = self.load() else {
            return HashMap::new();
        };
        if record.batch_id != batch_id.0 {
            return HashMap::new();
        }

        let elapsed = (now_ms - record.last_attempt_timestamp_ms).max(0);

        let mut headers = HashMap::new();
        headers.insert(HEADER_RETRY_ATTEMPT.to_string(), record.attempt.to_string());
        headers.insert(HEADER_SINCE_LAST_ATTEMPT.to_string(), elapsed.to_string());
        headers.insert(HEADER_RETRY_REASON.to_string(), record.reason);
        headers
    }

    /// Records a failure for `batch_id`. Increments `attempt` if the
    /// existing record belongs to the same batch, otherwise starts a fresh
    /// record at `attempt = 1`.
    pub fn record_failure(&self, batch_id: BatchId, now_ms: i64, error: &RetryAbleError) {
        let attempt = match self.load() {
            Some(record) if record.batch_id == batch_id.0 => record.attempt + 1,
            _ => 1,
        };

        let record = RetryMetadata {
            batch_id: batch_id.0,
            attempt,
            last_attempt_timestamp_ms: now_ms,
            reason: reason_string(error),
        };
        let _ = self.storage.write_string(RETRY_METADATA_KEY, &record.to_json());
    }

    /// Removes the record entirely. Called after success or any
    /// non-retryable error.
    pub fn clear(&self) {
        self.storage.remove_key(RETRY_METADATA_KEY);
    }
}

/// Terminal (non-retryable) errors also clear retry metadata before their
/// batch-level handler runs; exposed so the uploader can share one call site
/// for both retry-able and terminal failure bookkeeping.
pub fn clears_metadata_on(_error: &NonRetryAbleError) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;

    fn provider() -> RetryHeadersProvider {
        let config = ConfigBuilder::new()
            .data_plane_url("https://example.com")
            .write_key("wk_test")
            .build()
            .unwrap();
        RetryHeadersProvider::new(Arc::new(Storage::in_memory(&config)))
    }

    #[test]
    fn first_failure_starts_attempt_at_one() {
        let provider = provider();
        provider.record_failure(BatchId(5), 1_000, &RetryAbleError::ErrorRetry(Some(500)));
        let headers = provider.get_headers(BatchId(5), 1_500);
        assert_eq!(headers[HEADER_RETRY_ATTEMPT], "1");
        assert_eq!(headers[HEADER_SINCE_LAST_ATTEMPT], "500");
        assert_eq!(headers[HEADER_RETRY_REASON], "server-500");
    }

    #[test]
    fn repeated_failures_on_same_batch_increment_attempt() {
        let provider = provider();
        provider.record_failure(BatchId(5), 1_000, &RetryAbleError::ErrorRetry(Some(500)));
        provider.record_failure(BatchId(5), 2_000, &RetryAbleError::ErrorNetworkUnavailable);
        provider.record_failure(BatchId(5), 3_000, &RetryAbleError::ErrorTimeout);
        provider.record_failure(BatchId(5), 4_000, &RetryAbleError::ErrorUnknown);

        let headers = provider.get_headers(BatchId(5), 4_000);
        assert_eq!(headers[HEADER_RETRY_ATTEMPT], "4");
        assert_eq!(headers[HEADER_RETRY_REASON], "client-unknown");
    }

    #[test]
    fn failure_on_different_batch_resets_attempt() {
        let provider = provider();
        provider.record_failure(BatchId(5), 1_000, &RetryAbleError::ErrorRetry(Some(500)));
        provider.record_failure(BatchId(6), 2_000, &RetryAbleError::ErrorTimeout);

        let headers = provider.get_headers(BatchId(6), 2_000);
        assert_eq!(headers[HEADER_RETRY_ATTEMPT], "1");
    }

    #[test]
    fn stale_batch_id_yields_empty_headers_but_preserves_record() {
        let provider = provider();
        provider.record_failure(BatchId(5), 1_000, &RetryAbleError::ErrorTimeout);
        assert!(provider.get_headers(BatchId(99), 1_000).is_empty());
        assert!(!provider.get_headers(BatchId(5), 1_000).is_empty());
    }

    #[test]
    fn clock_skew_is_clamped_to_zero() {
        let provider = provider();
        provider.record_failure(BatchId(5), 10_000, &RetryAbleError::ErrorTimeout);
        let headers = provider.get_headers(BatchId(5), 1_000);
        assert_eq!(headers[HEADER_SINCE_LAST_ATTEMPT], "0");
    }

    #[test]
    fn clear_removes_record_entirely() {
        let provider = provider();
        provider.record_failure(BatchId(5), 1_000, &RetryAbleError::ErrorTimeout);
        provider.clear();
        assert!(provider.get_headers(BatchId(5), 1_000).is_empty());
    }

    #[test]
    fn round_trip_json() {
        let record = RetryMetadata {
            batch_id: 1,
            attempt: 2,
            last_attempt_timestamp_ms: 123,
            reason: "client-timeout".to_string(),
        };
        let json = record.to_json();
        assert_eq!(RetryMetadata::from_json(&json), Some(record));

        assert_eq!(RetryMetadata::from_json(""), None);
        assert_eq!(RetryMetadata::from_json("{invalid}"), None);
        assert_eq!(RetryMetadata::from_json("{\"batchId\":0}"), None);
    }
}
