//! The uploader state machine: drains a signal channel, rolls over pending
//! events, and uploads every closed batch sequentially with retry and
//! terminal-error handling.

use crate::anonymous_id;
use crate::backoff::BackoffPolicy;
use crate::batch_manager::{BatchId, SENT_AT_PLACEHOLDER};
use crate::error::{EventUploadResult, NonRetryAbleError};
use crate::http_sender::SharedHttpSender;
use crate::retry_headers::RetryHeadersProvider;
use crate::storage::Storage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};

/// Sentinel sent on the signal channel to request a flush.
const FLUSH_SIGNAL: &str = "#!upload";

/// Host-level callbacks for the two fatal-for-stream terminal errors. The
/// core exposes nothing else to its caller on the error path.
pub trait HostCallbacks: Send + Sync {
    fn handle_invalid_write_key(&self);
    fn disable_source(&self);
}

/// No-op callbacks, useful for embedding contexts that don't care about
/// these notifications.
pub struct NoopHostCallbacks;

impl HostCallbacks for NoopHostCallbacks {
    fn handle_invalid_write_key(&self) {}
    fn disable_source(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploaderState {
    Idle,
    Running,
    Cancelled,
}

struct CancellationToken {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Drains an unbounded signal channel; for each signal, rolls over pending
/// events, then uploads every closed batch in order.
pub struct Uploader {
    storage: Arc<Storage>,
    http_sender: SharedHttpSender,
    retry_headers: Arc<RetryHeadersProvider>,
    backoff: Arc<BackoffPolicy>,
    callbacks: Arc<dyn HostCallbacks>,
    state: Mutex<UploaderState>,
    tx: Mutex<Option<mpsc::UnboundedSender<&'static str>>>,
    token: Arc<CancellationToken>,
    last_anonymous_id: Mutex<String>,
    self_weak: Weak<Uploader>,
}

impl Uploader {
    pub fn new(
        storage: Arc<Storage>,
        http_sender: SharedHttpSender,
        retry_headers: Arc<RetryHeadersProvider>,
        backoff: Arc<BackoffPolicy>,
        callbacks: Arc<dyn HostCallbacks>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            storage,
            http_sender,
            retry_headers,
            backoff,
            callbacks,
            state: Mutex::new(UploaderState::Idle),
            tx: Mutex::new(None),
            token: Arc::new(CancellationToken::new()),
            last_anonymous_id: Mutex::new(String::new()),
            self_weak: weak.clone(),
        })
    }

    /// Idempotent while `Running`. From `Idle` or `Cancelled`, recreates the
    /// signal channel and spawns a single worker task.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if *state == UploaderState::Running {
            return;
        }

        tracing::debug!(from = ?*state, "uploader starting");
        self.token.reset();
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.lock() = Some(tx);
        *state = UploaderState::Running;
        drop(state);

        let this = self
            .self_weak
            .upgrade()
            .expect("uploader is still alive while start() runs on it");
        tokio::spawn(async move {
            this.run(rx).await;
        });
    }

    /// Non-blocking request to roll over and upload. Dropped silently if the
    /// signal channel is closed.
    pub fn flush(&self) {
        tracing::debug!("flush requested");
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(FLUSH_SIGNAL);
        }
    }

    /// Cancels the worker task and closes the signal channel.
    pub fn cancel(&self) {
        tracing::debug!("uploader cancelling");
        self.token.cancel();
        *self.tx.lock() = None;
        *self.state.lock() = UploaderState::Cancelled;
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<&'static str>) {
        while rx.recv().await.is_some() {
            if self.token.is_cancelled() {
                break;
            }
            self.drain_once().await;
        }
    }

    async fn drain_once(&self) {
        self.storage.rollover();

        let joined = self.storage.read_events("");
        let ids = parse_batch_ids(&joined);

        for id in ids {
            if self.token.is_cancelled() {
                return;
            }

            let Some(content) = self.storage.read_batch_content(id) else {
                continue;
            };

            self.maybe_update_anonymous_id(&content);

            if !self.upload_with_retries(id, &content).await {
                return;
            }
        }
    }

    fn maybe_update_anonymous_id(&self, content: &str) {
        let extracted = anonymous_id::extract(content);
        let mut last = self.last_anonymous_id.lock();
        if *last != extracted {
            self.http_sender.set_anonymous_id(&extracted);
            *last = extracted;
        }
    }

    /// Runs the retry loop for a single batch. Returns `false` if the
    /// uploader was cancelled (401/404) and the worker should stop entirely,
    /// `true` to continue with the next batch.
    async fn upload_with_retries(&self, id: BatchId, content: &str) -> bool {
        loop {
            if self.token.is_cancelled() {
                return false;
            }

            let now = now_ms();
            let headers = self.retry_headers.get_headers(id, now);
            let payload = replace_sent_at(content, &iso8601_now());

            let result = self.http_sender.send(payload, headers).await;

            match result {
                EventUploadResult::Success(_) => {
                    self.retry_headers.clear();
                    self.backoff.reset();
                    self.storage.remove(id);
                    return true;
                }
                EventUploadResult::RetryAble(err) => {
                    tracing::warn!(batch_id = %id, error = %err, "retryable upload failure");
                    self.retry_headers.record_failure(id, now, &err);
                    tokio::select! {
                        _ = self.backoff.delay_with_backoff() => {}
                        _ = self.token.notify.notified() => return false,
                    }
                }
                EventUploadResult::NonRetryAble(err) => {
                    self.retry_headers.clear();
                    self.backoff.reset();
                    return self.handle_terminal(id, err);
                }
            }
        }
    }

    /// Applies the terminal-error handler table. Returns `false` when the
    /// uploader must stop (401/404), `true` to continue with the next batch.
    fn handle_terminal(&self, id: BatchId, err: NonRetryAbleError) -> bool {
        tracing::error!(batch_id = %id, error = %err, "non-retryable upload failure");
        match err {
            NonRetryAbleError::Error400 => {
                self.storage.remove(id);
                true
            }
            NonRetryAbleError::Error401 => {
                self.cancel();
                self.callbacks.handle_invalid_write_key();
                false
            }
            NonRetryAbleError::Error404 => {
                self.cancel();
                self.callbacks.disable_source();
                false
            }
            NonRetryAbleError::Error413 => {
                self.storage.remove(id);
                true
            }
        }
    }
}

fn parse_batch_ids(joined: &str) -> Vec<BatchId> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined
        .split(", ")
        .filter_map(|s| s.parse::<u64>().ok())
        .map(BatchId)
        .collect()
}

fn replace_sent_at(content: &str, timestamp: &str) -> String {
    content.replace(SENT_AT_PLACEHOLDER, timestamp)
}

fn iso8601_now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::error::RetryAbleError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify as TokioNotify;

    struct FakeHttpSender {
        responses: Mutex<Vec<EventUploadResult>>,
        calls: Mutex<Vec<HashMap<String, String>>>,
        anonymous_id: Mutex<String>,
        done: Arc<TokioNotify>,
        remaining: AtomicUsize,
    }

    impl FakeHttpSender {
        fn new(responses: Vec<EventUploadResult>) -> Arc<Self> {
            let remaining = responses.len();
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
                anonymous_id: Mutex::new(String::new()),
                done: Arc::new(TokioNotify::new()),
                remaining: AtomicUsize::new(remaining),
            })
        }
    }

    #[async_trait]
    impl crate::http_sender::HttpSender for FakeHttpSender {
        async fn send(&self, _payload: String, headers: HashMap<String, String>) -> EventUploadResult {
            self.calls.lock().push(headers);
            let result = {
                let mut responses = self.responses.lock();
                if responses.is_empty() {
                    EventUploadResult::Success("{}".to_string())
                } else {
                    responses.remove(0)
                }
            };
            if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.done.notify_one();
            }
            result
        }

        fn set_anonymous_id(&self, anonymous_id: &str) {
            *self.anonymous_id.lock() = anonymous_id.to_string();
        }
    }

    struct RecordingCallbacks {
        invalid_write_key: AtomicUsize,
        disabled_source: AtomicUsize,
    }

    impl RecordingCallbacks {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                invalid_write_key: AtomicUsize::new(0),
                disabled_source: AtomicUsize::new(0),
            })
        }
    }

    impl HostCallbacks for RecordingCallbacks {
        fn handle_invalid_write_key(&self) {
            self.invalid_write_key.fetch_add(1, Ordering::SeqCst);
        }
        fn disable_source(&self) {
            self.disabled_source.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_storage() -> Arc<Storage> {
        let config = ConfigBuilder::new()
            .data_plane_url("https://example.com")
            .write_key("wk_test")
            .build()
            .unwrap();
        Arc::new(Storage::in_memory(&config))
    }

    fn fast_backoff() -> Arc<BackoffPolicy> {
        Arc::new(
            BackoffPolicy::new(
                std::time::Duration::from_millis(1),
                std::time::Duration::from_millis(5),
            )
            .with_jitter(crate::backoff::JitterMode::None),
        )
    }

    #[tokio::test]
    async fn first_attempt_success_clears_and_removes_batch() {
        let storage = test_storage();
        storage.write_event("{\"a\":1}").unwrap();
        storage.write_event("{\"b\":2}").unwrap();

        let sender = FakeHttpSender::new(vec![EventUploadResult::Success("Ok".to_string())]);
        let retry_headers = Arc::new(RetryHeadersProvider::new(Arc::clone(&storage)));
        let uploader = Uploader::new(
            Arc::clone(&storage),
            sender.clone(),
            Arc::clone(&retry_headers),
            fast_backoff(),
            RecordingCallbacks::new(),
        );

        uploader.start();
        uploader.flush();
        sender.done.notified().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(sender.calls.lock().len(), 1);
        assert!(sender.calls.lock()[0].is_empty());
        assert!(storage.read_file_list().is_empty());
    }

    #[tokio::test]
    async fn transient_then_success_records_failure_and_clears() {
        let storage = test_storage();
        storage.write_event("{\"a\":1}").unwrap();

        let sender = FakeHttpSender::new(vec![
            EventUploadResult::RetryAble(RetryAbleError::ErrorRetry(Some(500))),
            EventUploadResult::Success("Ok".to_string()),
        ]);
        let retry_headers = Arc::new(RetryHeadersProvider::new(Arc::clone(&storage)));
        let uploader = Uploader::new(
            Arc::clone(&storage),
            sender.clone(),
            Arc::clone(&retry_headers),
            fast_backoff(),
            RecordingCallbacks::new(),
        );

        uploader.start();
        uploader.flush();
        sender.done.notified().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let calls = sender.calls.lock();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].is_empty());
        assert_eq!(calls[1]["Rsa-Retry-Attempt"], "1");
        assert_eq!(calls[1]["Rsa-Retry-Reason"], "server-500");
        assert!(storage.read_file_list().is_empty());
    }

    #[tokio::test]
    async fn terminal_401_cancels_and_preserves_batch() {
        let storage = test_storage();
        storage.write_event("{\"a\":1}").unwrap();

        let sender = FakeHttpSender::new(vec![EventUploadResult::NonRetryAble(
            crate::error::NonRetryAbleError::Error401,
        )]);
        let retry_headers = Arc::new(RetryHeadersProvider::new(Arc::clone(&storage)));
        let callbacks = RecordingCallbacks::new();
        let uploader = Uploader::new(
            Arc::clone(&storage),
            sender.clone(),
            Arc::clone(&retry_headers),
            fast_backoff(),
            Arc::clone(&callbacks) as Arc<dyn HostCallbacks>,
        );

        uploader.start();
        uploader.flush();
        sender.done.notified().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(callbacks.invalid_write_key.load(Ordering::SeqCst), 1);
        assert_eq!(storage.read_file_list().len(), 1);
        assert_eq!(*uploader.state.lock(), UploaderState::Cancelled);
    }

    #[tokio::test]
    async fn terminal_413_removes_batch_and_keeps_running() {
        let storage = test_storage();
        storage.write_event("{\"a\":1}").unwrap();

        let sender = FakeHttpSender::new(vec![EventUploadResult::NonRetryAble(
            crate::error::NonRetryAbleError::Error413,
        )]);
        let retry_headers = Arc::new(RetryHeadersProvider::new(Arc::clone(&storage)));
        let uploader = Uploader::new(
            Arc::clone(&storage),
            sender.clone(),
            Arc::clone(&retry_headers),
            fast_backoff(),
            RecordingCallbacks::new(),
        );

        uploader.start();
        uploader.flush();
        sender.done.notified().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(storage.read_file_list().is_empty());
        assert_eq!(*uploader.state.lock(), UploaderState::Running);
    }

    #[tokio::test]
    async fn mixed_retry_chain_produces_the_expected_reason_sequence() {
        let storage = test_storage();
        storage.write_event("{\"a\":1}").unwrap();

        let sender = FakeHttpSender::new(vec![
            EventUploadResult::RetryAble(RetryAbleError::ErrorRetry(Some(500))),
            EventUploadResult::RetryAble(RetryAbleError::ErrorNetworkUnavailable),
            EventUploadResult::RetryAble(RetryAbleError::ErrorTimeout),
            EventUploadResult::RetryAble(RetryAbleError::ErrorUnknown),
            EventUploadResult::Success("Ok".to_string()),
        ]);
        let retry_headers = Arc::new(RetryHeadersProvider::new(Arc::clone(&storage)));
        let uploader = Uploader::new(
            Arc::clone(&storage),
            sender.clone(),
            Arc::clone(&retry_headers),
            fast_backoff(),
            RecordingCallbacks::new(),
        );

        uploader.start();
        uploader.flush();
        sender.done.notified().await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let calls = sender.calls.lock();
        assert_eq!(calls.len(), 5);
        assert!(calls[0].is_empty());
        assert_eq!(calls[1]["Rsa-Retry-Reason"], "server-500");
        assert_eq!(calls[2]["Rsa-Retry-Reason"], "client-network");
        assert_eq!(calls[3]["Rsa-Retry-Reason"], "client-timeout");
        assert_eq!(calls[4]["Rsa-Retry-Reason"], "client-unknown");
        for (i, call) in calls.iter().enumerate().skip(1) {
            assert_eq!(call["Rsa-Retry-Attempt"], i.to_string());
        }
        assert!(storage.read_file_list().is_empty());
    }

    #[test]
    fn parse_batch_ids_splits_on_comma_space() {
        assert_eq!(parse_batch_ids(""), Vec::<BatchId>::new());
        assert_eq!(parse_batch_ids("1, 2, 5, 10"), vec![BatchId(1), BatchId(2), BatchId(5), BatchId(10)]);
    }

    #[test]
    fn replace_sent_at_substitutes_placeholder() {
        let content = "{\"batch\":[],\"sentAt\":\"1970-01-01T00:00:00.000Z\"}";
        let replaced = replace_sent_at(content, "2026-07-28T00:00:00.000Z");
        assert!(replaced.contains("2026-07-28T00:00:00.000Z"));
        assert!(!replaced.contains("1970-01-01"));
    }
}
