//! Durable event-batching and upload engine for a client-side analytics SDK.
//!
//! Accepts a high-rate stream of opaque JSON event payloads, groups them
//! into size-bounded batches, persists each batch to a pluggable storage
//! backend, and uploads them to a remote ingestion endpoint with ordered
//! delivery, bounded retry, and server-assisted diagnostics.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use rsa_event_core::{Config, HttpSender, ReqwestHttpSender, RetryHeadersProvider, Storage, Uploader};
//! use rsa_event_core::config::ConfigBuilder;
//! use rsa_event_core::uploader::NoopHostCallbacks;
//! use rsa_event_core::backoff::BackoffPolicy;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ConfigBuilder::new()
//!         .data_plane_url("https://dataplane.example.com")
//!         .write_key("write-key")
//!         .build()
//!         .unwrap();
//!
//!     let storage = Arc::new(Storage::in_memory(&config));
//!     let http_sender: Arc<dyn HttpSender> = Arc::new(
//!         ReqwestHttpSender::new(
//!             &config.data_plane_url,
//!             &config.write_key,
//!             config.gzip_enabled,
//!             config.http_timeout,
//!         )
//!         .unwrap(),
//!     );
//!     let retry_headers = Arc::new(RetryHeadersProvider::new(Arc::clone(&storage)));
//!     let backoff = Arc::new(BackoffPolicy::default());
//!
//!     let uploader = Uploader::new(storage.clone(), http_sender, retry_headers, backoff, Arc::new(NoopHostCallbacks));
//!     uploader.start();
//!
//!     storage.write_event("{\"event\":\"hello\"}").unwrap();
//!     uploader.flush();
//!     tokio::time::sleep(Duration::from_millis(50)).await;
//! }
//! ```

pub mod anonymous_id;
pub mod backoff;
pub mod batch_manager;
pub mod config;
pub mod error;
pub mod http_sender;
pub mod kv_store;
pub mod retry_headers;
pub mod storage;
pub mod uploader;

pub use backoff::BackoffPolicy;
pub use batch_manager::{BatchId, BatchManager, FileBatchManager, InMemoryBatchManager};
pub use config::{Config, ConfigBuilder, PlatformType};
pub use error::{EventUploadResult, NonRetryAbleError, RetryAbleError, StorageError, UploaderError};
pub use http_sender::{HttpSender, ReqwestHttpSender, SharedHttpSender};
pub use kv_store::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};
pub use retry_headers::{RetryHeadersProvider, RetryMetadata};
pub use storage::Storage;
pub use uploader::{HostCallbacks, Uploader};
