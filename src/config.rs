//! Runtime configuration for the batching/upload core.

use std::path::PathBuf;
use std::time::Duration;

/// Controls closed-batch enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformType {
    /// Long-lived processes; enumeration sorts numerically so ordering is
    /// strict across restarts.
    Server,
    /// Low batch counts; enumeration returns raw filesystem/insertion order
    /// to avoid sort allocations.
    Mobile,
}

/// Immutable configuration shared by `Storage`, `Uploader`, and
/// `ReqwestHttpSender`.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_plane_url: String,
    pub write_key: String,
    pub gzip_enabled: bool,
    pub platform_type: PlatformType,
    pub max_payload_size: usize,
    pub max_batch_size: usize,
    pub http_timeout: Duration,
    pub base_dir: PathBuf,
}

/// Builder for [`Config`], mirroring the fallible-builder style the
/// networking layer uses for its client configuration.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    data_plane_url: Option<String>,
    write_key: Option<String>,
    gzip_enabled: bool,
    platform_type: Option<PlatformType>,
    max_payload_size: Option<usize>,
    max_batch_size: Option<usize>,
    http_timeout: Option<Duration>,
    base_dir: Option<PathBuf>,
}

/// Error returned when a required [`ConfigBuilder`] field is missing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("dataPlaneUrl is required")]
    MissingDataPlaneUrl,
    #[error("writeKey is required")]
    MissingWriteKey,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn data_plane_url(mut self, url: impl Into<String>) -> Self {
        self.data_plane_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn write_key(mut self, key: impl Into<String>) -> Self {
        self.write_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn gzip_enabled(mut self, enabled: bool) -> Self {
        self.gzip_enabled = enabled;
        self
    }

    #[must_use]
    pub fn platform_type(mut self, platform_type: PlatformType) -> Self {
        self.platform_type = Some(platform_type);
        self
    }

    #[must_use]
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = Some(size);
        self
    }

    #[must_use]
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    #[must_use]
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        Ok(Config {
            data_plane_url: self.data_plane_url.ok_or(ConfigError::MissingDataPlaneUrl)?,
            write_key: self.write_key.ok_or(ConfigError::MissingWriteKey)?,
            gzip_enabled: self.gzip_enabled,
            platform_type: self.platform_type.unwrap_or(PlatformType::Server),
            max_payload_size: self.max_payload_size.unwrap_or(32 * 1024),
            max_batch_size: self.max_batch_size.unwrap_or(500 * 1024),
            http_timeout: self.http_timeout.unwrap_or(Duration::from_secs(10)),
            base_dir: self.base_dir.unwrap_or_else(|| PathBuf::from(".rsa-events")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_data_plane_url_and_write_key() {
        let err = ConfigBuilder::new().build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingDataPlaneUrl));

        let err = ConfigBuilder::new()
            .data_plane_url("https://example.com")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingWriteKey));
    }

    #[test]
    fn build_applies_defaults() {
        let config = ConfigBuilder::new()
            .data_plane_url("https://example.com")
            .write_key("wk_123")
            .build()
            .unwrap();
        assert_eq!(config.platform_type, PlatformType::Server);
        assert_eq!(config.max_payload_size, 32 * 1024);
        assert_eq!(config.max_batch_size, 500 * 1024);
    }
}
