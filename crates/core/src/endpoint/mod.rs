//! Remote archive endpoint abstraction.
//!
//! This module provides an `ArchiveEndpoint` trait over the remote archives
//! bundles are pulled from and products delivered to, with one implementation
//! per wire protocol (FTP/FTPS and HTTP/HTTPS). Listing-page decoding and
//! upload handling are explicit strategies resolved from configuration keys
//! at construction time; an unknown key is a configuration error, never a
//! silent fallback.

mod ftp;
mod http;
mod listing;
mod upload;

pub use ftp::FtpEndpoint;
pub use http::HttpEndpoint;
pub use listing::ListingParserKind;
pub use upload::UploadStrategy;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{ConfigError, EndpointConfig};

/// Sentinel timestamp for entries whose listing time could not be decoded.
/// Predates the observing technique, so any real bundle wins a comparison.
pub const T0_TIMESTAMP: i64 = 157_766_400; // 1975-01-01T00:00:00Z

/// Connection retry policy: fail fast, retry a few times with fixed spacing.
pub(crate) const CONNECT_ATTEMPTS: u32 = 3;
pub(crate) const CONNECT_BACKOFF: Duration = Duration::from_secs(5);
/// Listing-based file probes re-check a few times before giving up.
pub(crate) const INFO_RETRIES: u32 = 3;
pub(crate) const INFO_BACKOFF: Duration = Duration::from_secs(1);

/// Error type for endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("could not connect to {url} [{reason}]")]
    Connect { url: String, reason: String },

    #[error("{0} not connected")]
    NotConnected(String),

    #[error("listing {path} failed [{reason}]")]
    Listing { path: String, reason: String },

    #[error("download {path} failed [{reason}]")]
    Download { path: String, reason: String },

    #[error("upload to {code} failed [{reason}]")]
    Upload { code: String, reason: String },

    #[error("invalid url {url} [{reason}]")]
    InvalidUrl { url: String, reason: String },

    #[error("blocking task failed: {0}")]
    Task(String),
}

/// One file entry in a remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    /// Unix timestamp in UTC, `T0_TIMESTAMP` when undecodable.
    pub timestamp: i64,
}

/// A decoded directory listing.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub folders: Vec<String>,
    pub files: Vec<RemoteFile>,
}

/// One file found while walking a remote tree.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    /// Full remote path.
    pub path: String,
    pub timestamp: i64,
}

/// Polymorphic client over a remote archive.
///
/// Failures that do not abort an operation accumulate as warnings the caller
/// drains, mirroring how operators review endpoint trouble after a run.
#[async_trait]
pub trait ArchiveEndpoint: Send + Sync {
    /// Endpoint code from configuration.
    fn code(&self) -> &str;

    /// Establish a session, retrying per policy before failing.
    async fn connect(&self) -> Result<(), EndpointError>;

    fn is_connected(&self) -> bool;

    async fn close(&self);

    /// List one directory: subfolder names plus (file, timestamp) pairs.
    async fn list_dir(&self, path: &str) -> Result<Listing, EndpointError>;

    /// Timestamp of a remote file, `None` when it does not exist.
    async fn file_info(&self, path: &str) -> Result<Option<i64>, EndpointError>;

    /// Download a remote file to `local`, returning the MD5 content digest.
    async fn download(&self, remote: &str, local: &Path) -> Result<String, EndpointError>;

    /// Upload files, returning the names the endpoint confirmed. Endpoints
    /// without a confirmation signal report optimistically.
    async fn upload(&self, files: &[PathBuf]) -> Result<Vec<String>, EndpointError>;

    /// Drain accumulated warnings.
    fn drain_warnings(&self) -> Vec<String>;
}

/// Join two remote path segments with a single slash.
pub fn join_remote(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Walk a remote tree breadth-first, collecting every file with its full
/// path and timestamp, skipping rejected names.
pub async fn walk(
    endpoint: &dyn ArchiveEndpoint,
    top: &str,
    reject: &[String],
) -> Result<Vec<RemoteEntry>, EndpointError> {
    let mut stack = vec![top.trim_end_matches('/').to_string()];
    let mut entries = Vec::new();
    while let Some(dir) = stack.pop() {
        let listing = endpoint.list_dir(&dir).await?;
        for file in listing.files {
            if reject.iter().any(|r| r == &file.name) {
                continue;
            }
            entries.push(RemoteEntry {
                path: join_remote(&dir, &file.name),
                name: file.name,
                timestamp: file.timestamp,
            });
        }
        for sub in listing.folders {
            stack.push(join_remote(&dir, &sub));
        }
    }
    Ok(entries)
}

/// Build an endpoint from its configuration, resolving parser and upload
/// strategy keys to their variants.
pub fn build_endpoint(
    code: &str,
    config: &EndpointConfig,
) -> Result<Arc<dyn ArchiveEndpoint>, ConfigError> {
    let upload = match &config.upload {
        Some(key) => {
            UploadStrategy::from_key(key).ok_or_else(|| ConfigError::UnknownUpload {
                code: code.to_string(),
                key: key.clone(),
            })?
        }
        None => UploadStrategy::None,
    };

    if config.protocol.is_web() {
        let parser = match &config.parser {
            Some(key) => {
                ListingParserKind::from_key(key).ok_or_else(|| ConfigError::UnknownParser {
                    code: code.to_string(),
                    key: key.clone(),
                })?
            }
            None => ListingParserKind::Generic,
        };
        Ok(Arc::new(HttpEndpoint::new(code, config, parser, upload)?))
    } else {
        Ok(Arc::new(FtpEndpoint::new(code, config, upload)))
    }
}
