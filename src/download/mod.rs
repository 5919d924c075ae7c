//! Checksummed, retrying file fetches.
//!
//! Downloads stream to a sibling `.tmp` file and are renamed into place only
//! after the size and checksum checks pass, so a crash or a failed attempt
//! never leaves a plausible-looking partial file behind.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::api::Attack;
use crate::settings::Settings;
use crate::state::{DataPaths, restrict_file_permissions};

/// Connect timeout for file downloads.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Read timeout for file downloads; hash lists and word lists can be large.
const READ_TIMEOUT_SECS: u64 = 600;

/// Errors produced by the downloader.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The URL could not be parsed.
    #[error("invalid download URL '{url}'")]
    InvalidUrl {
        /// The offending URL.
        url: String,
    },

    /// The request failed before a response arrived.
    #[error("network error downloading {url}: {source}")]
    Network {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// Local filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The downloaded file does not match the expected checksum.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Destination path.
        path: PathBuf,
        /// Coordinator-supplied digest.
        expected: String,
        /// Digest of the downloaded bytes.
        actual: String,
    },

    /// The server returned a success status with an empty body.
    #[error("zero-byte download from {url}")]
    Empty {
        /// Requested URL.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build download client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl DownloadError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Bearer credentials attached only to coordinator-hosted URLs, so the
/// token never reaches third-party file hosts.
#[derive(Debug, Clone)]
struct CoordinatorAuth {
    base_url: String,
    token: String,
}

/// Checksummed, retrying file fetcher.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    coordinator: Option<CoordinatorAuth>,
    max_retries: u32,
    retry_base_delay: Duration,
    always_trust_files: bool,
}

impl Downloader {
    /// Builds a downloader from the resolved settings.
    ///
    /// TLS verification stays on unless `insecure_downloads` is set.
    /// Downloads from under the coordinator base URL (hash lists, zap
    /// streams served by the API) carry the bearer token; everything else
    /// (presigned resource URLs) goes out bare.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::ClientBuild`] when the TLS backend cannot
    /// initialize.
    pub fn new(settings: &Settings) -> Result<Self, DownloadError> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(READ_TIMEOUT_SECS));
        if settings.insecure_downloads {
            warn!("TLS verification disabled for downloads");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(DownloadError::ClientBuild)?;
        let coordinator = (!settings.api_token.is_empty()).then(|| CoordinatorAuth {
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            token: settings.api_token.clone(),
        });
        Ok(Self {
            client,
            coordinator,
            max_retries: settings.download_max_retries.max(1),
            retry_base_delay: settings.download_retry_delay,
            always_trust_files: settings.always_trust_files,
        })
    }

    /// Downloader with explicit retry tuning, for callers outside the
    /// settings path.
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_base_delay = base_delay;
        self
    }

    /// Fetches `url` into `dest`, verifying `checksum` (hex SHA-256) when
    /// provided.
    ///
    /// Existing destinations are kept when the checksum matches, or when no
    /// checksum is available and `always_trust_files` is set. A stale file
    /// is deleted and re-fetched. Transient failures retry up to the
    /// configured attempt budget with exponential delays; the final
    /// attempt's error is returned on exhaustion.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on exhausted retries, an empty body, a
    /// checksum mismatch, or filesystem failure.
    #[instrument(skip(self, checksum), fields(dest = %dest.display()))]
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        checksum: Option<&str>,
    ) -> Result<(), DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::InvalidUrl {
            url: url.to_string(),
        })?;

        if dest.exists() {
            match checksum {
                Some(expected) => {
                    let actual = file_sha256_hex(dest).await?;
                    if actual.eq_ignore_ascii_case(expected) {
                        debug!("existing file matches checksum, skipping download");
                        return Ok(());
                    }
                    warn!(
                        expected,
                        actual, "existing file fails checksum, re-downloading"
                    );
                    tokio::fs::remove_file(dest)
                        .await
                        .map_err(|e| DownloadError::io(dest, e))?;
                }
                None if self.always_trust_files => {
                    debug!("existing file trusted without checksum, skipping download");
                    return Ok(());
                }
                None => {
                    debug!("existing file has no checksum to trust, re-downloading");
                }
            }
        }

        let mut last_error = None;
        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                // Delay before the n-th retry (1-indexed) is base * 2^(n-1).
                let delay = self.retry_base_delay * 2u32.saturating_pow(attempt - 2);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying download");
                tokio::time::sleep(delay).await;
            }
            match self.fetch_once(url, dest).await {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(err @ (DownloadError::Network { .. } | DownloadError::HttpStatus { .. })) => {
                    warn!(attempt, max = self.max_retries, error = %err, "download attempt failed");
                    last_error = Some(err);
                }
                // Local failures are not improved by retrying.
                Err(err) => return Err(err),
            }
        }
        if let Some(err) = last_error {
            return Err(err);
        }

        if let Some(expected) = checksum {
            let actual = file_sha256_hex(dest).await?;
            if !actual.eq_ignore_ascii_case(expected) {
                tokio::fs::remove_file(dest)
                    .await
                    .map_err(|e| DownloadError::io(dest, e))?;
                return Err(DownloadError::ChecksumMismatch {
                    path: dest.to_path_buf(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        info!(url, "download complete");
        Ok(())
    }

    /// Downloads an attack's hash list into `<hashlists>/<attack_id>.hsh`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] as for [`Downloader::download_file`].
    pub async fn download_hash_list(
        &self,
        attack: &Attack,
        paths: &DataPaths,
    ) -> Result<PathBuf, DownloadError> {
        let dest = paths.hash_list_file(attack.id);
        self.download_file(
            &attack.hash_list_url,
            &dest,
            Some(&attack.hash_list_checksum),
        )
        .await?;
        Ok(dest)
    }

    /// Downloads every resource file attached to an attack into the shared
    /// files directory.
    ///
    /// # Errors
    ///
    /// Returns the first [`DownloadError`] encountered.
    pub async fn download_attack_resources(
        &self,
        attack: &Attack,
        paths: &DataPaths,
    ) -> Result<(), DownloadError> {
        for resource in attack.resource_files() {
            let dest = paths.resource_file(&resource.file_name);
            self.download_file(&resource.download_url, &dest, Some(&resource.checksum))
                .await?;
        }
        Ok(())
    }

    /// One GET attempt: stream to `<dest>.tmp`, reject empty bodies, rename
    /// into place. The `.tmp` file is removed before any error propagates.
    async fn fetch_once(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        let mut request = self.client.get(url);
        if let Some(auth) = &self.coordinator {
            if url.starts_with(&auth.base_url) {
                request = request.bearer_auth(&auth.token);
            }
        }
        let response = request
            .send()
            .await
            .map_err(|source| DownloadError::Network {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let tmp_path = sibling_tmp_path(dest);
        let result = write_body_to_tmp(response, url, &tmp_path).await;
        match result {
            Ok(bytes) if bytes == 0 => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                Err(DownloadError::Empty {
                    url: url.to_string(),
                })
            }
            Ok(bytes) => {
                restrict_file_permissions(&tmp_path).map_err(|e| DownloadError::io(&tmp_path, e))?;
                tokio::fs::rename(&tmp_path, dest)
                    .await
                    .map_err(|e| DownloadError::io(dest, e))?;
                debug!(bytes, "download attempt succeeded");
                Ok(())
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                Err(err)
            }
        }
    }
}

/// Streams a response body to the temp path, returning the byte count.
async fn write_body_to_tmp(
    response: reqwest::Response,
    url: &str,
    tmp_path: &Path,
) -> Result<u64, DownloadError> {
    let file = File::create(tmp_path)
        .await
        .map_err(|e| DownloadError::io(tmp_path, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| DownloadError::Network {
            url: url.to_string(),
            source,
        })?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(tmp_path, e))?;
        bytes_written += chunk.len() as u64;
    }
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(tmp_path, e))?;
    Ok(bytes_written)
}

/// Sibling `.tmp` path used for atomic writes.
fn sibling_tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map_or_else(
        || std::ffi::OsString::from("download"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".tmp");
    dest.with_file_name(name)
}

/// Hex SHA-256 digest of a file's contents.
async fn file_sha256_hex(path: &Path) -> Result<String, DownloadError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
