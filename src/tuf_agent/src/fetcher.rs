//! Byte fetcher: reads raw bytes from one location under a size limit.
//!
//! The fetcher knows nothing about metadata. Remote reads carry the routing
//! tag header and a per-request timeout; local reads go straight to the
//! filesystem. Both enforce the maximum length on the bytes actually read,
//! whatever a server advertises.

use crate::config::{ClientTlsConfig, HttpConfig};
use crate::error::{AgentError, FetchError, Result};
use crate::location::{Location, LOCAL_PREFIX};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::Client;
use std::path::Path;
use std::time::Duration;

/// Status reported for unreadable local files
pub const LOCAL_NOT_FOUND_STATUS: u16 = 404;

/// Fetch binding handed to the trust engine.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        location: &Location,
        max_length: u64,
        timeout: Duration,
    ) -> std::result::Result<Bytes, FetchError>;
}

/// A single fetch, constructed per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub location: Location,
    pub max_length: u64,
    pub timeout: Duration,
    pub tag: String,
}

impl FetchRequest {
    pub fn new(
        location: Location,
        max_length: u64,
        timeout: Duration,
        tag: impl Into<String>,
    ) -> std::result::Result<Self, FetchError> {
        if max_length == 0 {
            return Err(FetchError::InvalidRequest(format!(
                "max length for {} must be greater than zero",
                location
            )));
        }
        if timeout.is_zero() {
            return Err(FetchError::InvalidRequest(format!(
                "timeout for {} must be greater than zero",
                location
            )));
        }
        Ok(Self {
            location,
            max_length,
            timeout,
            tag: tag.into(),
        })
    }
}

/// Fetcher over the shared HTTP client and the local filesystem.
#[derive(Clone)]
pub struct ByteFetcher {
    client: Client,
    tag: String,
    tag_header: HeaderName,
}

impl ByteFetcher {
    pub fn new(client: Client, tag: impl Into<String>, tag_header: &str) -> Result<Self> {
        let tag_header = HeaderName::from_bytes(tag_header.as_bytes())
            .map_err(|e| AgentError::Config(format!("Invalid tag header {:?}: {}", tag_header, e)))?;
        Ok(Self {
            client,
            tag: tag.into(),
            tag_header,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub async fn execute(&self, request: &FetchRequest) -> std::result::Result<Bytes, FetchError> {
        match &request.location {
            Location::Local(path) => read_local_file(path, request.max_length).await,
            Location::Remote(url) => self.read_remote_file(url, request).await,
        }
    }

    async fn read_remote_file(
        &self,
        url: &str,
        request: &FetchRequest,
    ) -> std::result::Result<Bytes, FetchError> {
        tracing::debug!(url = %url, tag = %request.tag, "Read remote file");

        let tag = HeaderValue::from_str(&request.tag).map_err(|e| {
            FetchError::InvalidRequest(format!("tag {:?} is not a valid header value: {}", request.tag, e))
        })?;

        let mut response = self
            .client
            .get(url)
            .header(self.tag_header.clone(), tag)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = %status, "Remote fetch returned non-success status");
            return Err(FetchError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        // The advertised length is checked before any body byte is read
        if let Some(header) = response.headers().get(CONTENT_LENGTH) {
            let value = header.to_str().unwrap_or_default();
            let length: u64 = value.trim().parse().map_err(|_| FetchError::InvalidContentLength {
                url: url.to_string(),
                value: value.to_string(),
            })?;
            if length > request.max_length {
                return Err(FetchError::LengthMismatch {
                    url: url.to_string(),
                    length,
                    max_length: request.max_length,
                });
            }
        }

        // The header may be absent or wrong; enforce the limit on actual bytes
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })? {
            let length = (body.len() + chunk.len()) as u64;
            if length > request.max_length {
                return Err(FetchError::LengthMismatch {
                    url: url.to_string(),
                    length,
                    max_length: request.max_length,
                });
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(url = %url, size = body.len(), "Remote file fetched");
        Ok(body.freeze())
    }
}

#[async_trait]
impl Fetcher for ByteFetcher {
    async fn fetch(
        &self,
        location: &Location,
        max_length: u64,
        timeout: Duration,
    ) -> std::result::Result<Bytes, FetchError> {
        let request = FetchRequest::new(location.clone(), max_length, timeout, self.tag.clone())?;
        self.execute(&request).await
    }
}

async fn read_local_file(path: &Path, max_length: u64) -> std::result::Result<Bytes, FetchError> {
    tracing::debug!(path = %path.display(), "Read local file");

    let not_found = || FetchError::Http {
        status: LOCAL_NOT_FOUND_STATUS,
        url: format!("{}{}", LOCAL_PREFIX, path.display()),
    };
    let too_long = |length: u64| FetchError::LengthMismatch {
        url: format!("{}{}", LOCAL_PREFIX, path.display()),
        length,
        max_length,
    };

    let metadata = tokio::fs::metadata(path).await.map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }
    if metadata.len() > max_length {
        return Err(too_long(metadata.len()));
    }

    let data = tokio::fs::read(path).await.map_err(|_| not_found())?;
    // File may have grown between the metadata check and the read
    if data.len() as u64 > max_length {
        return Err(too_long(data.len() as u64));
    }
    Ok(Bytes::from(data))
}

/// Build the process-wide HTTP client shared by every fetcher.
pub fn build_http_client(config: &HttpConfig) -> Result<Client> {
    let mut builder = Client::builder()
        // Connection pool configuration
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(tls) = &config.tls {
        builder = configure_tls(builder, tls)?;
    }

    builder.build().map_err(AgentError::Http)
}

fn configure_tls(
    mut builder: reqwest::ClientBuilder,
    tls: &ClientTlsConfig,
) -> Result<reqwest::ClientBuilder> {
    if let Some(ca_path) = &tls.ca_bundle_path {
        let pem = std::fs::read(ca_path).map_err(|e| {
            AgentError::Config(format!("Failed to read CA bundle {}: {}", ca_path.display(), e))
        })?;
        let cert = reqwest::Certificate::from_pem(&pem)?;
        builder = builder.add_root_certificate(cert);
    }

    if let (Some(cert_path), Some(key_path)) = (&tls.client_cert_path, &tls.client_key_path) {
        let mut pem = std::fs::read(cert_path).map_err(|e| {
            AgentError::Config(format!(
                "Failed to read client certificate {}: {}",
                cert_path.display(),
                e
            ))
        })?;
        let key = std::fs::read(key_path).map_err(|e| {
            AgentError::Config(format!("Failed to read client key {}: {}", key_path.display(), e))
        })?;
        pem.push(b'\n');
        pem.extend_from_slice(&key);
        builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
    }

    if tls.insecure_skip_verify {
        tracing::warn!("TLS certificate verification disabled for device gateway");
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder)
}
