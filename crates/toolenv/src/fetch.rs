// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Transferring archives from remote sources.

use std::path::Path;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;

/// Why a transfer failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Worth retrying: connection problems, timeouts, server errors.
    #[error("{0}")]
    Transient(String),

    /// Retrying will not help: not found, forbidden, bad request.
    #[error("{0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Capability to download a URL into a local file.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Write the full body of `url` to `dest`, replacing any content.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError>;
}

/// Fetcher backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> crate::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("toolenv/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn classify_status(status: StatusCode, url: &str) -> FetchError {
    let message = format!("GET {url} returned HTTP {status}");
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        FetchError::Transient(message)
    } else {
        FetchError::Permanent(message)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        tracing::debug!(%url, "downloading");

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("GET {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(classify_status(response.status(), url));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| FetchError::Permanent(format!("Cannot write {}: {e}", dest.display())))?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Transient(format!("Reading {url} failed: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::Permanent(format!("Cannot write {}: {e}", dest.display())))?;
        }
        file.flush()
            .await
            .map_err(|e| FetchError::Permanent(format!("Cannot write {}: {e}", dest.display())))?;
        Ok(())
    }
}
