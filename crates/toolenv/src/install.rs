// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Installing one `(tool, version)` into the cache.
//!
//! An install proceeds `Requested -> Downloading -> Extracting -> Verifying
//! -> Registered`, short-circuiting to a cache hit when the entry already
//! exists. Extraction and verification happen in a hidden staging directory
//! and the result is published with a single rename, which is the only
//! point where concurrent installers can race. The loser of that race finds
//! the entry in place and reports it as cached.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};

use crate::archive::{self, ArchiveError};
use crate::audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink, TracingAudit};
use crate::cache::{EntryMetadata, STAGING_PREFIX, ToolCache};
use crate::config::Config;
use crate::fetch::{FetchError, Fetcher, HttpFetcher};
use crate::platform::Platform;
use crate::recipe::{RemoteSource, SourceResolver};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./install_test.rs"]
mod install_test;

/// Upper bound for a single backoff delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// How an install attempt ended.
#[derive(Debug)]
pub enum InstallOutcome {
    /// The entry already existed, or a concurrent installer published it first.
    Cached(PathBuf),
    Installed(PathBuf),
    Failed(Error),
}

/// Record of one installer run, returned to the caller and not retained.
#[derive(Debug)]
pub struct InstallAttempt {
    pub tool: String,
    pub version: String,
    pub platform: Platform,
    pub outcome: InstallOutcome,
    /// Download attempts beyond the first.
    pub retries: u32,
}

impl InstallAttempt {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, InstallOutcome::Failed(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.outcome {
            InstallOutcome::Cached(path) | InstallOutcome::Installed(path) => Some(path),
            InstallOutcome::Failed(_) => None,
        }
    }

    pub fn into_result(self) -> Result<PathBuf> {
        match self.outcome {
            InstallOutcome::Cached(path) | InstallOutcome::Installed(path) => Ok(path),
            InstallOutcome::Failed(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub max_retries: usize,
    pub retry_base_delay: Duration,
    pub download_timeout: Duration,
    pub extract_timeout: Duration,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            max_retries: 4,
            retry_base_delay: Duration::from_millis(250),
            download_timeout: Duration::from_secs(300),
            extract_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&Config> for InstallOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            download_timeout: config.download_timeout(),
            extract_timeout: config.extract_timeout(),
        }
    }
}

enum Published {
    Cached(PathBuf),
    Installed(PathBuf),
}

/// Populates the cache from remote sources.
#[derive(Clone)]
pub struct Installer {
    cache: ToolCache,
    resolver: Arc<dyn SourceResolver>,
    fetcher: Arc<dyn Fetcher>,
    audit: Arc<dyn AuditSink>,
    platform: Platform,
    options: InstallOptions,
}

impl Installer {
    pub fn new(
        cache: ToolCache,
        resolver: Arc<dyn SourceResolver>,
        fetcher: Arc<dyn Fetcher>,
        platform: Platform,
    ) -> Self {
        Self {
            cache,
            resolver,
            fetcher,
            audit: Arc::new(TracingAudit),
            platform,
            options: InstallOptions::default(),
        }
    }

    /// Installer for the current host using the configured recipes over HTTP.
    pub fn from_config(config: &Config) -> Result<Self> {
        let platform = Platform::current().ok_or_else(|| {
            Error::InvalidConfig(format!(
                "unsupported host platform {}-{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ))
        })?;
        Ok(Self::new(
            config.cache(),
            Arc::new(config.catalog()),
            Arc::new(HttpFetcher::new()?),
            platform,
        )
        .with_options(InstallOptions::from(config)))
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn cache(&self) -> &ToolCache {
        &self.cache
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// Make `(tool, version)` available in the cache on behalf of `context`.
    pub async fn install(&self, tool: &str, version: &str, context: &Path) -> InstallAttempt {
        self.install_as(tool, version, context, AuditAction::Install)
            .await
    }

    /// Like [`Installer::install`], audited as `action`.
    pub async fn install_as(
        &self,
        tool: &str,
        version: &str,
        context: &Path,
        action: AuditAction,
    ) -> InstallAttempt {
        let attempts = AtomicU32::new(0);
        let outcome = match self.run(tool, version, context, &attempts).await {
            Ok(Published::Cached(path)) => InstallOutcome::Cached(path),
            Ok(Published::Installed(path)) => InstallOutcome::Installed(path),
            Err(err) => InstallOutcome::Failed(err),
        };

        self.audit.record(AuditEvent {
            tool: tool.to_string(),
            version: version.to_string(),
            action,
            context_path: Some(context.to_path_buf()),
            outcome: match &outcome {
                InstallOutcome::Cached(_) => AuditOutcome::Cached,
                InstallOutcome::Installed(_) => AuditOutcome::Succeeded,
                InstallOutcome::Failed(err) => AuditOutcome::Failed(err.to_string()),
            },
        });

        InstallAttempt {
            tool: tool.to_string(),
            version: version.to_string(),
            platform: self.platform,
            outcome,
            retries: attempts.load(Ordering::SeqCst).saturating_sub(1),
        }
    }

    async fn run(
        &self,
        tool: &str,
        version: &str,
        context: &Path,
        attempts: &AtomicU32,
    ) -> Result<Published> {
        if let Some(path) = self.cache.lookup(tool, version) {
            tracing::debug!(%tool, %version, "cache hit");
            self.cache.register(tool, version, &path, context)?;
            return Ok(Published::Cached(path));
        }

        let source = self.resolver.source_for(tool, version, self.platform)?;
        self.cache.ensure_layout()?;
        // Known before anything is published, so a concurrent prune keeps it
        self.cache.remember_context(context)?;

        tracing::debug!(%tool, %version, url = %source.url, "downloading");
        let archive = self.download(&source, attempts).await?;

        tracing::debug!(%tool, %version, "extracting");
        let staging = self.extract(&source, &archive).await?;

        tracing::debug!(%tool, %version, "verifying");
        verify(&source, staging.path())?;
        EntryMetadata {
            tool: tool.to_string(),
            version: version.to_string(),
            platform: Some(self.platform),
            source: Some(source.url.clone()),
            installed_at: Utc::now(),
        }
        .write(staging.path())?;

        let published = self.publish(&source, staging)?;
        let path = match &published {
            Published::Cached(path) | Published::Installed(path) => path,
        };
        verify(&source, path)?;
        self.cache.register(tool, version, path, context)?;

        if let Published::Installed(path) = &published {
            tracing::info!(%tool, %version, ?path, "installed");
        }
        Ok(published)
    }

    /// Fetch the archive into the download cache, reusing an earlier download.
    async fn download(&self, source: &RemoteSource, attempts: &AtomicU32) -> Result<PathBuf> {
        let downloads = self.cache.downloads_dir();
        let dest = downloads.join(source.download_name());
        if dest.is_file() {
            tracing::debug!(path = ?dest, "reusing downloaded archive");
            return Ok(dest);
        }

        let base_ms = u64::try_from(self.options.retry_base_delay.as_millis()).unwrap_or(u64::MAX);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(base_ms.max(1) / 2)
            .max_delay(MAX_RETRY_DELAY)
            .map(jitter)
            .take(self.options.max_retries);

        let timeout = self.options.download_timeout;
        let fetcher = &self.fetcher;
        let url = source.url.as_str();
        let target = dest.as_path();
        let action = || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                let tmp = tempfile::NamedTempFile::new_in(downloads)
                    .map_err(|e| FetchError::Permanent(format!("Cannot stage download: {e}")))?;
                match tokio::time::timeout(timeout, fetcher.fetch(url, tmp.path())).await {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(FetchError::Transient(format!(
                            "GET {url} timed out after {}s",
                            timeout.as_secs()
                        )));
                    }
                }
                tmp.persist(target)
                    .map_err(|e| FetchError::Permanent(format!("Cannot store download: {}", e.error)))?;
                Ok(())
            }
        };
        let retryable = |err: &FetchError| {
            if err.is_transient() {
                tracing::warn!(tool = %source.tool, version = %source.version, "download failed: {err}");
            }
            err.is_transient()
        };

        RetryIf::start(strategy, action, retryable)
            .await
            .map_err(|err| Error::NetworkError {
                tool: source.tool.clone(),
                version: source.version.clone(),
                attempts: attempts.load(Ordering::SeqCst),
                message: err.to_string(),
            })?;
        Ok(dest)
    }

    /// Unpack into a fresh hidden staging directory under the cache root.
    async fn extract(&self, source: &RemoteSource, archive_path: &Path) -> Result<TempDir> {
        let root = self.cache.root();
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(root)
            .map_err(|e| Error::write_failed(root, e))?;

        let task = tokio::task::spawn_blocking({
            let archive_path = archive_path.to_path_buf();
            let dest = staging.path().to_path_buf();
            let kind = source.archive;
            move || archive::unpack(&archive_path, kind, &dest)
        });

        let result = match tokio::time::timeout(self.options.extract_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => return Err(corrupt(source, format!("extraction aborted: {join}"))),
            Err(_) => {
                return Err(corrupt(
                    source,
                    format!(
                        "extraction timed out after {}s",
                        self.options.extract_timeout.as_secs()
                    ),
                ));
            }
        };

        match result {
            Ok(()) => Ok(staging),
            Err(ArchiveError::Corrupt(reason)) => {
                tracing::warn!(path = ?archive_path, "discarding undecodable archive");
                if let Err(err) = std::fs::remove_file(archive_path) {
                    tracing::debug!(?err, "failed to remove archive");
                }
                Err(corrupt(source, reason))
            }
            Err(ArchiveError::Io(err)) => Err(Error::write_failed(staging.path(), err)),
        }
    }

    /// Move the verified staging directory into place.
    fn publish(&self, source: &RemoteSource, staging: TempDir) -> Result<Published> {
        let dest = self.cache.entry_path(&source.tool, &source.version);
        if let Some(tool_dir) = dest.parent() {
            std::fs::create_dir_all(tool_dir).map_err(|e| Error::write_failed(tool_dir, e))?;
        }

        // Dropping `staging` afterwards removes it unless it was moved
        match std::fs::rename(staging.path(), &dest) {
            Ok(()) => Ok(Published::Installed(dest)),
            Err(err) => match self.cache.lookup(&source.tool, &source.version) {
                Some(existing) => {
                    tracing::debug!(tool = %source.tool, version = %source.version, "lost install race");
                    Ok(Published::Cached(existing))
                }
                None => Err(Error::write_failed(&dest, err)),
            },
        }
    }
}

fn verify(source: &RemoteSource, root: &Path) -> Result<()> {
    if root.join(&source.entry).exists() {
        Ok(())
    } else {
        Err(corrupt(
            source,
            format!("entry executable {} is missing", source.entry.display()),
        ))
    }
}

fn corrupt(source: &RemoteSource, reason: impl Into<String>) -> Error {
    Error::CorruptInstall {
        tool: source.tool.clone(),
        version: source.version.clone(),
        reason: reason.into(),
    }
}
