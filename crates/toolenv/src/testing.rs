// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Fixtures shared by the unit tests.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::audit::{AuditEvent, AuditSink};
use crate::fetch::{FetchError, Fetcher};
use crate::recipe::{ArchiveKind, RecipeCatalog, ToolRecipe};

/// Build a gzipped tarball holding `files`, all marked executable.
pub(crate) fn tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub(crate) fn zip(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
    for (path, contents) in files {
        writer.start_file(*path, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// The tarball layout most tests install: `<tool>-<version>/bin/<tool>`.
pub(crate) fn tool_archive(tool: &str, version: &str) -> Vec<u8> {
    let entry = format!("{tool}-{version}/bin/{tool}");
    tar_gz(&[(entry.as_str(), "#!/bin/sh\n")])
}

/// Catalog of platform-independent recipes served from `mock://`.
pub(crate) fn mock_catalog(tools: &[&str]) -> RecipeCatalog {
    let mut catalog = RecipeCatalog::empty();
    for tool in tools {
        catalog.insert(ToolRecipe {
            name: tool.to_string(),
            url: format!("mock://{tool}/{{version}}.tar.gz"),
            entry: format!("bin/{tool}"),
            archive: Some(ArchiveKind::TarGz),
            targets: Vec::new(),
        });
    }
    catalog
}

pub(crate) fn mock_url(tool: &str, version: &str) -> String {
    format!("mock://{tool}/{version}.tar.gz")
}

/// In-memory fetcher serving prepared archives by URL.
#[derive(Default)]
pub(crate) struct MockFetcher {
    archives: HashMap<String, Vec<u8>>,
    transient_failures: AtomicU32,
    delay: Duration,
    calls: AtomicU32,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve the standard archive for `(tool, version)`.
    pub fn with_tool(self, tool: &str, version: &str) -> Self {
        self.with_archive(&mock_url(tool, version), tool_archive(tool, version))
    }

    pub fn with_archive(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.archives.insert(url.to_string(), bytes);
        self
    }

    /// Fail the next `count` requests with a transient error.
    pub fn failing(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Hold every request for `delay` before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failed = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(FetchError::Transient(format!("connection reset: {url}")));
        }
        let Some(bytes) = self.archives.get(url) else {
            return Err(FetchError::Permanent(format!("GET {url} returned HTTP 404")));
        };
        tokio::fs::write(dest, bytes)
            .await
            .map_err(|e| FetchError::Permanent(e.to_string()))
    }
}

/// Audit sink that keeps every event for inspection.
#[derive(Default)]
pub(crate) struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAudit {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAudit {
    fn record(&self, event: AuditEvent) {
        self.events.lock().unwrap().push(event);
    }
}
