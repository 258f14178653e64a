// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Lock records: the installed tool set last recorded for a context.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::declaration::write_atomic;
use crate::resolve::{MergedDeclarations, expand_path};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./lock_test.rs"]
mod lock_test;

/// Lock file API version.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum LockApiVersion {
    #[default]
    #[serde(rename = "toolenv/v0/lock")]
    V0,
}

/// Lock file structure capturing sources and installed tools.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LockFile {
    pub api: LockApiVersion,
    pub generated: GenerationMetadata,
    #[serde(default)]
    pub sources: Vec<SourceFile>,
    #[serde(default)]
    pub tools: BTreeMap<String, LockedTool>,
}

/// Metadata about when and where the lock was generated.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GenerationMetadata {
    pub timestamp: DateTime<Utc>,
    pub toolenv_version: String,
    pub hostname: String,
}

impl GenerationMetadata {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            toolenv_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

/// Declaration file that fed the merge.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub sha256: String,
}

/// A tool recorded as installed for the context.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LockedTool {
    pub version: String,
    pub path: PathBuf,
    pub installed_at: DateTime<Utc>,
}

impl Default for LockFile {
    fn default() -> Self {
        Self {
            api: LockApiVersion::V0,
            generated: GenerationMetadata::now(),
            sources: Vec::new(),
            tools: BTreeMap::new(),
        }
    }
}

impl LockFile {
    /// Load a lock record; `None` when the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let yaml = match std::fs::read_to_string(path) {
            Ok(yaml) => yaml,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::ReadFailed {
                    path: path.to_path_buf(),
                    error: e,
                });
            }
        };
        serde_yaml::from_str(&yaml)
            .map(Some)
            .map_err(|e| Error::yaml(path, &e))
    }

    /// Write atomically to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| Error::InvalidConfig(format!("Failed to serialize lock: {e}")))?;
        write_atomic(path.as_ref(), yaml.as_bytes())
    }
}

/// Hash the declaration files that contributed to a merge.
pub fn hash_sources(paths: &[PathBuf]) -> Result<Vec<SourceFile>> {
    paths
        .iter()
        .map(|path| {
            let content = std::fs::read(path).map_err(|e| Error::ReadFailed {
                path: path.clone(),
                error: e,
            })?;
            Ok(SourceFile {
                path: path.clone(),
                sha256: format!("{:x}", Sha256::digest(&content)),
            })
        })
        .collect()
}

/// Generate a lock record for `merged` with the given installed tools.
pub fn generate_lock(
    merged: &MergedDeclarations,
    tools: BTreeMap<String, LockedTool>,
) -> Result<LockFile> {
    Ok(LockFile {
        api: LockApiVersion::V0,
        generated: GenerationMetadata::now(),
        sources: hash_sources(&merged.source_files)?,
        tools,
    })
}

/// Verify a lock record against the current declarations.
pub fn verify_lock(lock: &LockFile, merged: &MergedDeclarations) -> Result<Vec<LockChange>> {
    let mut changes = Vec::new();

    // Check source file hashes
    let current = hash_sources(&merged.source_files)?;
    for source in &lock.sources {
        match current.iter().find(|c| c.path == source.path) {
            None => changes.push(LockChange {
                kind: LockChangeKind::SourceFileRemoved,
                reference: source.path.display().to_string(),
                expected: Some(source.sha256.clone()),
                actual: None,
            }),
            Some(actual) if actual.sha256 != source.sha256 => changes.push(LockChange {
                kind: LockChangeKind::SourceFileChanged,
                reference: source.path.display().to_string(),
                expected: Some(source.sha256.clone()),
                actual: Some(actual.sha256.clone()),
            }),
            Some(_) => {}
        }
    }
    for extra in current
        .iter()
        .filter(|c| !lock.sources.iter().any(|s| s.path == c.path))
    {
        changes.push(LockChange {
            kind: LockChangeKind::SourceFileAdded,
            reference: extra.path.display().to_string(),
            expected: None,
            actual: Some(extra.sha256.clone()),
        });
    }

    // Check tools
    for (tool, locked) in &lock.tools {
        let Some(declared) = merged.get(tool) else {
            changes.push(LockChange {
                kind: LockChangeKind::ToolRemoved,
                reference: tool.clone(),
                expected: Some(locked.version.clone()),
                actual: None,
            });
            continue;
        };
        let spec = declared.spec();
        if spec.version != locked.version {
            changes.push(LockChange {
                kind: LockChangeKind::ToolVersionChanged,
                reference: tool.clone(),
                expected: Some(locked.version.clone()),
                actual: Some(spec.version.clone()),
            });
            continue;
        }
        let declared_path = spec
            .path
            .as_deref()
            .and_then(|raw| expand_path(raw, merged.declaring_root(declared)));
        if let Some(path) = declared_path.filter(|p| *p != locked.path) {
            changes.push(LockChange {
                kind: LockChangeKind::ToolPathChanged,
                reference: tool.clone(),
                expected: Some(locked.path.display().to_string()),
                actual: Some(path.display().to_string()),
            });
        } else if !locked.path.exists() {
            changes.push(LockChange {
                kind: LockChangeKind::ToolMissing,
                reference: tool.clone(),
                expected: Some(locked.path.display().to_string()),
                actual: None,
            });
        }
    }

    // Tools declared but never recorded are reported as added.
    for (tool, declared) in merged.iter() {
        if !lock.tools.contains_key(tool) {
            changes.push(LockChange {
                kind: LockChangeKind::ToolAdded,
                reference: tool.clone(),
                expected: None,
                actual: Some(declared.spec().version.clone()),
            });
        }
    }

    Ok(changes)
}

/// A single detected change between lock and current declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockChange {
    pub kind: LockChangeKind,
    pub reference: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Types of lock mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockChangeKind {
    ToolAdded,
    ToolRemoved,
    ToolVersionChanged,
    ToolPathChanged,
    /// Recorded installation no longer exists on disk
    ToolMissing,
    SourceFileAdded,
    SourceFileChanged,
    SourceFileRemoved,
}
