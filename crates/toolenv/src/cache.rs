// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! The global tool cache.
//!
//! Installations live at `<root>/<tool>/<version>/`. Raw downloads live in a
//! sibling `cache/` directory and the known-context registry in a sibling
//! `contexts/` directory. The directory tree is the only index: reference
//! sets are recomputed from declaration files whenever they are needed.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink};
use crate::declaration::write_atomic;
use crate::platform::Platform;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./cache_test.rs"]
mod cache_test;

/// Metadata file written into every entry before it is published.
pub const ENTRY_METADATA_FILENAME: &str = ".toolenv-entry.yaml";

/// Hidden directories under the cache root older than this are abandoned.
const DEFAULT_LEFTOVER_AGE: Duration = Duration::from_secs(15 * 60);

/// Prefixes of the hidden work directories created under the cache root.
pub(crate) const STAGING_PREFIX: &str = ".staging-";
const TRASH_PREFIX: &str = ".trash-";

/// A `(tool, version)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolVersion {
    pub tool: String,
    pub version: String,
}

impl ToolVersion {
    pub fn new(tool: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.tool, self.version)
    }
}

/// Informational record stored inside an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub tool: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub installed_at: DateTime<Utc>,
}

impl EntryMetadata {
    pub fn write(&self, dir: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| Error::InvalidConfig(format!("Failed to serialize entry metadata: {e}")))?;
        std::fs::write(dir.join(ENTRY_METADATA_FILENAME), yaml)?;
        Ok(())
    }

    pub fn read(dir: &Path) -> Option<Self> {
        let text = std::fs::read_to_string(dir.join(ENTRY_METADATA_FILENAME)).ok()?;
        serde_yaml::from_str(&text).ok()
    }
}

/// One installed `(tool, version)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: ToolVersion,
    pub path: PathBuf,
    pub installed_at: DateTime<Utc>,
    pub platform: Option<Platform>,
    /// Contexts whose declarations currently name this entry.
    pub references: BTreeSet<PathBuf>,
}

/// Entries that a prune would remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    pub remove: BTreeSet<ToolVersion>,
    /// Registered contexts whose directory no longer exists.
    pub stale_contexts: Vec<PathBuf>,
    /// Staging and trash directories left behind by interrupted processes.
    pub leftovers: Vec<PathBuf>,
}

impl PrunePlan {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.stale_contexts.is_empty() && self.leftovers.is_empty()
    }
}

/// Handle on the shared cache tree.
#[derive(Debug, Clone)]
pub struct ToolCache {
    root: PathBuf,
    downloads: PathBuf,
    contexts: PathBuf,
    leftover_age: Duration,
}

impl ToolCache {
    /// Open the cache rooted at `root`. Nothing is created until needed.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        let base = root.parent().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
        Self {
            downloads: base.join("cache"),
            contexts: base.join("contexts"),
            root,
            leftover_age: DEFAULT_LEFTOVER_AGE,
        }
    }

    /// Treat hidden work directories older than `age` as abandoned.
    pub fn with_leftover_age(mut self, age: Duration) -> Self {
        self.leftover_age = age;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads
    }

    pub fn contexts_dir(&self) -> &Path {
        &self.contexts
    }

    /// Deterministic location of an entry, whether or not it exists.
    pub fn entry_path(&self, tool: &str, version: &str) -> PathBuf {
        self.root.join(tool).join(version)
    }

    /// The installation directory of `(tool, version)`, if present.
    pub fn lookup(&self, tool: &str, version: &str) -> Option<PathBuf> {
        let path = self.entry_path(tool, version);
        path.is_dir().then_some(path)
    }

    /// Create the cache directories, reporting unwritable locations.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [&self.root, &self.downloads, &self.contexts] {
            std::fs::create_dir_all(dir).map_err(|e| Error::write_failed(dir, e))?;
        }
        Ok(())
    }

    /// Record that `context` refers to `(tool, version)` at `path`.
    ///
    /// Registering an entry that is already known is a no-op apart from
    /// remembering the context.
    pub fn register(&self, tool: &str, version: &str, path: &Path, context: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(Error::Unresolved {
                tool: tool.to_string(),
                version: version.to_string(),
            });
        }
        self.remember_context(context)?;
        tracing::debug!(%tool, %version, ?path, ?context, "registered cache reference");
        Ok(())
    }

    /// Add `context` to the known-context registry.
    ///
    /// Each context gets its own create-only file, so concurrent callers
    /// never overwrite one another.
    pub fn remember_context(&self, context: &Path) -> Result<()> {
        let file = self.contexts.join(context_key(context));
        if file.is_file() {
            return Ok(());
        }
        write_atomic(&file, context.to_string_lossy().as_bytes())
    }

    /// Every context that has ever installed through this cache.
    pub fn known_contexts(&self) -> Result<Vec<PathBuf>> {
        let mut contexts = Vec::new();
        let dir = match std::fs::read_dir(&self.contexts) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(contexts),
            Err(e) => {
                return Err(Error::ReadFailed {
                    path: self.contexts.clone(),
                    error: e,
                });
            }
        };
        for entry in dir {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let text = std::fs::read_to_string(entry.path())?;
            contexts.push(PathBuf::from(text.trim_end()));
        }
        contexts.sort();
        Ok(contexts)
    }

    fn forget_context(&self, context: &Path) -> Result<()> {
        match std::fs::remove_file(self.contexts.join(context_key(context))) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Contexts whose declarations name `(tool, version)` right now.
    pub fn references_of(&self, tool: &str, version: &str) -> Result<BTreeSet<PathBuf>> {
        let (mut index, _) = self.reference_index()?;
        Ok(index
            .remove(&ToolVersion::new(tool, version))
            .unwrap_or_default())
    }

    /// Scan every known context's merged declarations.
    ///
    /// Returns the reference map plus the registered contexts that no longer
    /// exist. Any unreadable declaration aborts the scan.
    fn reference_index(&self) -> Result<(BTreeMap<ToolVersion, BTreeSet<PathBuf>>, Vec<PathBuf>)> {
        let mut index: BTreeMap<ToolVersion, BTreeSet<PathBuf>> = BTreeMap::new();
        let mut stale = Vec::new();

        for context_path in self.known_contexts()? {
            if !context_path.is_dir() {
                stale.push(context_path);
                continue;
            }
            let context = crate::context::resolve(&context_path)?;
            let merged = crate::resolve::merge(&context)?;
            for (tool, layered) in merged.iter() {
                let spec = layered.spec();
                if spec.path.is_some() {
                    continue;
                }
                index
                    .entry(ToolVersion::new(tool, &spec.version))
                    .or_default()
                    .insert(context_path.clone());
            }
        }

        Ok((index, stale))
    }

    /// Every entry directory currently in the cache.
    fn entry_ids(&self) -> Result<Vec<(ToolVersion, PathBuf)>> {
        let mut ids = Vec::new();
        for (tool, tool_dir) in visible_subdirs(&self.root)? {
            for (version, path) in visible_subdirs(&tool_dir)? {
                ids.push((ToolVersion::new(tool.clone(), version), path));
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// List installed entries together with their current references.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let (mut index, _) = self.reference_index()?;
        let mut entries = Vec::new();
        for (id, path) in self.entry_ids()? {
            let metadata = EntryMetadata::read(&path);
            let installed_at = metadata
                .as_ref()
                .map(|m| m.installed_at)
                .or_else(|| {
                    std::fs::metadata(&path)
                        .and_then(|m| m.modified())
                        .ok()
                        .map(DateTime::<Utc>::from)
                })
                .unwrap_or_else(Utc::now);
            entries.push(CacheEntry {
                references: index.remove(&id).unwrap_or_default(),
                platform: metadata.and_then(|m| m.platform),
                installed_at,
                id,
                path,
            });
        }
        Ok(entries)
    }

    /// Compute which entries have no remaining references.
    pub fn plan_prune(&self) -> Result<PrunePlan> {
        let (index, stale_contexts) = self.reference_index()?;
        let remove = self
            .entry_ids()?
            .into_iter()
            .map(|(id, _)| id)
            .filter(|id| index.get(id).is_none_or(BTreeSet::is_empty))
            .collect();
        Ok(PrunePlan {
            remove,
            stale_contexts,
            leftovers: self.leftovers()?,
        })
    }

    /// Remove every unreferenced entry, returning what was removed.
    pub fn prune(&self, audit: &dyn AuditSink) -> Result<BTreeSet<ToolVersion>> {
        let plan = self.plan_prune()?;
        self.apply_prune(&plan, audit)
    }

    /// Carry out a previously computed plan.
    ///
    /// References are scanned again first, and any planned entry that a
    /// context has declared since the plan was made is kept.
    pub fn apply_prune(
        &self,
        plan: &PrunePlan,
        audit: &dyn AuditSink,
    ) -> Result<BTreeSet<ToolVersion>> {
        let (index, _) = self.reference_index()?;
        let mut removed = BTreeSet::new();
        for id in &plan.remove {
            if let Some(references) = index.get(id).filter(|refs| !refs.is_empty()) {
                tracing::info!(
                    tool = %id.tool,
                    version = %id.version,
                    references = references.len(),
                    "keeping entry referenced since the prune was planned"
                );
                continue;
            }
            match self.remove_entry(id) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    audit.record(prune_event(id, AuditOutcome::Failed(err.to_string())));
                    return Err(err);
                }
            }
            tracing::info!(tool = %id.tool, version = %id.version, "pruned cache entry");
            audit.record(prune_event(id, AuditOutcome::Succeeded));
            removed.insert(id.clone());
        }
        for context in &plan.stale_contexts {
            if context.is_dir() {
                continue;
            }
            tracing::debug!(?context, "forgetting missing context");
            self.forget_context(context)?;
        }
        for dir in &plan.leftovers {
            tracing::debug!(?dir, "removing abandoned work directory");
            match std::fs::remove_dir_all(dir) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    tracing::warn!(?dir, "failed to remove abandoned work directory: {e}");
                }
                _ => {}
            }
        }
        Ok(removed)
    }

    /// Staging and trash directories under the root not touched recently.
    fn leftovers(&self) -> Result<Vec<PathBuf>> {
        let read = match std::fs::read_dir(&self.root) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::ReadFailed {
                    path: self.root.clone(),
                    error: e,
                });
            }
        };
        let mut leftovers = Vec::new();
        for entry in read {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !(name.starts_with(STAGING_PREFIX) || name.starts_with(TRASH_PREFIX)) {
                continue;
            }
            let abandoned = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= self.leftover_age);
            if abandoned {
                leftovers.push(entry.path());
            }
        }
        leftovers.sort();
        Ok(leftovers)
    }

    /// Move an entry out of sight, then delete it.
    fn remove_entry(&self, id: &ToolVersion) -> Result<bool> {
        let path = self.entry_path(&id.tool, &id.version);
        let trash = tempfile::Builder::new()
            .prefix(TRASH_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| Error::write_failed(&self.root, e))?;
        match std::fs::rename(&path, trash.path().join("entry")) {
            Ok(()) => {}
            // Someone else already removed it
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::write_failed(&path, e)),
        }
        trash.close()?;

        if let Some(tool_dir) = path.parent() {
            // Only succeeds once the last version is gone
            let _ = std::fs::remove_dir(tool_dir);
        }
        Ok(true)
    }
}

fn prune_event(id: &ToolVersion, outcome: AuditOutcome) -> AuditEvent {
    AuditEvent {
        tool: id.tool.clone(),
        version: id.version.clone(),
        action: AuditAction::Prune,
        context_path: None,
        outcome,
    }
}

/// Stable registry file name for a context path.
fn context_key(context: &Path) -> String {
    format!("{:x}", Sha256::digest(context.to_string_lossy().as_bytes()))
}

/// Non-hidden subdirectories of `dir`, by name.
fn visible_subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::ReadFailed {
                path: dir.to_path_buf(),
                error: e,
            });
        }
    };
    let mut dirs = Vec::new();
    for entry in read {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !entry.file_type()?.is_dir() {
            continue;
        }
        dirs.push((name, entry.path()));
    }
    Ok(dirs)
}
