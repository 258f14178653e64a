// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Classifying a directory as workspace, project, nested project or standalone.

use std::path::{Path, PathBuf};

use crate::{DECLARATION_FILENAME, Error, LOCK_FILENAME, MARKER_FILENAME, Result};

#[cfg(test)]
#[path = "./context_test.rs"]
mod context_test;

/// Tag prefix looked for on marker lines, e.g. `# toolenv: workspace`.
const MARKER_TAG: &str = "toolenv:";

/// Type tag carried by an activation marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Workspace,
    Project,
}

impl ContextKind {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "workspace" => Some(Self::Workspace),
            "project" => Some(Self::Project),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workspace => write!(f, "workspace"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// Classification of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Context {
    Workspace { root: PathBuf },
    Project { root: PathBuf },
    /// A project inside a workspace. `workspace` is a lookup-only reference.
    NestedProject { root: PathBuf, workspace: PathBuf },
    /// No marker on the path; `root` is the directory that was resolved.
    Standalone { root: PathBuf },
}

impl Context {
    /// Directory that owns this context's declarations.
    pub fn root(&self) -> &Path {
        match self {
            Self::Workspace { root }
            | Self::Project { root }
            | Self::NestedProject { root, .. }
            | Self::Standalone { root } => root,
        }
    }

    /// Owning workspace of a nested project.
    pub fn workspace(&self) -> Option<&Path> {
        match self {
            Self::NestedProject { workspace, .. } => Some(workspace),
            _ => None,
        }
    }

    pub fn declaration_path(&self) -> PathBuf {
        self.root().join(DECLARATION_FILENAME)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root().join(LOCK_FILENAME)
    }

    /// Short name of the variant, for display and audit events.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Workspace { .. } => "workspace",
            Self::Project { .. } => "project",
            Self::NestedProject { .. } => "nested-project",
            Self::Standalone { .. } => "standalone",
        }
    }
}

/// Resolve the context that applies to `start_path`.
///
/// The nearest ancestor-or-self marker decides the type. A `project` marker
/// keeps looking further up for a `workspace` marker to nest under.
pub fn resolve<P: AsRef<Path>>(start_path: P) -> Result<Context> {
    let start = resolve_start_path(start_path.as_ref());
    let ancestors: Vec<&Path> = start.ancestors().collect();

    let mut project: Option<&Path> = None;
    for dir in ancestors {
        let Some(kind) = read_marker(dir)? else {
            continue;
        };
        match (kind, project) {
            (ContextKind::Workspace, None) => {
                return Ok(Context::Workspace {
                    root: dir.to_path_buf(),
                });
            }
            (ContextKind::Workspace, Some(root)) => {
                return Ok(Context::NestedProject {
                    root: root.to_path_buf(),
                    workspace: dir.to_path_buf(),
                });
            }
            (ContextKind::Project, None) => project = Some(dir),
            // Projects above the nearest project do not change its type
            (ContextKind::Project, Some(_)) => {}
        }
    }

    Ok(match project {
        Some(root) => Context::Project {
            root: root.to_path_buf(),
        },
        None => {
            tracing::debug!(path = ?start, "no activation marker found, using standalone context");
            Context::Standalone { root: start }
        }
    })
}

/// Resolve starting path, preferring $PWD to preserve symlinks.
fn resolve_start_path(start_path: &Path) -> PathBuf {
    let joined = if start_path.is_absolute() {
        start_path.to_owned()
    } else {
        match std::env::var("PWD").ok() {
            Some(pwd) => PathBuf::from(pwd).join(start_path),
            None => std::env::current_dir()
                .unwrap_or_default()
                .join(start_path),
        }
    };
    normalize(&joined)
}

/// Drop `.` and fold `..` lexically so ancestors are real parents.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Read the type tag of the marker in `dir`, if there is one.
pub fn read_marker(dir: &Path) -> Result<Option<ContextKind>> {
    let path = dir.join(MARKER_FILENAME);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
            ) =>
        {
            return Ok(None);
        }
        Err(e) if path.is_dir() => {
            tracing::debug!(?path, "marker path is a directory, ignoring: {e}");
            return Ok(None);
        }
        Err(e) => return Err(Error::ReadFailed { path, error: e }),
    };
    parse_marker(&content, &path)
}

fn parse_marker(content: &str, path: &Path) -> Result<Option<ContextKind>> {
    let mut found: Option<ContextKind> = None;
    for (index, line) in content.lines().enumerate() {
        let Some(comment) = line.trim_start().strip_prefix('#') else {
            continue;
        };
        let Some(tag) = comment.trim_start().strip_prefix(MARKER_TAG) else {
            continue;
        };
        let tag = tag.trim();
        let kind = ContextKind::parse(tag).ok_or_else(|| Error::ConfigParseError {
            path: path.to_path_buf(),
            line: Some(index + 1),
            column: None,
            message: format!("unknown context type '{tag}', expected workspace or project"),
        })?;
        match found {
            Some(existing) if existing != kind => {
                return Err(Error::AmbiguousContext {
                    path: path.parent().unwrap_or(path).to_path_buf(),
                    first: existing.to_string(),
                    second: kind.to_string(),
                });
            }
            _ => found = Some(kind),
        }
    }
    Ok(found)
}
