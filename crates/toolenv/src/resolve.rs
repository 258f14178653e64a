// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Merging workspace and project declarations into an effective environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::{ToolCache, ToolVersion};
use crate::context::Context;
use crate::declaration::{Declarations, ToolSpec};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./resolve_test.rs"]
mod resolve_test;

/// A value tagged with the layer that supplied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layered<T> {
    FromWorkspace(T),
    FromProject(T),
}

impl<T> Layered<T> {
    pub fn value(&self) -> &T {
        match self {
            Self::FromWorkspace(v) | Self::FromProject(v) => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::FromWorkspace(v) | Self::FromProject(v) => v,
        }
    }

    pub fn is_from_workspace(&self) -> bool {
        matches!(self, Self::FromWorkspace(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Layered<U> {
        match self {
            Self::FromWorkspace(v) => Layered::FromWorkspace(f(v)),
            Self::FromProject(v) => Layered::FromProject(f(v)),
        }
    }
}

impl Layered<ToolSpec> {
    pub fn spec(&self) -> &ToolSpec {
        self.value()
    }
}

/// Declarations of a context after applying workspace inheritance.
#[derive(Debug, Clone, Default)]
pub struct MergedDeclarations {
    pub tools: BTreeMap<String, Layered<ToolSpec>>,

    /// Declaration files that contributed, base layer first.
    pub source_files: Vec<PathBuf>,

    workspace_root: Option<PathBuf>,
    project_root: PathBuf,
}

impl MergedDeclarations {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Layered<ToolSpec>)> {
        self.tools.iter()
    }

    pub fn get(&self, tool: &str) -> Option<&Layered<ToolSpec>> {
        self.tools.get(tool)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Directory that relative override paths of this entry are based on.
    pub fn declaring_root(&self, entry: &Layered<ToolSpec>) -> &Path {
        match entry {
            Layered::FromWorkspace(_) => self
                .workspace_root
                .as_deref()
                .unwrap_or(&self.project_root),
            Layered::FromProject(_) => &self.project_root,
        }
    }
}

/// Merge the declarations that apply to `context`.
///
/// For a nested project the workspace layer is loaded first and every tool
/// the project declares replaces the workspace entry wholesale.
pub fn merge(context: &Context) -> Result<MergedDeclarations> {
    let mut merged = MergedDeclarations {
        project_root: context.root().to_path_buf(),
        ..Default::default()
    };

    match context {
        Context::Workspace { root } => {
            merged.workspace_root = Some(root.clone());
            let own = Declarations::load_dir(root)?;
            push_layer(&mut merged, own, Layered::FromWorkspace);
        }
        Context::NestedProject { root, workspace } => {
            merged.workspace_root = Some(workspace.clone());
            let base = Declarations::load_dir(workspace)?;
            push_layer(&mut merged, base, Layered::FromWorkspace);
            let own = Declarations::load_dir(root)?;
            push_layer(&mut merged, own, Layered::FromProject);
        }
        Context::Project { root } | Context::Standalone { root } => {
            let own = Declarations::load_dir(root)?;
            push_layer(&mut merged, own, Layered::FromProject);
        }
    }

    Ok(merged)
}

fn push_layer(
    merged: &mut MergedDeclarations,
    layer: Declarations,
    tag: fn(ToolSpec) -> Layered<ToolSpec>,
) {
    if let Some(path) = layer.source_path {
        merged.source_files.push(path);
    }
    for (tool, spec) in layer.tools {
        if let Some(previous) = merged.tools.insert(tool.clone(), tag(spec)) {
            tracing::debug!(%tool, from = %previous.spec().version, "project overrides workspace version");
        }
    }
}

/// A tool resolved to an existing directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    pub version: String,
    pub path: PathBuf,
    /// True when `path` came from a declared override rather than the cache.
    pub overridden: bool,
}

/// Tools available to a context, ready for activation.
#[derive(Debug, Clone)]
pub struct EffectiveEnvironment {
    pub context: Context,

    /// Only tools whose installation path exists.
    pub tools: BTreeMap<String, Layered<ResolvedTool>>,

    /// Declared tools with no usable installation.
    pub unresolved: Vec<ToolVersion>,

    pub source_files: Vec<PathBuf>,
}

impl EffectiveEnvironment {
    /// Tool name to installation directory, for the environment file generator.
    pub fn tool_paths(&self) -> BTreeMap<String, PathBuf> {
        self.tools
            .iter()
            .map(|(tool, resolved)| (tool.clone(), resolved.value().path.clone()))
            .collect()
    }

    pub fn version_of(&self, tool: &str) -> Option<&str> {
        self.tools.get(tool).map(|r| r.value().version.as_str())
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Fail with the first unresolved tool, if any.
    pub fn require_complete(&self) -> Result<()> {
        match self.unresolved.first() {
            Some(missing) => Err(Error::Unresolved {
                tool: missing.tool.clone(),
                version: missing.version.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Compute the effective environment of `context` against `cache`.
pub fn effective(context: &Context, cache: &ToolCache) -> Result<EffectiveEnvironment> {
    let merged = merge(context)?;
    let mut tools = BTreeMap::new();
    let mut unresolved = Vec::new();

    for (tool, entry) in merged.iter() {
        let spec = entry.spec();
        let found = match &spec.path {
            Some(raw) => expand_path(raw, merged.declaring_root(entry))
                .filter(|p| p.exists())
                .map(|path| (path, true)),
            None => cache.lookup(tool, &spec.version).map(|path| (path, false)),
        };

        match found {
            Some((path, overridden)) => {
                let resolved = entry.clone().map(|spec| ResolvedTool {
                    version: spec.version,
                    path,
                    overridden,
                });
                tools.insert(tool.clone(), resolved);
            }
            None => {
                tracing::debug!(%tool, version = %spec.version, "tool is unresolved");
                unresolved.push(ToolVersion::new(tool, &spec.version));
            }
        }
    }

    Ok(EffectiveEnvironment {
        context: context.clone(),
        tools,
        unresolved,
        source_files: merged.source_files,
    })
}

/// Expand `~/` and resolve relative paths against `base`.
///
/// Returns `None` when the home directory is needed but unknown.
pub fn expand_path(raw: &str, base: &Path) -> Option<PathBuf> {
    let path = if raw == "~" || raw.starts_with("~/") {
        let Some(home) = dirs::home_dir() else {
            tracing::warn!(path = %raw, "cannot resolve ~ without HOME");
            return None;
        };
        home.join(raw.trim_start_matches('~').trim_start_matches('/'))
    } else if Path::new(raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        base.join(raw)
    };
    Some(dunce::simplified(&path).to_path_buf())
}
