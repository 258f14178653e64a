// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Where tools come from and which platforms they support.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::platform::{Arch, Os, Platform};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./recipe_test.rs"]
mod recipe_test;

const LINUX_X64: Platform = Platform {
    os: Os::Linux,
    arch: Arch::X86_64,
};
const LINUX_ARM64: Platform = Platform {
    os: Os::Linux,
    arch: Arch::Arm64,
};
const DARWIN_X64: Platform = Platform {
    os: Os::Darwin,
    arch: Arch::X86_64,
};
const DARWIN_ARM64: Platform = Platform {
    os: Os::Darwin,
    arch: Arch::Arm64,
};

/// Archive formats toolenv can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    /// Guess the format from a download URL.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if path.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }
}

/// Platform-specific naming for one supported platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeTarget {
    pub platform: Platform,
    /// Value substituted for `{target}` in the URL.
    pub target: String,
    /// Entry executable when it differs from the recipe default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

impl RecipeTarget {
    fn new(platform: Platform, target: &str) -> Self {
        Self {
            platform,
            target: target.to_string(),
            entry: None,
        }
    }

    fn with_entry(mut self, entry: &str) -> Self {
        self.entry = Some(entry.to_string());
        self
    }
}

/// How to obtain one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecipe {
    pub name: String,

    /// Download URL; `{version}` and `{target}` are substituted.
    pub url: String,

    /// Path of the main executable relative to the installation root.
    pub entry: String,

    /// Archive format, inferred from the URL when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveKind>,

    /// Supported platforms. Empty means platform independent, in which case
    /// `{target}` expands to the platform name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<RecipeTarget>,
}

/// A concrete download for `(tool, version, platform)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSource {
    pub tool: String,
    pub version: String,
    pub platform: Platform,
    pub url: String,
    pub archive: ArchiveKind,
    /// Must exist inside the installation once extracted.
    pub entry: PathBuf,
}

impl RemoteSource {
    /// Version-addressed file name in the download cache.
    pub fn download_name(&self) -> String {
        format!(
            "{}-{}-{}.{}",
            self.tool,
            self.version,
            self.platform,
            self.archive.extension()
        )
    }
}

/// Resolution strategy from a tool request to a remote source.
pub trait SourceResolver: Send + Sync {
    /// Fails with `UnknownTool` or `Incompatible`; neither is worth retrying.
    fn source_for(&self, tool: &str, version: &str, platform: Platform) -> Result<RemoteSource>;
}

impl ToolRecipe {
    fn source_for(&self, version: &str, platform: Platform) -> Result<RemoteSource> {
        let (target, entry) = if self.targets.is_empty() {
            (platform.to_string(), self.entry.as_str())
        } else {
            let found = self
                .targets
                .iter()
                .find(|t| t.platform == platform)
                .ok_or_else(|| Error::Incompatible {
                    tool: self.name.clone(),
                    version: version.to_string(),
                    platform: platform.to_string(),
                })?;
            (
                found.target.clone(),
                found.entry.as_deref().unwrap_or(&self.entry),
            )
        };

        let url = self
            .url
            .replace("{version}", version)
            .replace("{target}", &target);
        let archive = self
            .archive
            .or_else(|| ArchiveKind::from_url(&url))
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "Cannot tell the archive format of '{url}' for {}; set 'archive' in the recipe",
                    self.name
                ))
            })?;

        Ok(RemoteSource {
            tool: self.name.clone(),
            version: version.to_string(),
            platform,
            url,
            archive,
            entry: PathBuf::from(entry.replace("{version}", version)),
        })
    }
}

/// Recipes by tool name.
#[derive(Debug, Clone, Default)]
pub struct RecipeCatalog {
    recipes: BTreeMap<String, ToolRecipe>,
}

impl RecipeCatalog {
    /// A catalog with no recipes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The recipes shipped with toolenv.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.insert(ToolRecipe {
            name: "gradle".to_string(),
            url: "https://services.gradle.org/distributions/gradle-{version}-bin.zip".to_string(),
            entry: "bin/gradle".to_string(),
            archive: Some(ArchiveKind::Zip),
            targets: Vec::new(),
        });
        catalog.insert(ToolRecipe {
            name: "cmake".to_string(),
            url: "https://github.com/Kitware/CMake/releases/download/v{version}/cmake-{version}-{target}.tar.gz".to_string(),
            entry: "bin/cmake".to_string(),
            archive: Some(ArchiveKind::TarGz),
            targets: vec![
                RecipeTarget::new(LINUX_X64, "linux-x86_64"),
                RecipeTarget::new(LINUX_ARM64, "linux-aarch64"),
                RecipeTarget::new(DARWIN_X64, "macos-universal")
                    .with_entry("CMake.app/Contents/bin/cmake"),
                RecipeTarget::new(DARWIN_ARM64, "macos-universal")
                    .with_entry("CMake.app/Contents/bin/cmake"),
            ],
        });
        catalog.insert(ToolRecipe {
            name: "node".to_string(),
            url: "https://nodejs.org/dist/v{version}/node-v{version}-{target}.tar.gz".to_string(),
            entry: "bin/node".to_string(),
            archive: Some(ArchiveKind::TarGz),
            targets: vec![
                RecipeTarget::new(LINUX_X64, "linux-x64"),
                RecipeTarget::new(LINUX_ARM64, "linux-arm64"),
                RecipeTarget::new(DARWIN_X64, "darwin-x64"),
                RecipeTarget::new(DARWIN_ARM64, "darwin-arm64"),
            ],
        });
        catalog.insert(ToolRecipe {
            name: "go".to_string(),
            url: "https://go.dev/dl/go{version}.{target}.tar.gz".to_string(),
            entry: "bin/go".to_string(),
            archive: Some(ArchiveKind::TarGz),
            targets: vec![
                RecipeTarget::new(LINUX_X64, "linux-amd64"),
                RecipeTarget::new(LINUX_ARM64, "linux-arm64"),
                RecipeTarget::new(DARWIN_X64, "darwin-amd64"),
                RecipeTarget::new(DARWIN_ARM64, "darwin-arm64"),
            ],
        });
        catalog
    }

    /// Add or replace a recipe.
    pub fn insert(&mut self, recipe: ToolRecipe) -> Option<ToolRecipe> {
        self.recipes.insert(recipe.name.clone(), recipe)
    }

    pub fn extend(&mut self, recipes: impl IntoIterator<Item = ToolRecipe>) {
        for recipe in recipes {
            self.insert(recipe);
        }
    }

    pub fn get(&self, tool: &str) -> Option<&ToolRecipe> {
        self.recipes.get(tool)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recipes.keys().map(String::as_str)
    }
}

impl SourceResolver for RecipeCatalog {
    fn source_for(&self, tool: &str, version: &str, platform: Platform) -> Result<RemoteSource> {
        self.get(tool)
            .ok_or_else(|| Error::UnknownTool(tool.to_string()))?
            .source_for(version, platform)
    }
}
