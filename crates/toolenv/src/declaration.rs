// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Reading and writing `.toolenv.yaml` tool declarations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result, DECLARATION_FILENAME};

#[cfg(test)]
#[path = "./declaration_test.rs"]
mod declaration_test;

/// API version for declaration files.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
pub enum ApiVersion {
    #[default]
    #[serde(rename = "toolenv/v0")]
    V0,
}

/// Helper for two-stage deserialization to determine API version first.
#[derive(Deserialize)]
struct ApiVersionMapping {
    #[serde(default)]
    api: ApiVersion,
}

/// One declared tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    /// Exact version to install.
    pub version: String,

    /// Use this directory instead of a cache entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ToolSpec {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Accepts either `gradle: "8.5"` or `gradle: { version: "8.5", path: ... }`.
impl<'de> Deserialize<'de> for ToolSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SpecVisitor;

        impl<'de> Visitor<'de> for SpecVisitor {
            type Value = ToolSpec;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a version or a mapping with a version")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                Ok(ToolSpec::new(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                Ok(ToolSpec::new(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
                Ok(ToolSpec::new(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Self::Value, E> {
                Err(unquoted_decimal(v))
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let full = FullSpec::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(ToolSpec {
                    version: full.version.0,
                    path: full.path,
                })
            }
        }

        deserializer.deserialize_any(SpecVisitor)
    }
}

#[derive(Deserialize)]
struct FullSpec {
    version: VersionString,
    #[serde(default)]
    path: Option<String>,
}

/// Version that may be written as an unquoted integer, e.g. `version: 21`.
///
/// Unquoted decimals are refused: YAML reads `8.10` as the float `8.1`.
struct VersionString(String);

fn unquoted_decimal<E: de::Error>(v: f64) -> E {
    E::custom(format!(
        "unquoted version {v} is read as a number and may have lost trailing zeros, quote it"
    ))
}

struct VersionVisitor;

impl Visitor<'_> for VersionVisitor {
    type Value = VersionString;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a version string or integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
        Ok(VersionString(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
        Ok(VersionString(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
        Ok(VersionString(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Self::Value, E> {
        Err(unquoted_decimal(v))
    }
}

impl<'de> Deserialize<'de> for VersionString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(VersionVisitor)
    }
}

/// Tool entries in file order, duplicates preserved so they can be reported.
#[derive(Default)]
struct ToolEntries(Vec<(String, ToolSpec)>);

impl<'de> Deserialize<'de> for ToolEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = ToolEntries;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a mapping of tool names to versions")
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(ToolEntries::default())
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((name, spec)) = map.next_entry::<String, ToolSpec>()? {
                    entries.push((name, spec));
                }
                Ok(ToolEntries(entries))
            }
        }

        deserializer.deserialize_any(EntriesVisitor)
    }
}

#[derive(Deserialize, Default)]
struct DeclarationFile {
    #[serde(default)]
    tools: ToolEntries,
}

#[derive(Serialize)]
struct DeclarationFileRef<'a> {
    api: ApiVersion,
    tools: &'a BTreeMap<String, ToolSpec>,
}

/// The tools declared by one context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declarations {
    /// API version identifier.
    pub api: ApiVersion,

    /// Tool name to declared version and optional path override.
    pub tools: BTreeMap<String, ToolSpec>,

    /// File these were loaded from, if it existed.
    pub source_path: Option<PathBuf>,
}

impl Declarations {
    /// Parse declarations from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::parse(yaml, Path::new("<string>"))
    }

    fn parse(yaml: &str, origin: &Path) -> Result<Self> {
        // Stage 1: Parse to get API version (an empty document has none)
        let Some(with_version) = serde_yaml::from_str::<Option<ApiVersionMapping>>(yaml)
            .map_err(|e| Error::yaml(origin, &e))?
        else {
            return Ok(Self::default());
        };

        // Stage 2: Deserialize based on version. Parsed straight from text rather
        // than through serde_yaml::Value, which would reject duplicate keys
        // before they can be reported as conflicts.
        let file: Option<DeclarationFile> = match with_version.api {
            ApiVersion::V0 => serde_yaml::from_str(yaml).map_err(|e| Error::yaml(origin, &e))?,
        };
        let file = file.unwrap_or_default();

        let mut tools: BTreeMap<String, ToolSpec> = BTreeMap::new();
        for (name, spec) in file.tools.0 {
            validate_component(&name, "tool name", origin)?;
            validate_component(&spec.version, "version", origin)?;
            if let Some(existing) = tools.get(&name) {
                return Err(Error::ConflictingVersion {
                    tool: name,
                    path: origin.to_path_buf(),
                    first: existing.version.clone(),
                    second: spec.version,
                });
            }
            tools.insert(name, spec);
        }

        Ok(Self {
            api: with_version.api,
            tools,
            source_path: None,
        })
    }

    /// Load declarations from a file; a missing file is an empty declaration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = match std::fs::read_to_string(path) {
            Ok(yaml) => yaml,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::ReadFailed {
                    path: path.to_path_buf(),
                    error: e,
                });
            }
        };

        let mut declarations = Self::parse(&yaml, path)?;
        declarations.source_path = Some(path.to_path_buf());
        Ok(declarations)
    }

    /// Load the declaration file that lives in a context root.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::load(dir.as_ref().join(DECLARATION_FILENAME))
    }

    /// Render as YAML with tools in sorted order.
    pub fn to_yaml(&self) -> Result<String> {
        let file = DeclarationFileRef {
            api: self.api,
            tools: &self.tools,
        };
        serde_yaml::to_string(&file)
            .map_err(|e| Error::InvalidConfig(format!("Failed to serialize declarations: {e}")))
    }

    /// Write atomically to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_atomic(path.as_ref(), self.to_yaml()?.as_bytes())
    }

    pub fn get(&self, tool: &str) -> Option<&ToolSpec> {
        self.tools.get(tool)
    }

    pub fn insert(&mut self, tool: impl Into<String>, spec: ToolSpec) -> Option<ToolSpec> {
        self.tools.insert(tool.into(), spec)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Tool names and versions become cache directory names.
fn validate_component(value: &str, what: &str, origin: &Path) -> Result<()> {
    let invalid = value.is_empty()
        || value.starts_with('.')
        || value.contains(['/', '\\'])
        || value.chars().any(char::is_whitespace);
    if invalid {
        return Err(Error::ConfigParseError {
            path: origin.to_path_buf(),
            line: None,
            column: None,
            message: format!("invalid {what} '{value}'"),
        });
    }
    Ok(())
}

/// Write a file by renaming a sibling temp file over it.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| Error::write_failed(dir, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::write_failed(dir, e))?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| Error::write_failed(path, e.error))?;
    Ok(())
}
