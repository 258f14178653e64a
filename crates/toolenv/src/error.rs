// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for toolenv operations.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Convenience Result type with toolenv Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during toolenv operations.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Two different activation tags at one directory level
    #[error("Ambiguous context at {path:?}: marker is tagged both {first} and {second}")]
    #[diagnostic(
        code(toolenv::ambiguous_context),
        help("Keep a single '# toolenv: <type>' line in the .envrc file")
    )]
    AmbiguousContext {
        path: PathBuf,
        first: String,
        second: String,
    },

    /// Malformed declaration, lock or marker file
    #[error("Failed to parse {path:?}{}: {message}", location_hint(.line, .column))]
    #[diagnostic(
        code(toolenv::config_parse),
        help("Check the YAML syntax; tools are declared as 'tools: {{ name: {{ version: \"x.y\" }} }}'")
    )]
    ConfigParseError {
        path: PathBuf,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    /// Declared tool has neither a cache entry nor an existing override path
    #[error("{tool} {version} is declared but not installed")]
    #[diagnostic(
        code(toolenv::unresolved),
        help("Run 'toolenv install' to populate the cache")
    )]
    Unresolved { tool: String, version: String },

    /// No recipe supports the requested platform
    #[error("{tool} {version} is not available for {platform}")]
    #[diagnostic(code(toolenv::incompatible))]
    Incompatible {
        tool: String,
        version: String,
        platform: String,
    },

    /// No recipe is known for the tool
    #[error("No recipe known for tool '{0}'")]
    #[diagnostic(
        code(toolenv::unknown_tool),
        help("Add a recipe to the toolenv config or declare an explicit path")
    )]
    UnknownTool(String),

    /// Download failed after exhausting retries
    #[error("Failed to download {tool} {version} after {attempts} attempt(s): {message}")]
    #[diagnostic(code(toolenv::network))]
    NetworkError {
        tool: String,
        version: String,
        attempts: u32,
        message: String,
    },

    /// Extracted content does not look like a usable installation
    #[error("Corrupt install of {tool} {version}: {reason}")]
    #[diagnostic(code(toolenv::corrupt_install))]
    CorruptInstall {
        tool: String,
        version: String,
        reason: String,
    },

    /// Same tool declared twice in a single layer
    #[error("Tool '{tool}' is declared more than once in {path:?} ({first} and {second})")]
    #[diagnostic(
        code(toolenv::conflicting_version),
        help("Each tool may be declared once per file")
    )]
    ConflictingVersion {
        tool: String,
        path: PathBuf,
        first: String,
        second: String,
    },

    /// Cache root is not writable
    #[error("Permission denied writing to {path:?}")]
    #[diagnostic(
        code(toolenv::permission),
        help("Set TOOLENV_CACHE_ROOT to a writable directory")
    )]
    PermissionError {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Failed to read file
    #[error("Failed to read file: {path:?}")]
    #[diagnostic(code(toolenv::read_failed))]
    ReadFailed {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    #[diagnostic(code(toolenv::invalid_config))]
    InvalidConfig(String),

    /// IO error passthrough
    #[error(transparent)]
    #[diagnostic(code(toolenv::io_error))]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a parse error from a serde_yaml failure, keeping its location.
    pub fn yaml(path: impl Into<PathBuf>, error: &serde_yaml::Error) -> Self {
        let location = error.location();
        Self::ConfigParseError {
            path: path.into(),
            line: location.as_ref().map(|l| l.line()),
            column: location.as_ref().map(|l| l.column()),
            message: error.to_string(),
        }
    }

    /// Map an io error while writing under `path`, singling out permission problems.
    pub fn write_failed(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        if error.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionError {
                path: path.into(),
                error,
            }
        } else {
            Self::Io(error)
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

fn location_hint(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!(" at line {line}, column {column}"),
        (Some(line), None) => format!(" at line {line}"),
        _ => String::new(),
    }
}
