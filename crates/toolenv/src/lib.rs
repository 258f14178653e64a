// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! toolenv - Directory-Scoped Tool Environments
//!
//! This crate provides the core library for pinning developer tools per
//! directory through declaration files (`.toolenv.yaml`) and sharing their
//! installations through one global, version-addressed cache.
//!
//! # Overview
//!
//! A directory tree is split into contexts by activation markers. A
//! workspace declares the baseline tool set, projects nested inside it
//! inherit that set and may replace individual tools, and every directory
//! without a marker is standalone. Installations are downloaded once into
//! `<cache_root>/<tool>/<version>/` and reused by every context that
//! declares the same version.
//!
//! # Example
//!
//! ```yaml
//! # .toolenv.yaml
//! api: toolenv/v0
//!
//! tools:
//!   gradle: "8.5"
//!   cmake:
//!     version: "3.28.1"
//!   protoc:
//!     version: "25.1"
//!     path: ~/opt/protoc-25.1
//! ```
//!
//! ```text
//! # .envrc
//! # toolenv: workspace
//! ```

pub mod archive;
pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod declaration;
pub mod error;
pub mod fetch;
pub mod install;
pub mod lock;
pub mod platform;
pub mod recipe;
pub mod reconcile;
pub mod resolve;

#[cfg(test)]
mod testing;

pub use audit::{AuditAction, AuditEvent, AuditOutcome, AuditSink, TracingAudit};
pub use cache::{CacheEntry, PrunePlan, ToolCache, ToolVersion};
pub use config::Config;
pub use context::{Context, ContextKind, resolve};
pub use declaration::{ApiVersion, Declarations, ToolSpec};
pub use error::{Error, Result};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use install::{InstallAttempt, InstallOutcome, Installer};
pub use lock::{LockChange, LockChangeKind, LockFile, generate_lock, verify_lock};
pub use platform::{Arch, Os, Platform};
pub use recipe::{ArchiveKind, RecipeCatalog, RemoteSource, SourceResolver, ToolRecipe};
pub use reconcile::{ActionOutcome, ReconcileAction, ReconcilePlan, ReconcileReport, Reconciler};
pub use resolve::{EffectiveEnvironment, Layered, MergedDeclarations, ResolvedTool, effective, merge};

/// Well-known filename for tool declarations.
pub const DECLARATION_FILENAME: &str = ".toolenv.yaml";

/// Well-known filename for lock records.
pub const LOCK_FILENAME: &str = ".toolenv.lock.yaml";

/// Directory hook file carrying the `# toolenv: <type>` activation tag.
pub const MARKER_FILENAME: &str = ".envrc";
