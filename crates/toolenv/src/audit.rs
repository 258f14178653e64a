// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Audit trail of install, uninstall and prune actions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Install,
    Reinstall,
    Uninstall,
    /// Removal of an unreferenced cache entry.
    Prune,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Reinstall => "reinstall",
            Self::Uninstall => "uninstall",
            Self::Prune => "prune",
        })
    }
}

/// How an action ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Succeeded,
    /// Nothing to do, the entry was already present.
    Cached,
    Failed(String),
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => f.write_str("succeeded"),
            Self::Cached => f.write_str("cached"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub tool: String,
    pub version: String,
    pub action: AuditAction,
    /// Context the action was performed for. Prune events have none.
    pub context_path: Option<PathBuf>,
    pub outcome: AuditOutcome,
}

/// Receiver of audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits every event as a single `tracing` event on the `toolenv::audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event: AuditEvent) {
        let context = event
            .context_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match &event.outcome {
            AuditOutcome::Failed(reason) => tracing::warn!(
                target: "toolenv::audit",
                tool = %event.tool,
                version = %event.version,
                action = %event.action,
                %context,
                %reason,
                "failed"
            ),
            outcome => tracing::info!(
                target: "toolenv::audit",
                tool = %event.tool,
                version = %event.version,
                action = %event.action,
                %context,
                %outcome,
                "done"
            ),
        }
    }
}
