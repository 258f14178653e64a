// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Converging a context's installed tool set onto its declarations.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::audit::{AuditAction, AuditEvent, AuditOutcome};
use crate::cache::ToolVersion;
use crate::config::Config;
use crate::context::Context;
use crate::install::{InstallOutcome, Installer};
use crate::lock::{LockFile, LockedTool, generate_lock};
use crate::resolve::{MergedDeclarations, expand_path, merge};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./reconcile_test.rs"]
mod reconcile_test;

/// One step needed to bring the lock record in line with the declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Declared but not installed for this context.
    Install { tool: String, version: String },
    /// Declared at a different version than recorded.
    Reinstall {
        tool: String,
        from: String,
        version: String,
    },
    /// Recorded but no longer declared. Only the reference is dropped.
    Uninstall { tool: String, version: String },
    /// Declared with an explicit path; recorded without installing.
    UseOverride {
        tool: String,
        version: String,
        path: PathBuf,
    },
}

impl ReconcileAction {
    pub fn tool(&self) -> &str {
        match self {
            Self::Install { tool, .. }
            | Self::Reinstall { tool, .. }
            | Self::Uninstall { tool, .. }
            | Self::UseOverride { tool, .. } => tool,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Self::Install { version, .. }
            | Self::Reinstall { version, .. }
            | Self::Uninstall { version, .. }
            | Self::UseOverride { version, .. } => version,
        }
    }
}

impl std::fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install { tool, version } => write!(f, "install {tool} {version}"),
            Self::Reinstall {
                tool,
                from,
                version,
            } => write!(f, "reinstall {tool} {from} -> {version}"),
            Self::Uninstall { tool, version } => write!(f, "uninstall {tool} {version}"),
            Self::UseOverride {
                tool,
                version,
                path,
            } => write!(f, "use {tool} {version} from {}", path.display()),
        }
    }
}

/// Actions for one context, computed before anything is changed.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub context: Context,
    pub actions: Vec<ReconcileAction>,
    merged: MergedDeclarations,
    previous: LockFile,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// What happened to one planned action.
#[derive(Debug)]
pub enum ActionOutcome {
    Installed(PathBuf),
    Cached(PathBuf),
    Recorded(PathBuf),
    Uninstalled,
    Failed(Error),
}

impl ActionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Debug)]
pub struct ReconcileReport {
    /// Outcomes in plan order.
    pub outcomes: Vec<(ReconcileAction, ActionOutcome)>,
    /// Lock record as written at the end of the run.
    pub lock: LockFile,
}

impl ReconcileReport {
    pub fn failures(&self) -> impl Iterator<Item = (&ReconcileAction, &Error)> {
        self.outcomes.iter().filter_map(|(action, outcome)| match outcome {
            ActionOutcome::Failed(err) => Some((action, err)),
            _ => None,
        })
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

pub struct Reconciler {
    installer: Installer,
    parallelism: usize,
}

impl Reconciler {
    pub fn new(installer: Installer) -> Self {
        Self {
            installer,
            parallelism: 4,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(Installer::from_config(config)?).with_parallelism(config.parallelism))
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    /// Diff the merged declarations of `context` against its lock record.
    pub fn plan(&self, context: &Context) -> Result<ReconcilePlan> {
        let merged = merge(context)?;
        let previous = LockFile::load(context.lock_path())?.unwrap_or_default();
        let cache = self.installer.cache();
        let mut actions = Vec::new();

        for (tool, layered) in merged.iter() {
            let spec = layered.spec();
            let recorded = previous.tools.get(tool);

            if let Some(raw) = &spec.path {
                let path = expand_path(raw, merged.declaring_root(layered))
                    .unwrap_or_else(|| PathBuf::from(raw));
                let unchanged =
                    recorded.is_some_and(|r| r.version == spec.version && r.path == path);
                if !unchanged {
                    actions.push(ReconcileAction::UseOverride {
                        tool: tool.clone(),
                        version: spec.version.clone(),
                        path,
                    });
                }
                continue;
            }

            let action = match recorded {
                None => Some(ReconcileAction::Install {
                    tool: tool.clone(),
                    version: spec.version.clone(),
                }),
                Some(r) if r.version != spec.version => Some(ReconcileAction::Reinstall {
                    tool: tool.clone(),
                    from: r.version.clone(),
                    version: spec.version.clone(),
                }),
                Some(r) => match cache.lookup(tool, &spec.version) {
                    Some(path) if path == r.path => None,
                    _ => Some(ReconcileAction::Install {
                        tool: tool.clone(),
                        version: spec.version.clone(),
                    }),
                },
            };
            actions.extend(action);
        }

        for (tool, recorded) in &previous.tools {
            if merged.get(tool).is_none() {
                actions.push(ReconcileAction::Uninstall {
                    tool: tool.clone(),
                    version: recorded.version.clone(),
                });
            }
        }

        tracing::debug!(context = ?context.root(), actions = actions.len(), "planned reconcile");
        Ok(ReconcilePlan {
            context: context.clone(),
            actions,
            merged,
            previous,
        })
    }

    /// Carry out a plan and rewrite the lock record once at the end.
    ///
    /// Installs run first with bounded parallelism, then uninstalls. A
    /// failed action never aborts its siblings.
    pub async fn execute(&self, plan: ReconcilePlan) -> Result<ReconcileReport> {
        let context_root = plan.context.root().to_path_buf();
        let mut tools = plan.previous.tools.clone();
        let mut outcomes: Vec<Option<ActionOutcome>> =
            plan.actions.iter().map(|_| None).collect();

        // Installs, deduplicated per (tool, version)
        let mut installs: BTreeMap<ToolVersion, (AuditAction, usize)> = BTreeMap::new();
        for (index, action) in plan.actions.iter().enumerate() {
            let audit_action = match action {
                ReconcileAction::Install { .. } => AuditAction::Install,
                ReconcileAction::Reinstall { .. } => AuditAction::Reinstall,
                _ => continue,
            };
            installs
                .entry(ToolVersion::new(action.tool(), action.version()))
                .or_insert((audit_action, index));
        }

        let installer = &self.installer;
        let context = context_root.as_path();
        let results: Vec<_> = stream::iter(installs)
            .map(|(id, (audit_action, index))| async move {
                let attempt = installer
                    .install_as(&id.tool, &id.version, context, audit_action)
                    .await;
                (id, audit_action, index, attempt)
            })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        for (id, audit_action, index, attempt) in results {
            outcomes[index] = Some(match attempt.outcome {
                InstallOutcome::Installed(path) => {
                    tools.insert(id.tool, locked(&id.version, path.clone()));
                    ActionOutcome::Installed(path)
                }
                InstallOutcome::Cached(path) => {
                    tools.insert(id.tool, locked(&id.version, path.clone()));
                    ActionOutcome::Cached(path)
                }
                InstallOutcome::Failed(err) => {
                    // A failed reinstall keeps the previous record
                    if audit_action == AuditAction::Install {
                        tools.remove(&id.tool);
                    }
                    tracing::warn!(tool = %id.tool, version = %id.version, "{err}");
                    ActionOutcome::Failed(err)
                }
            });
        }

        for (index, action) in plan.actions.iter().enumerate() {
            let ReconcileAction::UseOverride {
                tool,
                version,
                path,
            } = action
            else {
                continue;
            };
            outcomes[index] = Some(if path.exists() {
                tools.insert(tool.clone(), locked(version, path.clone()));
                ActionOutcome::Recorded(path.clone())
            } else {
                tools.remove(tool);
                ActionOutcome::Failed(Error::Unresolved {
                    tool: tool.clone(),
                    version: version.clone(),
                })
            });
        }

        // Uninstalls run last and never touch the cache
        for (index, action) in plan.actions.iter().enumerate() {
            let ReconcileAction::Uninstall { tool, version } = action else {
                continue;
            };
            tools.remove(tool);
            self.installer.audit().record(AuditEvent {
                tool: tool.clone(),
                version: version.clone(),
                action: AuditAction::Uninstall,
                context_path: Some(context_root.clone()),
                outcome: AuditOutcome::Succeeded,
            });
            outcomes[index] = Some(ActionOutcome::Uninstalled);
        }

        let lock = generate_lock(&plan.merged, tools)?;
        lock.save(plan.context.lock_path())?;
        tracing::debug!(path = ?plan.context.lock_path(), "wrote lock record");

        let outcomes = plan
            .actions
            .into_iter()
            .zip(outcomes)
            .map(|(action, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    ActionOutcome::Failed(Error::InvalidConfig(format!("{action} was not run")))
                });
                (action, outcome)
            })
            .collect();
        Ok(ReconcileReport { outcomes, lock })
    }
}

fn locked(version: &str, path: PathBuf) -> LockedTool {
    LockedTool {
        version: version.to_string(),
        path,
        installed_at: Utc::now(),
    }
}
