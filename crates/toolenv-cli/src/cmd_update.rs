// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `toolenv update` command.

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use miette::Result;
use toolenv::{ActionOutcome, ReconcilePlan, ReconcileReport};

/// Reconcile installed tools with the declarations
#[derive(Debug, Args)]
pub struct CmdUpdate {
    /// Reconcile the context of DIR
    #[clap(short, long, default_value = ".")]
    dir: PathBuf,

    /// Print the plan without changing anything
    #[clap(long)]
    dry_run: bool,

    #[clap(flatten)]
    config: crate::ConfigFlags,
}

impl CmdUpdate {
    pub async fn run(&mut self) -> Result<i32> {
        let config = self.config.load()?;
        let reconciler = toolenv::Reconciler::from_config(&config)?;
        let context = toolenv::resolve(&self.dir)?;
        let plan = reconciler.plan(&context)?;

        print_plan(&plan);
        if self.dry_run {
            return Ok(0);
        }

        let report = reconciler.execute(plan).await?;
        Ok(print_report(&report))
    }
}

pub fn print_plan(plan: &ReconcilePlan) {
    if plan.is_empty() {
        println!(
            "{} is up to date",
            plan.context.root().display().to_string().cyan()
        );
        return;
    }
    println!("{}", "Planned changes:".bold());
    for action in &plan.actions {
        println!("  - {action}");
    }
}

/// Print per-action outcomes, returning the exit code.
pub fn print_report(report: &ReconcileReport) -> i32 {
    for (action, outcome) in &report.outcomes {
        match outcome {
            ActionOutcome::Installed(path) => {
                println!("{} {action} ({})", "✓".green(), path.display())
            }
            ActionOutcome::Cached(_) => println!("{} {action} (cached)", "✓".green()),
            ActionOutcome::Recorded(_) => println!("{} {action}", "✓".green()),
            ActionOutcome::Uninstalled => println!("{} {action}", "✓".green()),
            ActionOutcome::Failed(err) => eprintln!("{} {action}: {err}", "✗".red()),
        }
    }
    if report.is_success() { 0 } else { 1 }
}
