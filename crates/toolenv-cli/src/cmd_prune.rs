// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `toolenv prune` command.

use clap::Args;
use colored::Colorize;
use miette::Result;

/// Remove cache entries no context declares
#[derive(Debug, Args)]
pub struct CmdPrune {
    /// Print what would be removed without removing it
    #[clap(long)]
    dry_run: bool,

    #[clap(flatten)]
    config: crate::ConfigFlags,
}

impl CmdPrune {
    pub async fn run(&mut self) -> Result<i32> {
        let config = self.config.load()?;
        let cache = config.cache();
        let plan = cache.plan_prune()?;

        if plan.is_empty() {
            println!("Nothing to prune");
            return Ok(0);
        }

        for id in &plan.remove {
            println!("  - remove {}", id.to_string().yellow());
        }
        for context in &plan.stale_contexts {
            println!("  - forget {}", context.display().to_string().dimmed());
        }
        for dir in &plan.leftovers {
            println!("  - clean {}", dir.display().to_string().dimmed());
        }
        if self.dry_run {
            return Ok(0);
        }

        let removed = cache.apply_prune(&plan, &toolenv::TracingAudit)?;
        println!("Removed {} cache entr{}", removed.len(), if removed.len() == 1 { "y" } else { "ies" });
        Ok(0)
    }
}
