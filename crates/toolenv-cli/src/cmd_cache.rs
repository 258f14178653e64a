// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `toolenv cache` command.

use clap::Args;
use colored::Colorize;
use miette::Result;

/// List cache entries
#[derive(Debug, Args)]
pub struct CmdCache {
    /// Show the contexts referencing each entry
    #[clap(long)]
    references: bool,

    #[clap(flatten)]
    config: crate::ConfigFlags,
}

impl CmdCache {
    pub async fn run(&mut self) -> Result<i32> {
        let config = self.config.load()?;
        let cache = config.cache();
        let entries = cache.entries()?;

        println!(
            "{} {}",
            "Cache:".bold(),
            cache.root().display().to_string().cyan()
        );
        println!();
        if entries.is_empty() {
            println!("  {}", "(empty)".dimmed());
        }
        for entry in &entries {
            let refs = entry.references.len();
            let refs = if refs == 0 {
                "unreferenced".yellow()
            } else {
                format!("{refs} context(s)").normal()
            };
            let platform = entry
                .platform
                .map(|p| p.to_string())
                .unwrap_or_default();
            println!(
                "  {} {} {} {}",
                entry.id.to_string().green(),
                entry.installed_at.format("%Y-%m-%d %H:%M"),
                platform.dimmed(),
                refs
            );
            if self.references {
                for context in &entry.references {
                    println!("      {}", context.display());
                }
            }
        }

        println!();
        println!("Total: {} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
        Ok(0)
    }
}
