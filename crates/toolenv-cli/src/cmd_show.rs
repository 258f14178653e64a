// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `toolenv show` command.

use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use miette::{IntoDiagnostic, Result};

/// Display the context and effective tool environment
#[derive(Debug, Args)]
pub struct CmdShow {
    /// Resolve the context of DIR
    #[clap(short, long, default_value = ".")]
    dir: PathBuf,

    /// Output format: table, yaml
    #[clap(long, default_value = "table")]
    format: String,

    /// Exit with an error when a declared tool is not installed
    #[clap(long)]
    strict: bool,

    #[clap(flatten)]
    config: crate::ConfigFlags,
}

impl CmdShow {
    pub async fn run(&mut self) -> Result<i32> {
        let config = self.config.load()?;
        let context = toolenv::resolve(&self.dir)?;
        let env = toolenv::effective(&context, &config.cache())?;

        if self.format == "yaml" {
            // The tool -> path mapping consumed by environment file generators
            let yaml = serde_yaml::to_string(&env.tool_paths()).into_diagnostic()?;
            print!("{yaml}");
        } else {
            self.show_table(&env);
        }

        if self.strict {
            env.require_complete()?;
        }
        Ok(0)
    }

    fn show_table(&self, env: &toolenv::EffectiveEnvironment) {
        println!("{}", "Context:".bold());
        println!();
        println!(
            "  {} {}",
            env.context.kind_name().yellow(),
            env.context.root().display().to_string().cyan()
        );
        if let Some(workspace) = env.context.workspace() {
            println!("  inherits from {}", workspace.display().to_string().cyan());
        }
        for file in &env.source_files {
            println!("  {} {}", "declared in".dimmed(), file.display());
        }

        println!();
        println!("{}", "Tools:".bold());
        println!();
        if env.tools.is_empty() && env.unresolved.is_empty() {
            println!("  {}", "(no tools declared)".dimmed());
        }
        for (tool, resolved) in &env.tools {
            let origin = if resolved.is_from_workspace() {
                "workspace"
            } else {
                "project"
            };
            let value = resolved.value();
            let marker = if value.overridden { " [path]" } else { "" };
            println!(
                "  {} {} {}{}  {}",
                tool.green(),
                value.version,
                format!("({origin})").dimmed(),
                marker.yellow(),
                value.path.display()
            );
        }
        for missing in &env.unresolved {
            println!(
                "  {} {} {}",
                missing.tool.red(),
                missing.version,
                "(not installed)".red()
            );
        }
        if !env.unresolved.is_empty() {
            println!();
            println!("Run 'toolenv install' to install missing tools");
        }
    }
}
