// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Implementation of the `toolenv install` command.

use std::path::PathBuf;

use clap::Args;
use miette::Result;

/// Install declared tools, optionally declaring one first
#[derive(Debug, Args)]
pub struct CmdInstall {
    /// Tool to add to the context's declarations
    tool: Option<String>,

    /// Version of TOOL to declare
    #[clap(requires = "tool")]
    version: Option<String>,

    /// Use an existing installation instead of downloading
    #[clap(long, requires = "version")]
    path: Option<String>,

    /// Install for the context of DIR
    #[clap(short, long, default_value = ".")]
    dir: PathBuf,

    #[clap(flatten)]
    config: crate::ConfigFlags,
}

impl CmdInstall {
    pub async fn run(&mut self) -> Result<i32> {
        let config = self.config.load()?;
        let reconciler = toolenv::Reconciler::from_config(&config)?;
        let context = toolenv::resolve(&self.dir)?;

        if let Some(tool) = &self.tool {
            let Some(version) = &self.version else {
                return Err(miette::miette!(
                    help = format!("For example: toolenv install {tool} 1.2.3"),
                    "A version is required to declare '{tool}'"
                ));
            };
            let path = context.declaration_path();
            let mut declarations = toolenv::Declarations::load(&path)?;
            let mut spec = toolenv::ToolSpec::new(version.as_str());
            if let Some(raw) = &self.path {
                spec = spec.with_path(raw.as_str());
            }
            if let Some(previous) = declarations.insert(tool.as_str(), spec) {
                tracing::info!(%tool, from = %previous.version, to = %version, "updating declaration");
            }
            // Reject names that would not load back
            toolenv::Declarations::from_yaml(&declarations.to_yaml()?)?;
            declarations.save(&path)?;
            println!("Declared {tool} {version} in {}", path.display());
        }

        let plan = reconciler.plan(&context)?;
        crate::cmd_update::print_plan(&plan);
        let report = reconciler.execute(plan).await?;
        Ok(crate::cmd_update::print_report(&report))
    }
}
