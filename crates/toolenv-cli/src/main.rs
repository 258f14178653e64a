// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! toolenv - Directory-Scoped Tool Environments CLI

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;

mod cmd_cache;
mod cmd_check;
mod cmd_install;
mod cmd_prune;
mod cmd_show;
mod cmd_update;

use cmd_cache::CmdCache;
use cmd_check::CmdCheck;
use cmd_install::CmdInstall;
use cmd_prune::CmdPrune;
use cmd_show::CmdShow;
use cmd_update::CmdUpdate;

#[derive(Parser)]
#[clap(
    name = "toolenv",
    about = "Directory-scoped tool environments",
    version,
    long_about = "Pin developer tools per workspace and project, installed once into a shared cache"
)]
struct Opt {
    #[clap(flatten)]
    logging: Logging,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Parser)]
struct Logging {
    /// Increase verbosity (-v, -vv, -vvv)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[clap(short, long, global = true)]
    quiet: bool,
}

#[derive(Parser, Clone, Debug, Default)]
pub struct ConfigFlags {
    /// Read engine settings from this file as well
    #[clap(long = "config", env = "TOOLENV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the cache root for this invocation
    #[clap(long = "cache-root")]
    pub cache_root: Option<PathBuf>,
}

impl ConfigFlags {
    pub fn load(&self) -> Result<toolenv::Config> {
        let mut config = toolenv::Config::load_from(self.config.as_deref())?;
        if let Some(root) = &self.cache_root {
            config.cache_root = root.clone();
        }
        tracing::debug!(cache_root = ?config.cache_root, "loaded configuration");
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Display the context and effective tool environment
    Show(CmdShow),

    /// Install declared tools, optionally declaring one first
    Install(CmdInstall),

    /// Reconcile installed tools with the declarations
    Update(CmdUpdate),

    /// Remove cache entries no context declares
    Prune(CmdPrune),

    /// Verify declarations match the lock record
    Check(CmdCheck),

    /// List cache entries
    Cache(CmdCache),
}

impl Opt {
    async fn run(self) -> Result<i32> {
        // Setup logging
        let log_level = match (self.logging.quiet, self.logging.verbose) {
            (true, _) => tracing::Level::ERROR,
            (false, 0) => tracing::Level::WARN,
            (false, 1) => tracing::Level::INFO,
            (false, 2) => tracing::Level::DEBUG,
            (false, _) => tracing::Level::TRACE,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .init();

        // Dispatch to command
        match self.cmd {
            Command::Show(mut cmd) => cmd.run().await,
            Command::Install(mut cmd) => cmd.run().await,
            Command::Update(mut cmd) => cmd.run().await,
            Command::Prune(mut cmd) => cmd.run().await,
            Command::Check(mut cmd) => cmd.run().await,
            Command::Cache(mut cmd) => cmd.run().await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    let code = opt.run().await?;
    std::process::exit(code);
}
