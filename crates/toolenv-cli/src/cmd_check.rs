// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Verify that the declarations match the lock record.

use std::path::PathBuf;

use clap::Args;
use miette::Result;

/// Verify declarations match the lock record
#[derive(Debug, Args)]
pub struct CmdCheck {
    /// Check the context of DIR
    #[clap(short, long, default_value = ".")]
    dir: PathBuf,

    /// Exit with error on mismatch
    #[clap(long)]
    strict: bool,
}

impl CmdCheck {
    pub async fn run(&mut self) -> Result<i32> {
        let context = toolenv::resolve(&self.dir)?;
        let merged = toolenv::merge(&context)?;

        // Load lock file
        let lock_path = context.lock_path();
        let Some(lock) = toolenv::LockFile::load(&lock_path)? else {
            if self.strict {
                return Err(miette::miette!("No lock file found at {:?}", lock_path));
            }
            println!("Warning: No lock file found");
            return Ok(2);
        };

        // Verify
        let changes = toolenv::verify_lock(&lock, &merged)?;

        if changes.is_empty() {
            println!("✓ Tools match lock file");
            return Ok(0);
        }

        // Report changes
        if self.strict {
            eprintln!("Error: Declarations differ from lock file:");
        } else {
            println!("Warning: Declarations differ from lock file:");
        }

        for change in &changes {
            match &change.kind {
                toolenv::LockChangeKind::ToolVersionChanged => {
                    println!("  - Tool '{}' version changed", change.reference);
                    if let (Some(exp), Some(act)) = (&change.expected, &change.actual) {
                        println!("    Locked:   {exp}");
                        println!("    Declared: {act}");
                    }
                }
                toolenv::LockChangeKind::ToolMissing => {
                    println!("  - Tool '{}' is no longer installed", change.reference);
                }
                toolenv::LockChangeKind::SourceFileChanged => {
                    println!("  - Source file '{}' was modified", change.reference);
                }
                _ => {
                    println!("  - {:?}: {}", change.kind, change.reference);
                }
            }
        }

        if self.strict {
            return Ok(1);
        }

        println!("\nRun 'toolenv update' to update the lock file");
        Ok(0)
    }
}
