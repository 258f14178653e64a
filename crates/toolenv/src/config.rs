// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration.
//!
//! Values are layered from, lowest priority first: built-in defaults,
//! `~/.config/toolenv/config.yaml`, an explicitly given file, and
//! `TOOLENV_*` environment variables (`__` separates nested keys).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::ToolCache;
use crate::recipe::{RecipeCatalog, ToolRecipe};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

const ENV_PREFIX: &str = "TOOLENV";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the installation tree, `<cache_root>/<tool>/<version>/`.
    pub cache_root: PathBuf,

    /// Additional download attempts after the first transient failure.
    pub max_retries: usize,

    pub retry_base_delay_ms: u64,
    pub download_timeout_secs: u64,
    pub extract_timeout_secs: u64,

    /// Installs that may run at once during a reconcile.
    pub parallelism: usize,

    /// Recipes added to, or replacing, the built-in ones.
    pub recipes: Vec<ToolRecipe>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            max_retries: 4,
            retry_base_delay_ms: 250,
            download_timeout_secs: 300,
            extract_timeout_secs: 120,
            parallelism: 4,
            recipes: Vec::new(),
        }
    }
}

impl Config {
    /// Load from the user config file and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load including an explicit config file, which must exist.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        Self::from_sources(user_config_path().as_deref(), explicit, None)
    }

    fn from_sources(
        user: Option<&Path>,
        explicit: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(user) = user {
            tracing::debug!(path = ?user, "reading user config");
            builder = builder.add_source(
                config::File::from(user)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            );
        }
        if let Some(explicit) = explicit {
            builder = builder.add_source(
                config::File::from(explicit)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(Error::InvalidConfig("parallelism must be at least 1".to_string()));
        }
        if self.cache_root.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("cache_root must not be empty".to_string()));
        }
        Ok(())
    }

    /// The cache handle. Work directories survive twice the extract timeout
    /// before prune treats them as abandoned.
    pub fn cache(&self) -> ToolCache {
        ToolCache::new(&self.cache_root).with_leftover_age(self.extract_timeout() * 2)
    }

    /// Built-in recipes extended with the configured ones.
    pub fn catalog(&self) -> RecipeCatalog {
        let mut catalog = RecipeCatalog::builtin();
        catalog.extend(self.recipes.iter().cloned());
        catalog
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }
}

fn default_cache_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("toolenv")
        .join("tools")
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("toolenv").join("config.yaml"))
}
