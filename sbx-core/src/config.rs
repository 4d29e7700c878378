/*
 * sbx-core
 *
 * Copyright (C) 2023-2024 Xavier R.M. <sapphirus@azorium.net>
 * SPDX-License-Identifier: GPL-3.0-only
 *
 * This library is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, version 3.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Local user preferences, loaded once from `<config-dir>/sbx.yml` and cached for the
//! lifetime of the process.

use std::{fs::File, io::Write, sync::OnceLock};

use serde::{Deserialize, Serialize};

use crate::{constants::CONFIG_FILE, err, impl_error, Error, ErrorGeneric, Result};

static CONFIG: OnceLock<Configuration> = OnceLock::new();

#[derive(Debug)]
pub enum ConfigError {
    Load(String, String),
    Save(String, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, fmter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load(path, detail) => write!(fmter, "Failed to load configuration '{path}': {detail}"),
            Self::Save(path, detail) => write!(fmter, "Failed to save configuration '{path}': {detail}"),
        }
    }
}

impl_error!(ConfigError);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Default for Verbosity {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    verbosity: Verbosity,
    #[serde(default)]
    dry_run_default: bool,
    #[serde(default)]
    allow_devel_default: bool,
    #[serde(default = "default_monitor_dir")]
    monitor_dir: Option<String>,
}

fn default_monitor_dir() -> Option<String> {
    None
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::default(),
            dry_run_default: false,
            allow_devel_default: false,
            monitor_dir: None,
        }
    }
}

impl Configuration {
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn dry_run_default(&self) -> bool {
        self.dry_run_default
    }

    pub fn allow_devel_default(&self) -> bool {
        self.allow_devel_default
    }

    pub fn monitor_dir(&self) -> Option<&str> {
        self.monitor_dir.as_deref()
    }

    pub fn save(&self) -> Result<()> {
        let mut file = File::create(*CONFIG_FILE).prepend_io(|| CONFIG_FILE.to_string())?;
        let rendered = match serde_yaml::to_string(self) {
            Ok(rendered) => rendered,
            Err(e) => return err!(ConfigError::Save(CONFIG_FILE.to_string(), e.to_string())),
        };

        write!(file, "{rendered}").prepend_io(|| CONFIG_FILE.to_string())
    }
}

/// Returns the process-wide configuration, loading it from disk on first access and
/// falling back to defaults when no config file exists yet.
pub fn config() -> &'static Configuration {
    CONFIG.get_or_init(|| load().unwrap_or_default())
}

fn load() -> Result<Configuration> {
    let file = match File::open(*CONFIG_FILE) {
        Ok(file) => file,
        Err(_) => return Ok(Configuration::default()),
    };

    match serde_yaml::from_reader(file) {
        Ok(config) => Ok(config),
        Err(e) => err!(ConfigError::Load(CONFIG_FILE.to_string(), e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_quiet_and_non_devel() {
        let config = Configuration::default();
        assert_eq!(config.verbosity(), Verbosity::Normal);
        assert!(!config.allow_devel_default());
    }
}
