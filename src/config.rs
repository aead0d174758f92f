// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Configuration file handling

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};

use serde::{Deserialize, Serialize};

#[cfg(not(test))]
const DEFAULT_CONF_DIR: &str = {
    match option_env!("CONFDIR") {
        Some(p) => p,
        None => "/usr/local/etc",
    }
};
#[cfg(test)]
const DEFAULT_CONF_DIR: &str = "test";

pub const DEFAULT_CONF_NAME: &str = "tokenkey.conf";

const DEFAULT_KEYGEN_POLL_MS: u64 = 20;

fn default_keygen_poll_ms() -> u64 {
    DEFAULT_KEYGEN_POLL_MS
}

/// A PKCS#11 library the backend may load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub path: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub modules: Vec<Module>,
    /// Restrict signature digests to those the token implements
    #[serde(default)]
    pub only_token_hashes: bool,
    /// Interval between progress callbacks during key generation
    #[serde(default = "default_keygen_poll_ms")]
    pub keygen_poll_ms: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            modules: Vec::new(),
            only_token_hashes: false,
            keygen_poll_ms: DEFAULT_KEYGEN_POLL_MS,
        }
    }
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn find_conf() -> Result<String> {
        /* First check for our own env var,
         * this has the highest precedence */
        if let Ok(var) = env::var("TOKENKEY_CONF") {
            return Ok(var);
        }
        /* Freedesktop specification for config dirs first
         * then fallback to use $HOME/.config, if that is also not
         * available see if we have access to a system config */
        let conffile = match env::var("XDG_CONFIG_HOME") {
            Ok(xdg) => format!("{}/tokenkey/{}", xdg, DEFAULT_CONF_NAME),
            Err(_) => match env::var("HOME") {
                Ok(home) => {
                    format!("{}/.config/tokenkey/{}", home, DEFAULT_CONF_NAME)
                }
                Err(_) => format!(
                    "{}/tokenkey/{}",
                    DEFAULT_CONF_DIR, DEFAULT_CONF_NAME
                ),
            },
        };
        if Path::new(&conffile).is_file() {
            Ok(conffile)
        } else {
            Err(Error::with_msg(
                ErrorKind::Config,
                format!("configuration file {} not found", conffile),
            ))
        }
    }

    pub fn from_file(filename: &str) -> Result<Config> {
        let config_str = fs::read_to_string(filename)?;
        Config::from_str(&config_str)
    }

    /// Loads the configuration file if one is found, the defaults
    /// otherwise
    pub fn load() -> Result<Config> {
        match Config::find_conf() {
            Ok(filename) => Config::from_file(&filename),
            Err(e) if e.is(ErrorKind::Config) => Ok(Config::default()),
            Err(e) => Err(e),
        }
    }

    pub fn add_module(&mut self, module: Module) -> Result<()> {
        if self.modules.iter().any(|m| m.path == module.path) {
            return Err(Error::with_msg(
                ErrorKind::Config,
                format!("module {} already configured", module.path),
            ));
        }
        self.modules.push(module);
        Ok(())
    }

    pub fn keygen_poll_interval(&self) -> Duration {
        Duration::from_millis(self.keygen_poll_ms)
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Config> {
        Ok(toml::from_str(s)?)
    }
}
