// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Tracing for applications built on the crate, configured from the
//! environment.
//!
//! `TOKENKEY_TRACE` names the destination, either `stdout` or a file to
//! create. `TOKENKEY_TRACE_LEVEL` sets the verbosity.

use std::env;
use std::fs::File;

use simplelog::{Config, LevelFilter, SimpleLogger, WriteLogger};

const TRACE_VAR: &str = "TOKENKEY_TRACE";
const LEVEL_VAR: &str = "TOKENKEY_TRACE_LEVEL";

/// Maps a level name to a filter, error when unset and trace for any
/// unknown name
fn trace_level(name: Option<&str>) -> LevelFilter {
    match name {
        None => LevelFilter::Error,
        Some("off") => LevelFilter::Off,
        Some("error") => LevelFilter::Error,
        Some("warn") => LevelFilter::Warn,
        Some("info") => LevelFilter::Info,
        Some("debug") => LevelFilter::Debug,
        Some(_) => LevelFilter::Trace,
    }
}

/// Installs the global logger described by the environment
///
/// Returns true if tracing is enabled. Nothing is installed when
/// `TOKENKEY_TRACE` is unset, when the trace file can't be created or
/// when another logger is already in place.
pub fn tokenkey_log_init() -> bool {
    let dest = match env::var(TRACE_VAR) {
        Ok(d) => d,
        Err(_) => return false,
    };
    let level = trace_level(env::var(LEVEL_VAR).ok().as_deref());
    let installed = if dest == "stdout" {
        SimpleLogger::init(level, Config::default())
    } else {
        match File::create(&dest) {
            Ok(file) => WriteLogger::init(level, Config::default(), file),
            Err(_) => return false,
        }
    };
    installed.is_ok()
}
