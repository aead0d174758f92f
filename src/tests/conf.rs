// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use std::env;
use std::str::FromStr;

use super::*;

use crate::config::*;

use serial_test::{parallel, serial};

const TESTDIR: &str = "test";

fn write_conf(path: &str, content: &str) {
    if let Some(dir) = std::path::Path::new(path).parent() {
        ret_or_panic!(std::fs::create_dir_all(dir));
    }
    ret_or_panic!(std::fs::write(path, content));
}

#[test]
#[parallel]
fn test_config_parse() {
    let conf = ret_or_panic!(Config::from_str(
        r#"
only_token_hashes = true
keygen_poll_ms = 50

[[modules]]
path = "/usr/lib64/pkcs11/opensc-pkcs11.so"
description = "OpenSC"

[[modules]]
path = "/usr/lib64/pkcs11/libsofthsm2.so"
"#
    ));
    assert!(conf.only_token_hashes);
    assert_eq!(conf.keygen_poll_interval().as_millis(), 50);
    assert_eq!(conf.modules.len(), 2);
    assert_eq!(conf.modules[0].description.as_deref(), Some("OpenSC"));
    assert!(conf.modules[1].description.is_none());
}

#[test]
#[parallel]
fn test_config_defaults() {
    let conf = ret_or_panic!(Config::from_str(""));
    assert_eq!(conf, Config::default());
    assert!(!conf.only_token_hashes);
    assert_eq!(conf.keygen_poll_ms, 20);
    assert!(conf.modules.is_empty());

    assert_eq!(
        err_kind!(Config::from_str("only_token_hashes = \"maybe\"")),
        ErrorKind::Config
    );
    assert_eq!(
        err_kind!(Config::from_file("test/no/such/file.conf")),
        ErrorKind::Config
    );
}

#[test]
#[parallel]
fn test_config_add_module() {
    let mut conf = Config::new();
    let module = Module {
        path: String::from("/usr/lib/pkcs11/p11-kit-proxy.so"),
        description: None,
    };
    ret_or_panic!(conf.add_module(module.clone()));
    assert_eq!(err_kind!(conf.add_module(module)), ErrorKind::Config);
    assert_eq!(conf.modules.len(), 1);
}

#[test]
#[serial]
fn test_config_env_override() {
    let confname = format!("{}/conf_env_override.conf", TESTDIR);
    write_conf(&confname, "keygen_poll_ms = 7\n");

    unsafe { env::set_var("TOKENKEY_CONF", &confname) };
    let found = Config::find_conf();
    let loaded = Config::load();
    unsafe { env::remove_var("TOKENKEY_CONF") };

    assert_eq!(ret_or_panic!(found), confname);
    assert_eq!(ret_or_panic!(loaded).keygen_poll_ms, 7);
}

#[test]
#[serial]
fn test_config_xdg_dir() {
    let basedir = format!("{}/xdgconftest", TESTDIR);
    let confname = format!("{}/tokenkey/{}", basedir, DEFAULT_CONF_NAME);
    write_conf(&confname, "only_token_hashes = true\n");

    let saved = env::var("XDG_CONFIG_HOME").ok();
    unsafe {
        env::remove_var("TOKENKEY_CONF");
        env::set_var("XDG_CONFIG_HOME", &basedir);
    }
    let found = Config::find_conf();
    let loaded = Config::load();

    /* no file in the config dir means defaults */
    let emptydir = format!("{}/xdgempty", TESTDIR);
    unsafe { env::set_var("XDG_CONFIG_HOME", &emptydir) };
    let missing = Config::find_conf();
    let defaults = Config::load();

    unsafe {
        match saved {
            Some(v) => env::set_var("XDG_CONFIG_HOME", v),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
    }

    assert_eq!(ret_or_panic!(found), confname);
    assert!(ret_or_panic!(loaded).only_token_hashes);
    assert_eq!(err_kind!(missing), ErrorKind::Config);
    assert_eq!(ret_or_panic!(defaults), Config::default());
}
