// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! This is Tokenkey
//!
//! Management of asymmetric keys that live on PKCS#11 hardware tokens:
//! storing keys on a card, generating keys on it, finding the card
//! again later and keeping a persistent descriptor of each key.

/// PKCS#11 types and constants
pub mod pkcs11 {
    #![allow(non_upper_case_globals)]
    #![allow(non_camel_case_types)]
    #![allow(non_snake_case)]
    pub use cryptoki_sys::*;
}

pub mod attribute;
pub mod backend;
pub mod codec;
pub mod config;
pub mod ecc;
pub mod error;
pub mod kasn1;
pub mod key;
pub mod keygen;
pub mod lifecycle;
pub mod locator;
pub mod mechanism;
pub mod record;
pub mod session;
pub mod store;
pub mod token;
pub mod ui;

#[cfg(feature = "trace")]
pub mod log;

pub use error::{Error, ErrorKind, Result};
pub use record::{CardFingerprint, TokenKeyRecord};
pub use token::TokenEnvironment;

#[cfg(test)]
mod tests;
