// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Implementations of [crate::token::TokenBackend]

pub mod memory;

#[cfg(feature = "cryptoki")]
pub mod cryptoki;
