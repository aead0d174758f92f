// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! This module defines the [TokenBackend] capability, the access point to
//! a token library, and the [TokenEnvironment] handle that owns the
//! loaded backend for the lifetime of the application.

use std::fmt::Debug;

use crate::error::{Error, ErrorKind, Result};
use crate::record::CardFingerprint;
use crate::session::{SlotId, TokenSession};

/// A loaded token library
pub trait TokenBackend: Debug + Send + Sync {
    /// Enumerates the slots that currently have a token inserted
    fn list_inserted_tokens(&self) -> Result<Vec<(SlotId, CardFingerprint)>>;

    /// Opens a session on the token in `slot`
    fn open_session(
        &self,
        slot: SlotId,
        read_write: bool,
    ) -> Result<Box<dyn TokenSession>>;
}

/// Explicit handle on the token library state
///
/// Card location and every key lifecycle operation take the environment
/// as an argument. Operations fail with [ErrorKind::NotLoaded] while no
/// backend is loaded.
#[derive(Debug, Default)]
pub struct TokenEnvironment {
    backend: Option<Box<dyn TokenBackend>>,
}

impl TokenEnvironment {
    /// Creates an environment with nothing loaded
    pub fn new() -> TokenEnvironment {
        TokenEnvironment { backend: None }
    }

    /// Loads a backend, replacing any previously loaded one
    pub fn init(&mut self, backend: Box<dyn TokenBackend>) {
        if self.backend.is_some() {
            log::debug!("Replacing loaded token backend");
        }
        self.backend = Some(backend);
    }

    /// Creates an environment with the backend already loaded
    pub fn with_backend(backend: Box<dyn TokenBackend>) -> TokenEnvironment {
        TokenEnvironment {
            backend: Some(backend),
        }
    }

    /// Unloads the backend
    pub fn shutdown(&mut self) {
        self.backend = None;
    }

    /// Whether a backend is loaded
    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }

    /// Returns the loaded backend
    pub fn backend(&self) -> Result<&dyn TokenBackend> {
        match &self.backend {
            Some(b) => Ok(b.as_ref()),
            None => Err(Error::new(ErrorKind::NotLoaded)),
        }
    }

    /// Convenience wrapper to open a session through the loaded backend
    pub fn open_session(
        &self,
        slot: SlotId,
        read_write: bool,
    ) -> Result<Box<dyn TokenSession>> {
        self.backend()?.open_session(slot, read_write)
    }
}
