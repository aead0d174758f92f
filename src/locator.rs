// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Locating the physical card that holds a key.
//!
//! [CardLocator] is a small state machine that repeatedly enumerates the
//! inserted tokens looking for a card fingerprint and asks the user to
//! insert the card when it is not found. Retry is entirely user driven,
//! there is no timeout.

use crate::attribute::{Attribute, AttributeKind, AttributeTemplate};
use crate::codec;
use crate::error::{Error, ErrorKind, Result};
use crate::pkcs11::*;
use crate::record::{CardFingerprint, TokenKeyRecord};
use crate::session::SlotId;
use crate::store::ObjectStore;
use crate::token::{TokenBackend, TokenEnvironment};
use crate::ui::UserInteraction;

/// State of the card search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorState {
    Searching,
    Found(SlotId),
    Cancelled,
}

/// Finds the slot holding a card
#[derive(Debug)]
pub struct CardLocator<'a> {
    fingerprint: &'a CardFingerprint,
    state: LocatorState,
    attempts: usize,
}

impl<'a> CardLocator<'a> {
    pub fn new(fingerprint: &'a CardFingerprint) -> CardLocator<'a> {
        CardLocator {
            fingerprint: fingerprint,
            state: LocatorState::Searching,
            attempts: 0,
        }
    }

    pub fn state(&self) -> LocatorState {
        self.state
    }

    /// Number of enumerations performed so far
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Performs one enumeration of the inserted tokens
    ///
    /// When the card is not found the user is asked to insert it, a
    /// negative answer cancels the search. Terminal states are returned
    /// unchanged.
    pub fn step(
        &mut self,
        backend: &dyn TokenBackend,
        ui: &mut dyn UserInteraction,
    ) -> Result<LocatorState> {
        if self.state != LocatorState::Searching {
            return Ok(self.state);
        }
        self.attempts += 1;
        let tokens = backend.list_inserted_tokens()?;
        for (slot, fp) in &tokens {
            if fp.matches(self.fingerprint) {
                log::debug!(
                    "Card {} found in slot {} after {} attempt(s)",
                    self.fingerprint.label,
                    slot,
                    self.attempts
                );
                self.state = LocatorState::Found(*slot);
                return Ok(self.state);
            }
        }
        if !ui.confirm(&self.fingerprint.insert_prompt()) {
            log::debug!("Card search cancelled by the user");
            self.state = LocatorState::Cancelled;
        }
        Ok(self.state)
    }

    /// Steps until the card is found or the user cancels
    ///
    /// Cancellation is reported as [ErrorKind::CardNotPresent]
    pub fn run(
        &mut self,
        env: &TokenEnvironment,
        ui: &mut dyn UserInteraction,
    ) -> Result<SlotId> {
        let backend = env.backend()?;
        loop {
            match self.step(backend, ui)? {
                LocatorState::Searching => continue,
                LocatorState::Found(slot) => return Ok(slot),
                LocatorState::Cancelled => {
                    return Err(Error::with_msg(
                        ErrorKind::CardNotPresent,
                        format!(
                            "card {} with serial {} not inserted",
                            self.fingerprint.label, self.fingerprint.serial
                        ),
                    ))
                }
            }
        }
    }
}

/// Checks that the card in `slot` holds the public key of the record
///
/// Every public key object carrying the record's object id is decoded
/// and compared with the embedded public key. A candidate that decodes
/// but does not match triggers a warning to the user and the scan goes
/// on. Returns true iff at least one candidate matches.
pub fn verify_public_key(
    env: &TokenEnvironment,
    slot: SlotId,
    record: &TokenKeyRecord,
    ui: &mut dyn UserInteraction,
) -> Result<bool> {
    let mut session = env.open_session(slot, false)?;
    let mut store = ObjectStore::new(session.as_mut());
    let filter = AttributeTemplate::new()
        .with(Attribute::from_ulong(AttributeKind::Class, CKO_PUBLIC_KEY))
        .with(record.id_attribute());
    let mut found = false;
    for handle in store.find(&filter)? {
        let attrs = store
            .session()
            .get_attributes(handle, &codec::PUBLIC_KEY_ATTRIBUTES)?;
        let material = match codec::decode_public_key(&attrs) {
            Ok(m) => m,
            Err(e) => {
                log::debug!("Skipping undecodable object {}: {}", handle, e);
                continue;
            }
        };
        if material.public_key() == *record.public_key() {
            found = true;
        } else {
            log::warn!("Public key mismatch on object {}", handle);
            if !record.object_id().is_empty() {
                ui.notify("Public Key mismatch. Please re-import card");
            }
        }
    }
    Ok(found)
}

/// Locates the card holding the record's key, optionally verifying that
/// it still holds the same public key
///
/// Fails with [ErrorKind::CardNotPresent] if the user gives up, and with
/// [ErrorKind::ObjectNotFound] if verification finds no matching key
pub fn prepare_card(
    env: &TokenEnvironment,
    record: &TokenKeyRecord,
    verify: bool,
    ui: &mut dyn UserInteraction,
) -> Result<SlotId> {
    let slot = CardLocator::new(record.fingerprint()).run(env, ui)?;
    if verify && !verify_public_key(env, slot, record, ui)? {
        return Err(Error::with_msg(
            ErrorKind::ObjectNotFound,
            "no object on the card matches the public key",
        ));
    }
    Ok(slot)
}
