// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! This module defines the [TokenSession] trait, the narrow set of
//! PKCS#11 operations the key management code needs from an open session
//! on a token, independent of the library used to reach the token.

use std::fmt::Debug;

use crate::attribute::{Attribute, AttributeKind, AttributeTemplate};
use crate::error::Result;
use crate::pkcs11::*;
use crate::record::CardFingerprint;

/// Identifies a slot in the token environment
pub type SlotId = CK_SLOT_ID;

/// Identifies an object within an open session
pub type ObjectHandle = CK_OBJECT_HANDLE;

/// Descriptive information about the token inserted in a slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenInfo {
    pub label: String,
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
}

impl TokenInfo {
    /// Returns the fingerprint identifying this physical card
    pub fn fingerprint(&self) -> CardFingerprint {
        CardFingerprint {
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            label: self.label.clone(),
            serial: self.serial.clone(),
        }
    }
}

/// A key pair generation request as issued to the token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairRequest {
    /// Label assigned to both generated objects
    pub label: String,
    /// The key pair generation mechanism
    pub mechanism: CK_MECHANISM_TYPE,
    /// Modulus or prime size, ignored for EC keys
    pub bits: CK_ULONG,
    /// DER encoded curve parameters, EC keys only
    pub ec_params: Option<Vec<u8>>,
    /// CKA_ID assigned to both generated objects
    pub id: Vec<u8>,
}

/// An open session on a token
///
/// Object searches only return private objects once the session is
/// logged in, and creating or destroying objects requires a read-write
/// session, matching PKCS#11 semantics.
pub trait TokenSession: Debug + Send {
    /// The slot the session was opened on
    fn slot(&self) -> SlotId;

    /// Information about the token this session is open on
    fn token_info(&self) -> Result<TokenInfo>;

    /// The mechanisms supported by the token
    fn mechanism_list(&self) -> Result<Vec<CK_MECHANISM_TYPE>>;

    /// Whether the session was opened read-write
    fn is_read_write(&self) -> bool;

    /// Whether a user is logged in on this session
    fn is_logged_in(&self) -> bool;

    /// Logs in as the normal user or, if `is_admin` is set, as the
    /// security officer
    ///
    /// Returns Ok(false) when the token rejected the PIN
    fn login(&mut self, pin: &[u8], is_admin: bool) -> Result<bool>;

    /// Returns the handles of all objects matching the template
    fn find_objects(
        &mut self,
        template: &AttributeTemplate,
    ) -> Result<Vec<ObjectHandle>>;

    /// Creates an object from the template
    fn create_object(
        &mut self,
        template: &AttributeTemplate,
    ) -> Result<ObjectHandle>;

    /// Destroys an object
    fn destroy_object(&mut self, handle: ObjectHandle) -> Result<()>;

    /// Changes the value of one attribute of an object
    fn set_attribute(
        &mut self,
        handle: ObjectHandle,
        attr: &Attribute,
    ) -> Result<()>;

    /// Reads the requested attributes of an object
    ///
    /// Attributes the object does not have, or that the token refuses
    /// to reveal, are omitted from the result
    fn get_attributes(
        &mut self,
        handle: ObjectHandle,
        kinds: &[AttributeKind],
    ) -> Result<AttributeTemplate>;

    /// Mixes fresh host entropy into the token random generator
    fn randomize(&mut self) -> Result<()>;

    /// Generates a key pair on the token, labelled and identified as
    /// the request says, and returns the CKA_ID shared by the two new
    /// objects
    fn generate_key_pair(&mut self, request: &KeyPairRequest)
        -> Result<Vec<u8>>;

    /// Changes the PIN of the logged in user
    fn set_pin(&mut self, old_pin: &[u8], new_pin: &[u8]) -> Result<()>;

    /// Initializes the normal user PIN, requires a security officer login
    fn init_pin(&mut self, pin: &[u8]) -> Result<()>;
}
