// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! This module defines the [TokenKeyRecord], the persisted descriptor
//! that lets an application find a token backed key again, and its
//! versioned binary layout.
//!
//! The layout is a sequence of big-endian u32 length prefixed UTF-8
//! strings (serial, manufacturer, label, slot label, model, hex object
//! id), a big-endian u32 count followed by that many big-endian u32
//! mechanism codes, and the DER SubjectPublicKeyInfo of the public key.
//! No trailing bytes are allowed.

use crate::attribute::{Attribute, AttributeKind, AttributeTemplate};
use crate::codec;
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::key::{AsymmetricKeyMaterial, PublicKey};
use crate::mechanism::{self, Digest};
use crate::pkcs11::*;

/// The current record layout version
pub const RECORD_VERSION: u32 = 2;

/// Identifies a physical card independently of the slot it sits in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardFingerprint {
    pub manufacturer: String,
    pub model: String,
    pub label: String,
    pub serial: String,
}

impl CardFingerprint {
    /// Two cards match iff label and serial are equal, manufacturer and
    /// model are descriptive only
    pub fn matches(&self, other: &CardFingerprint) -> bool {
        self.label == other.label && self.serial == other.serial
    }

    /// The text shown when asking the user to insert this card
    pub fn insert_prompt(&self) -> String {
        format!(
            "Please insert card: {} {} [{}] with Serial: {}",
            self.manufacturer, self.model, self.label, self.serial
        )
    }
}

/// The persisted descriptor of a token backed key
#[derive(Debug, Clone, PartialEq)]
pub struct TokenKeyRecord {
    pub(crate) fingerprint: CardFingerprint,
    pub(crate) slot_label: String,
    pub(crate) object_id: Vec<u8>,
    pub(crate) mechanisms: Vec<CK_MECHANISM_TYPE>,
    pub(crate) public_key: PublicKey,
}

impl TokenKeyRecord {
    pub fn new(
        fingerprint: CardFingerprint,
        slot_label: String,
        object_id: Vec<u8>,
        public_key: PublicKey,
    ) -> TokenKeyRecord {
        TokenKeyRecord {
            fingerprint: fingerprint,
            slot_label: slot_label,
            object_id: object_id,
            mechanisms: Vec::new(),
            public_key: public_key,
        }
    }

    pub fn fingerprint(&self) -> &CardFingerprint {
        &self.fingerprint
    }

    /// Human readable name of the key
    pub fn slot_label(&self) -> &str {
        &self.slot_label
    }

    pub fn object_id(&self) -> &[u8] {
        &self.object_id
    }

    /// The object id as stored, upper case hex
    pub fn object_id_hex(&self) -> String {
        hex::encode_upper(&self.object_id)
    }

    pub fn mechanisms(&self) -> &[CK_MECHANISM_TYPE] {
        &self.mechanisms
    }

    /// Replaces the supported mechanisms, keeping the first occurrence
    /// of any duplicate
    pub fn set_mechanisms(&mut self, mechanisms: &[CK_MECHANISM_TYPE]) {
        self.mechanisms.clear();
        for m in mechanisms {
            if !self.mechanisms.contains(m) {
                self.mechanisms.push(*m);
            }
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The CKA_ID attribute of the key objects
    pub fn id_attribute(&self) -> Attribute {
        Attribute::from_bytes(AttributeKind::Id, self.object_id.clone())
    }

    /// The template identifying the object of the given class that
    /// holds this key: class, key type, public fields and object id
    pub fn identity_template(
        &self,
        class: CK_OBJECT_CLASS,
    ) -> AttributeTemplate {
        let material = AsymmetricKeyMaterial::from(self.public_key.clone());
        let mut tmpl = codec::identity_template(&material, class);
        if !self.object_id.is_empty() {
            tmpl.set(self.id_attribute());
        }
        tmpl
    }

    /// Short description of the key type
    pub fn type_string(&self) -> String {
        format!("Token {}", self.public_key.family())
    }

    /// Whether any descriptive field contains the pattern, ignoring case
    pub fn matches_filter(&self, pattern: &str) -> bool {
        let pattern = pattern.to_lowercase();
        [
            &self.fingerprint.serial,
            &self.fingerprint.manufacturer,
            &self.fingerprint.model,
            &self.fingerprint.label,
            &self.slot_label,
            &self.object_id_hex(),
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&pattern))
    }

    /// Digests that can be used to sign with this key
    pub fn possible_digests(&self, config: &Config) -> Vec<Digest> {
        mechanism::possible_digests(
            self.public_key.family(),
            &self.mechanisms,
            config.only_token_hashes,
        )
    }

    /// The digest to use when the caller has no preference
    pub fn default_digest(&self) -> Digest {
        mechanism::default_digest(&self.mechanisms)
    }

    /// Serializes the record with the current layout version
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.encode_version(RECORD_VERSION)
    }

    /// Serializes the record with a specific layout version
    ///
    /// Version 1 had no model, an empty string is written in its place
    pub fn encode_version(&self, version: u32) -> Result<Vec<u8>> {
        if version == 0 || version > RECORD_VERSION {
            return Err(Error::with_msg(
                ErrorKind::IntegrityError,
                format!("unknown record version {}", version),
            ));
        }
        let mut w = Writer::default();
        w.put_string(&self.fingerprint.serial)?;
        w.put_string(&self.fingerprint.manufacturer)?;
        w.put_string(&self.fingerprint.label)?;
        w.put_string(&self.slot_label)?;
        if version < 2 {
            w.put_string("")?;
        } else {
            w.put_string(&self.fingerprint.model)?;
        }
        w.put_string(&self.object_id_hex())?;
        w.put_u32(u32::try_from(self.mechanisms.len())?);
        for m in &self.mechanisms {
            w.put_u32(u32::try_from(*m)?);
        }
        w.data.extend_from_slice(&self.public_key.to_der()?);
        Ok(w.data)
    }

    /// Parses a record serialized with the given layout version
    ///
    /// Any byte left after the public key is an
    /// [ErrorKind::IntegrityError]. Version 1 records always decode
    /// with an empty model.
    pub fn decode(data: &[u8], version: u32) -> Result<TokenKeyRecord> {
        if version == 0 || version > RECORD_VERSION {
            return Err(Error::with_msg(
                ErrorKind::IntegrityError,
                format!("unknown record version {}", version),
            ));
        }
        let mut r = Reader::new(data);
        let serial = r.get_string()?;
        let manufacturer = r.get_string()?;
        let label = r.get_string()?;
        let slot_label = r.get_string()?;
        let mut model = r.get_string()?;
        if version < 2 {
            model.clear();
        }
        let object_id = hex::decode(r.get_string()?)
            .map_err(|e| Error::with_origin(ErrorKind::IntegrityError, e))?;
        let count = r.get_u32()?;
        let mut mechanisms = Vec::new();
        for _ in 0..count {
            mechanisms.push(CK_MECHANISM_TYPE::from(r.get_u32()?));
        }
        let public_key = PublicKey::from_der(r.rest())?;
        Ok(TokenKeyRecord {
            fingerprint: CardFingerprint {
                manufacturer: manufacturer,
                model: model,
                label: label,
                serial: serial,
            },
            slot_label: slot_label,
            object_id: object_id,
            mechanisms: mechanisms,
            public_key: public_key,
        })
    }
}

#[derive(Default)]
struct Writer {
    data: Vec<u8>,
}

impl Writer {
    fn put_u32(&mut self, val: u32) {
        self.data.extend_from_slice(&val.to_be_bytes());
    }

    fn put_string(&mut self, s: &str) -> Result<()> {
        self.put_u32(u32::try_from(s.len())?);
        self.data.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Reader<'a> {
        Reader { data: data }
    }

    fn truncated() -> Error {
        Error::with_msg(ErrorKind::IntegrityError, "truncated record")
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.data.len() < len {
            return Err(Self::truncated());
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn get_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn get_string(&mut self) -> Result<String> {
        let len = usize::try_from(self.get_u32()?)?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::with_origin(ErrorKind::IntegrityError, e))
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.data)
    }
}
