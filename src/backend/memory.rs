// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! An in-memory token backend.
//!
//! Cards are plain object stores with PIN checks that can be inserted
//! into and removed from slots at runtime. Key generation fills the key
//! components with random data, the resulting keys are structurally
//! valid but not usable for actual cryptography.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::attribute::{Attribute, AttributeKind, AttributeTemplate};
use crate::codec;
use crate::ecc;
use crate::error::{Error, ErrorKind, Result};
use crate::pkcs11::*;
use crate::record::CardFingerprint;
use crate::session::{
    KeyPairRequest, ObjectHandle, SlotId, TokenInfo, TokenSession,
};
use crate::token::TokenBackend;

use constant_time_eq::constant_time_eq;
use num_bigint::BigUint;
use zeroize::Zeroize;

const DEFAULT_MECHANISMS: [CK_MECHANISM_TYPE; 8] = [
    CKM_RSA_PKCS_KEY_PAIR_GEN,
    CKM_RSA_PKCS,
    CKM_SHA1_RSA_PKCS,
    CKM_SHA256_RSA_PKCS,
    CKM_EC_KEY_PAIR_GEN,
    CKM_ECDSA,
    CKM_ECDSA_SHA1,
    CKM_DSA_KEY_PAIR_GEN,
];

#[derive(Debug)]
struct MemoryObject {
    attrs: AttributeTemplate,
    destroyable: bool,
}

impl MemoryObject {
    fn class(&self) -> CK_OBJECT_CLASS {
        self.attrs
            .get_ulong(AttributeKind::Class)
            .unwrap_or(CK_UNAVAILABLE_INFORMATION)
    }

    fn is_private(&self) -> bool {
        self.attrs.get_bool(AttributeKind::Private).unwrap_or(false)
    }

    /// Private key values are never revealed
    fn hides(&self, kind: AttributeKind) -> bool {
        self.class() == CKO_PRIVATE_KEY
            && (kind.is_sensitive() || kind == AttributeKind::Value)
    }
}

#[derive(Debug)]
struct MemoryToken {
    info: TokenInfo,
    user_pin: Vec<u8>,
    so_pin: Vec<u8>,
    mechanisms: Vec<CK_MECHANISM_TYPE>,
    objects: BTreeMap<ObjectHandle, MemoryObject>,
    next_handle: ObjectHandle,
    rejected_classes: Vec<CK_OBJECT_CLASS>,
    keygen_delay: Duration,
}

impl Drop for MemoryToken {
    fn drop(&mut self) {
        self.user_pin.zeroize();
        self.so_pin.zeroize();
    }
}

impl MemoryToken {
    fn add_object(&mut self, attrs: AttributeTemplate) -> ObjectHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.objects.insert(
            handle,
            MemoryObject {
                attrs: attrs,
                destroyable: true,
            },
        );
        handle
    }

    fn visible(
        &self,
        handle: ObjectHandle,
        logged_in: bool,
    ) -> Result<&MemoryObject> {
        match self.objects.get(&handle) {
            Some(o) if logged_in || !o.is_private() => Ok(o),
            _ => Err(Error::ck_rv(CKR_OBJECT_HANDLE_INVALID)),
        }
    }

    fn search(
        &self,
        filter: &AttributeTemplate,
        logged_in: bool,
    ) -> Vec<ObjectHandle> {
        self.objects
            .iter()
            .filter(|(_, o)| logged_in || !o.is_private())
            .filter(|(_, o)| o.attrs.matches(filter))
            .map(|(h, _)| *h)
            .collect()
    }
}

/// A simulated smart card
///
/// Clones share the same card, so a test can keep a handle on a card
/// that is inserted in a [MemoryBackend].
#[derive(Debug, Clone)]
pub struct MemoryCard {
    token: Arc<Mutex<MemoryToken>>,
}

impl MemoryCard {
    /// Creates a card with the given label, serial number and user PIN
    pub fn new(label: &str, serial: &str, user_pin: &str) -> MemoryCard {
        MemoryCard {
            token: Arc::new(Mutex::new(MemoryToken {
                info: TokenInfo {
                    label: label.to_string(),
                    manufacturer: String::from("Tokenkey"),
                    model: String::from("Memory Card"),
                    serial: serial.to_string(),
                },
                user_pin: user_pin.as_bytes().to_vec(),
                so_pin: user_pin.as_bytes().to_vec(),
                mechanisms: DEFAULT_MECHANISMS.to_vec(),
                objects: BTreeMap::new(),
                next_handle: 1,
                rejected_classes: Vec::new(),
                keygen_delay: Duration::ZERO,
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryToken>> {
        self.token.lock().map_err(|_| {
            Error::with_msg(ErrorKind::Token, "memory card state poisoned")
        })
    }

    /// Sets the descriptive manufacturer and model strings
    pub fn set_description(
        &self,
        manufacturer: &str,
        model: &str,
    ) -> Result<()> {
        let mut token = self.lock()?;
        token.info.manufacturer = manufacturer.to_string();
        token.info.model = model.to_string();
        Ok(())
    }

    pub fn set_so_pin(&self, pin: &str) -> Result<()> {
        let mut token = self.lock()?;
        token.so_pin.zeroize();
        token.so_pin = pin.as_bytes().to_vec();
        Ok(())
    }

    pub fn set_mechanisms(
        &self,
        mechanisms: &[CK_MECHANISM_TYPE],
    ) -> Result<()> {
        self.lock()?.mechanisms = mechanisms.to_vec();
        Ok(())
    }

    /// Makes key pair generation take at least `delay`
    pub fn set_keygen_delay(&self, delay: Duration) -> Result<()> {
        self.lock()?.keygen_delay = delay;
        Ok(())
    }

    /// Makes the card refuse to create objects of `class`
    pub fn reject_class(&self, class: CK_OBJECT_CLASS) -> Result<()> {
        self.lock()?.rejected_classes.push(class);
        Ok(())
    }

    /// Makes an object impossible to destroy
    pub fn protect(&self, handle: ObjectHandle) -> Result<()> {
        match self.lock()?.objects.get_mut(&handle) {
            Some(o) => {
                o.destroyable = false;
                Ok(())
            }
            None => Err(Error::ck_rv(CKR_OBJECT_HANDLE_INVALID)),
        }
    }

    pub fn info(&self) -> Result<TokenInfo> {
        Ok(self.lock()?.info.clone())
    }

    pub fn fingerprint(&self) -> Result<CardFingerprint> {
        Ok(self.info()?.fingerprint())
    }

    /// Stores an object directly, bypassing session and PIN checks
    pub fn put_object(&self, attrs: AttributeTemplate) -> Result<ObjectHandle> {
        Ok(self.lock()?.add_object(attrs))
    }

    /// Returns every object matching the filter, private ones included
    pub fn find(
        &self,
        filter: &AttributeTemplate,
    ) -> Result<Vec<ObjectHandle>> {
        Ok(self.lock()?.search(filter, true))
    }

    /// Returns a copy of all the attributes of an object
    pub fn attributes(
        &self,
        handle: ObjectHandle,
    ) -> Result<AttributeTemplate> {
        match self.lock()?.objects.get(&handle) {
            Some(o) => Ok(o.attrs.clone()),
            None => Err(Error::ck_rv(CKR_OBJECT_HANDLE_INVALID)),
        }
    }

    pub fn object_count(&self) -> Result<usize> {
        Ok(self.lock()?.objects.len())
    }
}

/// A set of slots that hold [MemoryCard]s
///
/// Clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    slots: Arc<Mutex<BTreeMap<SlotId, Option<MemoryCard>>>>,
}

impl MemoryBackend {
    pub fn new() -> MemoryBackend {
        MemoryBackend::default()
    }

    fn lock(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<SlotId, Option<MemoryCard>>>> {
        self.slots.lock().map_err(|_| {
            Error::with_msg(ErrorKind::Token, "memory slots state poisoned")
        })
    }

    /// Adds an empty slot
    pub fn add_slot(&self, slot: SlotId) -> Result<()> {
        self.lock()?.entry(slot).or_insert(None);
        Ok(())
    }

    /// Inserts a card, creating the slot if needed
    pub fn insert(&self, slot: SlotId, card: MemoryCard) -> Result<()> {
        let mut slots = self.lock()?;
        let entry = slots.entry(slot).or_insert(None);
        if entry.is_some() {
            return Err(Error::ck_rv_with_errmsg(
                CKR_SLOT_ID_INVALID,
                format!("slot {} already holds a card", slot),
            ));
        }
        *entry = Some(card);
        Ok(())
    }

    /// Removes the card from a slot, the slot stays
    pub fn remove(&self, slot: SlotId) -> Result<Option<MemoryCard>> {
        match self.lock()?.get_mut(&slot) {
            Some(entry) => Ok(entry.take()),
            None => Ok(None),
        }
    }
}

impl TokenBackend for MemoryBackend {
    fn list_inserted_tokens(&self) -> Result<Vec<(SlotId, CardFingerprint)>> {
        let slots = self.lock()?;
        let mut tokens = Vec::new();
        for (slot, card) in slots.iter() {
            if let Some(card) = card {
                tokens.push((*slot, card.fingerprint()?));
            }
        }
        Ok(tokens)
    }

    fn open_session(
        &self,
        slot: SlotId,
        read_write: bool,
    ) -> Result<Box<dyn TokenSession>> {
        let card = match self.lock()?.get(&slot) {
            Some(Some(card)) => card.clone(),
            Some(None) => return Err(Error::ck_rv(CKR_TOKEN_NOT_PRESENT)),
            None => return Err(Error::ck_rv(CKR_SLOT_ID_INVALID)),
        };
        Ok(Box::new(MemorySession {
            slot: slot,
            card: card,
            read_write: read_write,
            login: None,
        }))
    }
}

/// A session on a [MemoryCard]
#[derive(Debug)]
pub struct MemorySession {
    slot: SlotId,
    card: MemoryCard,
    read_write: bool,
    /// Some(is_admin) once logged in
    login: Option<bool>,
}

impl MemorySession {
    fn check_rw(&self) -> Result<()> {
        if self.read_write {
            Ok(())
        } else {
            Err(Error::ck_rv(CKR_SESSION_READ_ONLY))
        }
    }

    fn check_login(&self) -> Result<()> {
        if self.login.is_some() {
            Ok(())
        } else {
            Err(Error::ck_rv(CKR_USER_NOT_LOGGED_IN))
        }
    }
}

fn random_biguint(bytes: usize) -> Result<BigUint> {
    let mut buf = vec![0u8; bytes];
    getrandom::fill(&mut buf)?;
    let mut n = BigUint::from_bytes_be(&buf);
    buf.zeroize();
    n.set_bit(u64::try_from(bytes * 8 - 1)?, true);
    n.set_bit(0, true);
    Ok(n)
}

fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    getrandom::fill(&mut buf)?;
    Ok(buf)
}

/// Fills the public and private templates of a generated key pair with
/// random components of the right shape
fn fake_key_pair(
    request: &KeyPairRequest,
    public: &mut AttributeTemplate,
    private: &mut AttributeTemplate,
) -> Result<()> {
    let bytes = usize::try_from(request.bits)? / 8;
    match request.mechanism {
        CKM_RSA_PKCS_KEY_PAIR_GEN => {
            if bytes < 64 {
                return Err(Error::ck_rv(CKR_KEY_SIZE_RANGE));
            }
            let n = random_biguint(bytes)?;
            let e = BigUint::from(65537u32);
            for tmpl in [&mut *public, &mut *private] {
                tmpl.set(Attribute::from_ulong(
                    AttributeKind::KeyType,
                    CKK_RSA,
                ));
                tmpl.set(Attribute::from_biguint(AttributeKind::Modulus, &n));
                tmpl.set(Attribute::from_biguint(
                    AttributeKind::PublicExponent,
                    &e,
                ));
            }
            public.set(Attribute::from_ulong(
                AttributeKind::ModulusBits,
                request.bits,
            ));
            private.set(Attribute::from_biguint(
                AttributeKind::PrivateExponent,
                &random_biguint(bytes)?,
            ));
            for kind in [
                AttributeKind::Prime1,
                AttributeKind::Prime2,
                AttributeKind::Exponent1,
                AttributeKind::Exponent2,
                AttributeKind::Coefficient,
            ] {
                private.set(Attribute::from_biguint(
                    kind,
                    &random_biguint(bytes / 2)?,
                ));
            }
        }
        CKM_EC_KEY_PAIR_GEN => {
            let params = match &request.ec_params {
                Some(p) => p.clone(),
                None => return Err(Error::ck_rv(CKR_TEMPLATE_INCOMPLETE)),
            };
            let curve = ecc::ec_params_to_curve_name(&params)
                .map_err(|_| Error::ck_rv(CKR_CURVE_NOT_SUPPORTED))?;
            let mut point = random_bytes(ecc::point_size(curve)?)?;
            point[0] = 0x04;
            let field = (ecc::curve_bits(curve)? + 7) / 8;
            for tmpl in [&mut *public, &mut *private] {
                tmpl.set(Attribute::from_ulong(AttributeKind::KeyType, CKK_EC));
                tmpl.set(Attribute::from_bytes(
                    AttributeKind::EcParams,
                    params.clone(),
                ));
            }
            public.set(Attribute::from_bytes(
                AttributeKind::EcPoint,
                codec::wrap_ec_point(&point)?,
            ));
            private.set(Attribute::from_biguint(
                AttributeKind::Value,
                &random_biguint(field)?,
            ));
        }
        CKM_DSA_KEY_PAIR_GEN => {
            if bytes < 64 {
                return Err(Error::ck_rv(CKR_KEY_SIZE_RANGE));
            }
            let p = random_biguint(bytes)?;
            let q = random_biguint(20)?;
            let g = random_biguint(bytes - 1)?;
            for tmpl in [&mut *public, &mut *private] {
                tmpl.set(Attribute::from_ulong(
                    AttributeKind::KeyType,
                    CKK_DSA,
                ));
                tmpl.set(Attribute::from_biguint(AttributeKind::Prime, &p));
                tmpl.set(Attribute::from_biguint(AttributeKind::Subprime, &q));
                tmpl.set(Attribute::from_biguint(AttributeKind::Base, &g));
            }
            public.set(Attribute::from_biguint(
                AttributeKind::Value,
                &random_biguint(bytes - 1)?,
            ));
            private.set(Attribute::from_biguint(
                AttributeKind::Value,
                &random_biguint(19)?,
            ));
        }
        _ => return Err(Error::ck_rv(CKR_MECHANISM_INVALID)),
    }
    Ok(())
}

impl TokenSession for MemorySession {
    fn slot(&self) -> SlotId {
        self.slot
    }

    fn token_info(&self) -> Result<TokenInfo> {
        self.card.info()
    }

    fn mechanism_list(&self) -> Result<Vec<CK_MECHANISM_TYPE>> {
        Ok(self.card.lock()?.mechanisms.clone())
    }

    fn is_read_write(&self) -> bool {
        self.read_write
    }

    fn is_logged_in(&self) -> bool {
        self.login.is_some()
    }

    fn login(&mut self, pin: &[u8], is_admin: bool) -> Result<bool> {
        if self.login.is_some() {
            return Err(Error::ck_rv(CKR_USER_ALREADY_LOGGED_IN));
        }
        let token = self.card.lock()?;
        let expected = if is_admin {
            &token.so_pin
        } else {
            &token.user_pin
        };
        if !constant_time_eq(expected, pin) {
            return Ok(false);
        }
        drop(token);
        self.login = Some(is_admin);
        Ok(true)
    }

    fn find_objects(
        &mut self,
        template: &AttributeTemplate,
    ) -> Result<Vec<ObjectHandle>> {
        Ok(self.card.lock()?.search(template, self.login.is_some()))
    }

    fn create_object(
        &mut self,
        template: &AttributeTemplate,
    ) -> Result<ObjectHandle> {
        self.check_rw()?;
        self.check_login()?;
        let class = match template.get_ulong(AttributeKind::Class) {
            Ok(c) => c,
            Err(_) => return Err(Error::ck_rv(CKR_TEMPLATE_INCOMPLETE)),
        };
        let mut token = self.card.lock()?;
        if token.rejected_classes.contains(&class) {
            return Err(Error::ck_rv(CKR_TEMPLATE_INCONSISTENT));
        }
        if let Ok(id) = template.get_bytes(AttributeKind::Id) {
            let filter = AttributeTemplate::new()
                .with(Attribute::from_ulong(AttributeKind::Class, class))
                .with(Attribute::from_bytes(AttributeKind::Id, id.clone()));
            if !token.search(&filter, true).is_empty() {
                return Err(Error::ck_rv_with_errmsg(
                    CKR_TEMPLATE_INCONSISTENT,
                    "an object with the same class and id exists",
                ));
            }
        }
        Ok(token.add_object(template.clone()))
    }

    fn destroy_object(&mut self, handle: ObjectHandle) -> Result<()> {
        self.check_rw()?;
        let mut token = self.card.lock()?;
        if !token.visible(handle, self.login.is_some())?.destroyable {
            return Err(Error::ck_rv(CKR_ACTION_PROHIBITED));
        }
        token.objects.remove(&handle);
        Ok(())
    }

    fn set_attribute(
        &mut self,
        handle: ObjectHandle,
        attr: &Attribute,
    ) -> Result<()> {
        self.check_rw()?;
        let logged_in = self.login.is_some();
        let mut token = self.card.lock()?;
        token.visible(handle, logged_in)?;
        if let Some(o) = token.objects.get_mut(&handle) {
            o.attrs.set(attr.clone());
        }
        Ok(())
    }

    fn get_attributes(
        &mut self,
        handle: ObjectHandle,
        kinds: &[AttributeKind],
    ) -> Result<AttributeTemplate> {
        let token = self.card.lock()?;
        let obj = token.visible(handle, self.login.is_some())?;
        Ok(kinds
            .iter()
            .filter(|k| !obj.hides(**k))
            .filter_map(|k| obj.attrs.get(*k).cloned())
            .collect())
    }

    fn randomize(&mut self) -> Result<()> {
        Ok(())
    }

    fn generate_key_pair(
        &mut self,
        request: &KeyPairRequest,
    ) -> Result<Vec<u8>> {
        self.check_rw()?;
        self.check_login()?;
        let delay = {
            let token = self.card.lock()?;
            if !token.mechanisms.contains(&request.mechanism) {
                return Err(Error::ck_rv(CKR_MECHANISM_INVALID));
            }
            token.keygen_delay
        };

        let mut public = AttributeTemplate::new()
            .with(Attribute::from_ulong(AttributeKind::Class, CKO_PUBLIC_KEY))
            .with(Attribute::from_bool(AttributeKind::Private, false))
            .with(Attribute::from_bool(AttributeKind::Verify, true));
        let mut private = AttributeTemplate::new()
            .with(Attribute::from_ulong(AttributeKind::Class, CKO_PRIVATE_KEY))
            .with(Attribute::from_bool(AttributeKind::Private, true))
            .with(Attribute::from_bool(AttributeKind::Sign, true));
        private.set_zeroize();
        fake_key_pair(request, &mut public, &mut private)?;

        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let id = request.id.clone();
        let mut token = self.card.lock()?;
        for tmpl in [&mut public, &mut private] {
            tmpl.set(Attribute::from_bool(AttributeKind::Token, true));
            tmpl.set(Attribute::from_string(
                AttributeKind::Label,
                &request.label,
            ));
            tmpl.set(Attribute::from_bytes(AttributeKind::Id, id.clone()));
        }
        token.add_object(public);
        token.add_object(private);
        Ok(id)
    }

    fn set_pin(&mut self, old_pin: &[u8], new_pin: &[u8]) -> Result<()> {
        self.check_rw()?;
        let is_admin = match self.login {
            Some(a) => a,
            None => return Err(Error::ck_rv(CKR_USER_NOT_LOGGED_IN)),
        };
        let mut token = self.card.lock()?;
        let pin = if is_admin {
            &mut token.so_pin
        } else {
            &mut token.user_pin
        };
        if !constant_time_eq(pin, old_pin) {
            return Err(Error::ck_rv(CKR_PIN_INCORRECT));
        }
        pin.zeroize();
        *pin = new_pin.to_vec();
        Ok(())
    }

    fn init_pin(&mut self, pin: &[u8]) -> Result<()> {
        self.check_rw()?;
        if self.login != Some(true) {
            return Err(Error::ck_rv(CKR_USER_NOT_LOGGED_IN));
        }
        let mut token = self.card.lock()?;
        token.user_pin.zeroize();
        token.user_pin = pin.to_vec();
        Ok(())
    }
}
