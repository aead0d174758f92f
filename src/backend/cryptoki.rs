// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Token backend that drives a PKCS#11 module through the [cryptoki]
//! crate.

use std::fmt;

use crate::attribute::{Attribute, AttributeKind, AttributeTemplate};
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::pkcs11::*;
use crate::record::CardFingerprint;
use crate::session::{
    KeyPairRequest, ObjectHandle, SlotId, TokenInfo, TokenSession,
};
use crate::token::TokenBackend;

use cryptoki::context::{CInitializeArgs, CInitializeFlags, Pkcs11};
use cryptoki::error::{Error as CkError, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{
    Attribute as CkAttribute, AttributeType, KeyType, ObjectClass,
    ObjectHandle as CkHandle,
};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;

/// A loaded and initialized PKCS#11 module
pub struct CryptokiBackend {
    module: String,
    pkcs11: Pkcs11,
}

impl fmt::Debug for CryptokiBackend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CryptokiBackend")
            .field("module", &self.module)
            .finish()
    }
}

impl CryptokiBackend {
    /// Loads and initializes the PKCS#11 module at `module`
    pub fn new(module: &str) -> Result<CryptokiBackend> {
        let pkcs11 = Pkcs11::new(module)?;
        pkcs11
            .initialize(CInitializeArgs::new(CInitializeFlags::OS_LOCKING_OK))?;
        log::debug!("Loaded PKCS#11 module {}", module);
        Ok(CryptokiBackend {
            module: module.to_string(),
            pkcs11: pkcs11,
        })
    }

    /// Loads the first configured module that can be initialized
    pub fn from_config(config: &Config) -> Result<CryptokiBackend> {
        for module in &config.modules {
            match CryptokiBackend::new(&module.path) {
                Ok(b) => return Ok(b),
                Err(e) => log::warn!("Failed to load {}: {}", module.path, e),
            }
        }
        Err(Error::with_msg(
            ErrorKind::NotLoaded,
            "no PKCS#11 module could be loaded",
        ))
    }

    fn slot(&self, id: SlotId) -> Result<Slot> {
        match self.pkcs11.get_all_slots()?.into_iter().find(|s| s.id() == id)
        {
            Some(s) => Ok(s),
            None => Err(Error::ck_rv(CKR_SLOT_ID_INVALID)),
        }
    }
}

fn token_info(pkcs11: &Pkcs11, slot: Slot) -> Result<TokenInfo> {
    let info = pkcs11.get_token_info(slot)?;
    Ok(TokenInfo {
        label: info.label().trim_end().to_string(),
        manufacturer: info.manufacturer_id().trim_end().to_string(),
        model: info.model().trim_end().to_string(),
        serial: info.serial_number().trim_end().to_string(),
    })
}

impl TokenBackend for CryptokiBackend {
    fn list_inserted_tokens(&self) -> Result<Vec<(SlotId, CardFingerprint)>> {
        let mut tokens = Vec::new();
        for slot in self.pkcs11.get_slots_with_token()? {
            match token_info(&self.pkcs11, slot) {
                Ok(info) => tokens.push((slot.id(), info.fingerprint())),
                Err(e) => log::debug!("Skipping slot {}: {}", slot.id(), e),
            }
        }
        Ok(tokens)
    }

    fn open_session(
        &self,
        slot: SlotId,
        read_write: bool,
    ) -> Result<Box<dyn TokenSession>> {
        let ckslot = self.slot(slot)?;
        let session = if read_write {
            self.pkcs11.open_rw_session(ckslot)?
        } else {
            self.pkcs11.open_ro_session(ckslot)?
        };
        Ok(Box::new(CryptokiSession {
            pkcs11: self.pkcs11.clone(),
            slot: ckslot,
            session: session,
            read_write: read_write,
            login: None,
            handles: Handles::new(),
        }))
    }
}

/// Maps the opaque cryptoki handles to plain handle numbers
struct Handles {
    map: bimap::hash::BiHashMap<ObjectHandle, CkHandle>,
    next: ObjectHandle,
}

impl Handles {
    fn new() -> Handles {
        Handles {
            map: bimap::hash::BiHashMap::new(),
            next: 1,
        }
    }

    fn number(&mut self, handle: CkHandle) -> ObjectHandle {
        if let Some(n) = self.map.get_by_right(&handle) {
            return *n;
        }
        let n = self.next;
        self.next += 1;
        self.map.insert(n, handle);
        n
    }

    fn get(&self, handle: ObjectHandle) -> Result<CkHandle> {
        match self.map.get_by_left(&handle) {
            Some(h) => Ok(*h),
            None => Err(Error::ck_rv(CKR_OBJECT_HANDLE_INVALID)),
        }
    }

    fn remove(&mut self, handle: ObjectHandle) {
        let _ = self.map.remove_by_left(&handle);
    }
}

fn malformed(e: CkError) -> Error {
    Error::with_origin(ErrorKind::MalformedObject, e)
}

fn to_ck_attribute(attr: &Attribute) -> Result<CkAttribute> {
    let bytes = || attr.to_bytes().map(|b| b.clone());
    Ok(match attr.kind() {
        AttributeKind::Class => CkAttribute::Class(
            ObjectClass::try_from(attr.to_ulong()?).map_err(malformed)?,
        ),
        AttributeKind::KeyType => CkAttribute::KeyType(
            KeyType::try_from(attr.to_ulong()?).map_err(malformed)?,
        ),
        AttributeKind::ModulusBits => {
            CkAttribute::ModulusBits(attr.to_ulong()?.into())
        }
        AttributeKind::Token => CkAttribute::Token(attr.to_bool()?),
        AttributeKind::Private => CkAttribute::Private(attr.to_bool()?),
        AttributeKind::Encrypt => CkAttribute::Encrypt(attr.to_bool()?),
        AttributeKind::Decrypt => CkAttribute::Decrypt(attr.to_bool()?),
        AttributeKind::Wrap => CkAttribute::Wrap(attr.to_bool()?),
        AttributeKind::Unwrap => CkAttribute::Unwrap(attr.to_bool()?),
        AttributeKind::Sign => CkAttribute::Sign(attr.to_bool()?),
        AttributeKind::Verify => CkAttribute::Verify(attr.to_bool()?),
        AttributeKind::Label => CkAttribute::Label(bytes()?),
        AttributeKind::Value => CkAttribute::Value(bytes()?),
        AttributeKind::Subject => CkAttribute::Subject(bytes()?),
        AttributeKind::Id => CkAttribute::Id(bytes()?),
        AttributeKind::Modulus => CkAttribute::Modulus(bytes()?),
        AttributeKind::PublicExponent => CkAttribute::PublicExponent(bytes()?),
        AttributeKind::PrivateExponent => {
            CkAttribute::PrivateExponent(bytes()?)
        }
        AttributeKind::Prime1 => CkAttribute::Prime1(bytes()?),
        AttributeKind::Prime2 => CkAttribute::Prime2(bytes()?),
        AttributeKind::Exponent1 => CkAttribute::Exponent1(bytes()?),
        AttributeKind::Exponent2 => CkAttribute::Exponent2(bytes()?),
        AttributeKind::Coefficient => CkAttribute::Coefficient(bytes()?),
        AttributeKind::Prime => CkAttribute::Prime(bytes()?),
        AttributeKind::Subprime => CkAttribute::Subprime(bytes()?),
        AttributeKind::Base => CkAttribute::Base(bytes()?),
        AttributeKind::EcParams => CkAttribute::EcParams(bytes()?),
        AttributeKind::EcPoint => CkAttribute::EcPoint(bytes()?),
    })
}

fn to_ck_template(tmpl: &AttributeTemplate) -> Result<Vec<CkAttribute>> {
    tmpl.iter().map(to_ck_attribute).collect()
}

fn attribute_type(kind: AttributeKind) -> AttributeType {
    match kind {
        AttributeKind::Class => AttributeType::Class,
        AttributeKind::Token => AttributeType::Token,
        AttributeKind::Private => AttributeType::Private,
        AttributeKind::Label => AttributeType::Label,
        AttributeKind::Value => AttributeType::Value,
        AttributeKind::KeyType => AttributeType::KeyType,
        AttributeKind::Subject => AttributeType::Subject,
        AttributeKind::Id => AttributeType::Id,
        AttributeKind::Encrypt => AttributeType::Encrypt,
        AttributeKind::Decrypt => AttributeType::Decrypt,
        AttributeKind::Wrap => AttributeType::Wrap,
        AttributeKind::Unwrap => AttributeType::Unwrap,
        AttributeKind::Sign => AttributeType::Sign,
        AttributeKind::Verify => AttributeType::Verify,
        AttributeKind::Modulus => AttributeType::Modulus,
        AttributeKind::ModulusBits => AttributeType::ModulusBits,
        AttributeKind::PublicExponent => AttributeType::PublicExponent,
        AttributeKind::PrivateExponent => AttributeType::PrivateExponent,
        AttributeKind::Prime1 => AttributeType::Prime1,
        AttributeKind::Prime2 => AttributeType::Prime2,
        AttributeKind::Exponent1 => AttributeType::Exponent1,
        AttributeKind::Exponent2 => AttributeType::Exponent2,
        AttributeKind::Coefficient => AttributeType::Coefficient,
        AttributeKind::Prime => AttributeType::Prime,
        AttributeKind::Subprime => AttributeType::Subprime,
        AttributeKind::Base => AttributeType::Base,
        AttributeKind::EcParams => AttributeType::EcParams,
        AttributeKind::EcPoint => AttributeType::EcPoint,
    }
}

/// Converts an attribute read from the token, None for attribute types
/// this crate does not handle
fn from_ck_attribute(attr: CkAttribute) -> Option<Attribute> {
    use AttributeKind as K;
    let (kind, bytes) = match attr {
        CkAttribute::Class(c) => {
            return Some(Attribute::from_ulong(K::Class, c.into()))
        }
        CkAttribute::KeyType(k) => {
            return Some(Attribute::from_ulong(K::KeyType, k.into()))
        }
        CkAttribute::ModulusBits(b) => {
            return Some(Attribute::from_ulong(K::ModulusBits, b.into()))
        }
        CkAttribute::Token(b) => return Some(Attribute::from_bool(K::Token, b)),
        CkAttribute::Private(b) => {
            return Some(Attribute::from_bool(K::Private, b))
        }
        CkAttribute::Label(v) => (K::Label, v),
        CkAttribute::Value(v) => (K::Value, v),
        CkAttribute::Subject(v) => (K::Subject, v),
        CkAttribute::Id(v) => (K::Id, v),
        CkAttribute::Modulus(v) => (K::Modulus, v),
        CkAttribute::PublicExponent(v) => (K::PublicExponent, v),
        CkAttribute::Prime(v) => (K::Prime, v),
        CkAttribute::Subprime(v) => (K::Subprime, v),
        CkAttribute::Base(v) => (K::Base, v),
        CkAttribute::EcParams(v) => (K::EcParams, v),
        CkAttribute::EcPoint(v) => (K::EcPoint, v),
        _ => return None,
    };
    Some(Attribute::from_bytes(kind, bytes))
}

fn auth_pin(pin: &[u8]) -> Result<AuthPin> {
    let pin = String::from_utf8(pin.to_vec()).map_err(|e| {
        Error::with_origin(ErrorKind::AuthenticationFailed, e)
    })?;
    Ok(AuthPin::new(pin.into()))
}

/// A session opened through [CryptokiBackend]
pub struct CryptokiSession {
    pkcs11: Pkcs11,
    slot: Slot,
    session: Session,
    read_write: bool,
    login: Option<bool>,
    handles: Handles,
}

impl fmt::Debug for CryptokiSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CryptokiSession")
            .field("slot", &self.slot.id())
            .field("read_write", &self.read_write)
            .field("login", &self.login)
            .finish()
    }
}

impl TokenSession for CryptokiSession {
    fn slot(&self) -> SlotId {
        self.slot.id()
    }

    fn token_info(&self) -> Result<TokenInfo> {
        token_info(&self.pkcs11, self.slot)
    }

    fn mechanism_list(&self) -> Result<Vec<CK_MECHANISM_TYPE>> {
        Ok(self
            .pkcs11
            .get_mechanism_list(self.slot)?
            .into_iter()
            .map(CK_MECHANISM_TYPE::from)
            .collect())
    }

    fn is_read_write(&self) -> bool {
        self.read_write
    }

    fn is_logged_in(&self) -> bool {
        self.login.is_some()
    }

    fn login(&mut self, pin: &[u8], is_admin: bool) -> Result<bool> {
        let user = if is_admin { UserType::So } else { UserType::User };
        match self.session.login(user, Some(&auth_pin(pin)?)) {
            Ok(()) | Err(CkError::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => {
                self.login = Some(is_admin);
                Ok(true)
            }
            Err(CkError::Pkcs11(RvError::PinIncorrect, _)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn find_objects(
        &mut self,
        template: &AttributeTemplate,
    ) -> Result<Vec<ObjectHandle>> {
        let found = self.session.find_objects(&to_ck_template(template)?)?;
        Ok(found.into_iter().map(|h| self.handles.number(h)).collect())
    }

    fn create_object(
        &mut self,
        template: &AttributeTemplate,
    ) -> Result<ObjectHandle> {
        let handle = self.session.create_object(&to_ck_template(template)?)?;
        Ok(self.handles.number(handle))
    }

    fn destroy_object(&mut self, handle: ObjectHandle) -> Result<()> {
        self.session.destroy_object(self.handles.get(handle)?)?;
        self.handles.remove(handle);
        Ok(())
    }

    fn set_attribute(
        &mut self,
        handle: ObjectHandle,
        attr: &Attribute,
    ) -> Result<()> {
        let attrs = [to_ck_attribute(attr)?];
        self.session
            .update_attributes(self.handles.get(handle)?, &attrs)?;
        Ok(())
    }

    fn get_attributes(
        &mut self,
        handle: ObjectHandle,
        kinds: &[AttributeKind],
    ) -> Result<AttributeTemplate> {
        let types: Vec<AttributeType> =
            kinds.iter().map(|k| attribute_type(*k)).collect();
        let attrs =
            self.session.get_attributes(self.handles.get(handle)?, &types)?;
        Ok(attrs.into_iter().filter_map(from_ck_attribute).collect())
    }

    fn randomize(&mut self) -> Result<()> {
        let mut seed = [0u8; 20];
        getrandom::fill(&mut seed)?;
        self.session.seed_random(&seed)?;
        Ok(())
    }

    fn generate_key_pair(
        &mut self,
        request: &KeyPairRequest,
    ) -> Result<Vec<u8>> {
        let id = request.id.clone();
        let label = request.label.as_bytes().to_vec();
        let mut pub_tmpl = vec![
            CkAttribute::Token(true),
            CkAttribute::Private(false),
            CkAttribute::Label(label.clone()),
            CkAttribute::Id(id.clone()),
            CkAttribute::Verify(true),
            CkAttribute::Encrypt(true),
            CkAttribute::Wrap(true),
        ];
        let priv_tmpl = vec![
            CkAttribute::Token(true),
            CkAttribute::Private(true),
            CkAttribute::Sensitive(true),
            CkAttribute::Label(label),
            CkAttribute::Id(id.clone()),
            CkAttribute::Sign(true),
            CkAttribute::Decrypt(true),
            CkAttribute::Unwrap(true),
        ];
        let mechanism = match request.mechanism {
            CKM_RSA_PKCS_KEY_PAIR_GEN => {
                pub_tmpl.push(CkAttribute::ModulusBits(request.bits.into()));
                pub_tmpl.push(CkAttribute::PublicExponent(vec![1, 0, 1]));
                Mechanism::RsaPkcsKeyPairGen
            }
            CKM_EC_KEY_PAIR_GEN => {
                match &request.ec_params {
                    Some(p) => pub_tmpl.push(CkAttribute::EcParams(p.clone())),
                    None => return Err(Error::ck_rv(CKR_TEMPLATE_INCOMPLETE)),
                }
                Mechanism::EccKeyPairGen
            }
            m => {
                return Err(Error::with_msg(
                    ErrorKind::UnsupportedAlgorithm,
                    format!("key generation mechanism {:#x} not available", m),
                ))
            }
        };
        self.session
            .generate_key_pair(&mechanism, &pub_tmpl, &priv_tmpl)?;
        Ok(id)
    }

    fn set_pin(&mut self, old_pin: &[u8], new_pin: &[u8]) -> Result<()> {
        self.session
            .set_pin(&auth_pin(old_pin)?, &auth_pin(new_pin)?)?;
        Ok(())
    }

    fn init_pin(&mut self, pin: &[u8]) -> Result<()> {
        self.session.init_pin(&auth_pin(pin)?)?;
        Ok(())
    }
}
