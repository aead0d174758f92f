// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Lifecycle of token backed keys: import, store, delete, rename and
//! generation on the token, plus access to the private key and PIN
//! management on the card holding it.
//!
//! Every operation borrows a session for its own duration only. Writes
//! happen on a read-write session after a single PIN login.

use crate::attribute::{Attribute, AttributeKind, AttributeTemplate};
use crate::codec;
use crate::error::{Error, ErrorKind, Result};
use crate::kasn1::x509;
use crate::key::{AsymmetricKeyMaterial, KeyFamily, PublicKey};
use crate::keygen::{KeyGenParams, KeyGenTask};
use crate::locator::prepare_card;
use crate::pkcs11::*;
use crate::record::TokenKeyRecord;
use crate::session::{ObjectHandle, SlotId, TokenSession};
use crate::store::{DeleteReport, ObjectStore};
use crate::token::TokenEnvironment;
use crate::ui::UserInteraction;

use zeroize::Zeroize;

const ALREADY_STORED: &str = "This key is already on the token";

fn pin_prompt(session: &dyn TokenSession, is_admin: bool) -> String {
    let who = if is_admin { "SO" } else { "User" };
    match session.token_info() {
        Ok(info) => format!("{} PIN for token {}", who, info.label),
        Err(_) => format!("{} PIN", who),
    }
}

fn read_pin(ui: &mut dyn UserInteraction, prompt: &str) -> Result<Vec<u8>> {
    match ui.prompt_pin(prompt) {
        Some(pin) => Ok(pin),
        None => Err(Error::with_msg(
            ErrorKind::AuthenticationFailed,
            "PIN input aborted",
        )),
    }
}

fn login_with(
    session: &mut dyn TokenSession,
    pin: &[u8],
    is_admin: bool,
) -> Result<()> {
    if session.login(pin, is_admin)? {
        Ok(())
    } else {
        log::error!("PIN rejected by the token");
        Err(Error::with_msg(
            ErrorKind::AuthenticationFailed,
            "PIN rejected by the token",
        ))
    }
}

/// Prompts for the PIN and logs in, unless the session is already
/// logged in
pub fn login(
    session: &mut dyn TokenSession,
    ui: &mut dyn UserInteraction,
    is_admin: bool,
) -> Result<()> {
    if session.is_logged_in() {
        return Ok(());
    }
    let prompt = pin_prompt(session, is_admin);
    let mut pin = read_pin(ui, &prompt)?;
    let ret = login_with(session, &pin, is_admin);
    pin.zeroize();
    ret
}

/// Derives a display name from a CKA_LABEL, falling back to the
/// CKA_SUBJECT and finally to an empty name
fn object_name(attrs: &AttributeTemplate) -> String {
    if let Ok(label) = attrs.get_string(AttributeKind::Label) {
        if !label.is_empty() {
            return label;
        }
    }
    if let Ok(subject) = attrs.get_bytes(AttributeKind::Subject) {
        match x509::subject_display_name(subject) {
            Ok(Some(name)) => return name,
            Ok(None) => (),
            Err(e) => log::debug!("Unparsable subject: {}", e),
        }
    }
    String::new()
}

/// Reads a key object and the token descriptor into a new record
///
/// When `known` is given it is used as the public key instead of
/// decoding the object attributes
fn read_object(
    session: &mut dyn TokenSession,
    handle: ObjectHandle,
    known: Option<PublicKey>,
) -> Result<TokenKeyRecord> {
    let info = session.token_info()?;
    let mut kinds = vec![
        AttributeKind::Id,
        AttributeKind::Label,
        AttributeKind::Subject,
    ];
    kinds.extend_from_slice(&codec::PUBLIC_KEY_ATTRIBUTES);
    let attrs = session.get_attributes(handle, &kinds)?;
    let public_key = match known {
        Some(k) => k,
        None => codec::decode_public_key(&attrs)?.public_key(),
    };
    let object_id = match attrs.get(AttributeKind::Id) {
        Some(a) => a.to_bytes()?.clone(),
        None => Vec::new(),
    };
    let mut record = TokenKeyRecord::new(
        info.fingerprint(),
        object_name(&attrs),
        object_id,
        public_key,
    );
    match session.mechanism_list() {
        Ok(mechs) => record.set_mechanisms(&mechs),
        Err(e) => log::warn!("Unable to read the mechanism list: {}", e),
    }
    log::debug!(
        "Loaded {} key \"{}\" with id {} from token {}",
        record.public_key().family(),
        record.slot_label(),
        record.object_id_hex(),
        record.fingerprint().label
    );
    Ok(record)
}

/// Where a private key lives, with the logged in session to use it
#[derive(Debug)]
pub struct PrivateKeyLocation {
    pub slot: SlotId,
    pub session: Box<dyn TokenSession>,
    pub handle: ObjectHandle,
}

impl TokenKeyRecord {
    /// Imports the key object `handle` into a new record
    ///
    /// Reads the card identity from the session, the object id and the
    /// display name from the object, and decodes its public key
    pub fn load_token(
        session: &mut dyn TokenSession,
        handle: ObjectHandle,
    ) -> Result<TokenKeyRecord> {
        read_object(session, handle, None)
    }

    /// Imports the public key object with the given id from `slot`
    pub fn import_from_slot(
        env: &TokenEnvironment,
        slot: SlotId,
        object_id: &[u8],
    ) -> Result<TokenKeyRecord> {
        let mut session = env.open_session(slot, false)?;
        let mut store = ObjectStore::new(session.as_mut());
        let filter = AttributeTemplate::new()
            .with(Attribute::from_ulong(AttributeKind::Class, CKO_PUBLIC_KEY))
            .with(Attribute::from_bytes(AttributeKind::Id, object_id.to_vec()));
        let handle = store.find_one(&filter)?;
        read_object(session.as_mut(), handle, None)
    }

    /// Re-reads the record from the key object `handle`
    ///
    /// The record is replaced only if the whole import succeeds, on
    /// error it is left untouched
    pub fn reload(
        &mut self,
        session: &mut dyn TokenSession,
        handle: ObjectHandle,
    ) -> Result<()> {
        *self = read_object(session, handle, None)?;
        Ok(())
    }

    /// Stores a key pair on the token in `slot`
    ///
    /// If the key is already on the token it is imported instead and no
    /// object is created. A stored key is recognized by a public object
    /// with all the public components, or for RSA by a private object
    /// with the same modulus and exponent.
    ///
    /// Otherwise a fresh object id is allocated and the public and
    /// private objects are created, the public one is removed again if
    /// the private one is rejected.
    pub fn store_token(
        env: &TokenEnvironment,
        slot: SlotId,
        material: &AsymmetricKeyMaterial,
        label: &str,
        ui: &mut dyn UserInteraction,
    ) -> Result<TokenKeyRecord> {
        let mut session = env.open_session(slot, true)?;
        let mut store = ObjectStore::new(session.as_mut());

        let found = store.find(&codec::public_template(material)?)?;
        if let Some(handle) = found.first().copied() {
            ui.notify(ALREADY_STORED);
            return read_object(store.session(), handle, None);
        }
        /* only RSA private objects carry the whole public key */
        if material.family() == KeyFamily::Rsa {
            let filter = codec::identity_template(material, CKO_PRIVATE_KEY);
            if let Some(handle) = store.find(&filter)?.first().copied() {
                ui.notify(ALREADY_STORED);
                let known = Some(material.public_key());
                return read_object(store.session(), handle, known);
            }
        }

        let id = store.allocate_unique_id(CKO_PUBLIC_KEY)?;

        let mut pub_tmpl = codec::public_template(material)?;
        pub_tmpl.set(id.clone());
        pub_tmpl.set(Attribute::from_bool(AttributeKind::Token, true));
        pub_tmpl.set(Attribute::from_string(AttributeKind::Label, label));
        pub_tmpl.set(Attribute::from_bool(AttributeKind::Private, false));
        for kind in [
            AttributeKind::Wrap,
            AttributeKind::Encrypt,
            AttributeKind::Verify,
        ] {
            pub_tmpl.set(Attribute::from_bool(kind, true));
        }

        let mut priv_tmpl = codec::private_template(material)?;
        priv_tmpl.set(id.clone());
        priv_tmpl.set(Attribute::from_bool(AttributeKind::Token, true));
        priv_tmpl.set(Attribute::from_string(AttributeKind::Label, label));
        priv_tmpl.set(Attribute::from_bool(AttributeKind::Private, true));
        for kind in [
            AttributeKind::Unwrap,
            AttributeKind::Decrypt,
            AttributeKind::Sign,
        ] {
            priv_tmpl.set(Attribute::from_bool(kind, true));
        }

        login(store.session(), ui, false)?;

        let pub_handle = store.create_object(&pub_tmpl)?;
        if let Err(e) = store.create_object(&priv_tmpl) {
            log::error!("Private key creation failed: {}", e);
            if let Err(re) = store.session().destroy_object(pub_handle) {
                log::warn!("Unable to remove the public key: {}", re);
            }
            return Err(e);
        }

        let mut filter = codec::identity_template(material, CKO_PUBLIC_KEY);
        filter.set(id);
        let handles = store.find(&filter)?;
        match handles.first() {
            Some(handle) => read_object(store.session(), *handle, None),
            None => Err(Error::with_msg(
                ErrorKind::ObjectNotFound,
                "unable to find the stored public key",
            )),
        }
    }

    /// Deletes the key pair from the card, after asking the user
    ///
    /// Returns None if the user declined. Every matching public and
    /// private object is deleted, failures are reported per object.
    pub fn delete_from_token(
        &self,
        env: &TokenEnvironment,
        ui: &mut dyn UserInteraction,
    ) -> Result<Option<DeleteReport>> {
        let slot = prepare_card(env, self, false, ui)?;
        let question = format!(
            "Delete the {} key '{}' from the token '{}' (#{})?",
            self.public_key().family(),
            self.slot_label(),
            self.fingerprint().label,
            self.fingerprint().serial
        );
        if !ui.yes_no(&question) {
            return Ok(None);
        }
        let mut session = env.open_session(slot, true)?;
        login(session.as_mut(), ui, false)?;
        let mut store = ObjectStore::new(session.as_mut());
        let mut handles =
            store.find(&self.identity_template(CKO_PRIVATE_KEY))?;
        handles.extend(store.find(&self.identity_template(CKO_PUBLIC_KEY))?);
        if handles.is_empty() {
            log::warn!("No object to delete for {}", self.object_id_hex());
        }
        Ok(Some(store.delete_objects(&handles)))
    }

    /// Relabels the private and public objects
    ///
    /// Returns false, changing nothing, if the private object can't be
    /// found. On success the record takes the new name.
    pub fn rename_on_token(
        &mut self,
        env: &TokenEnvironment,
        name: &str,
        ui: &mut dyn UserInteraction,
    ) -> Result<bool> {
        let slot = prepare_card(env, self, false, ui)?;
        let mut session = env.open_session(slot, true)?;
        login(session.as_mut(), ui, false)?;
        let mut store = ObjectStore::new(session.as_mut());
        let privs = store.find(&self.identity_template(CKO_PRIVATE_KEY))?;
        let priv_handle = match privs.first() {
            Some(h) => *h,
            None => return Ok(false),
        };
        store.rename_object(priv_handle, name)?;
        let pubs = store.find(&self.identity_template(CKO_PUBLIC_KEY))?;
        if let Some(h) = pubs.first() {
            store.rename_object(*h, name)?;
        }
        self.slot_label = name.to_string();
        Ok(true)
    }

    /// Generates a key pair on the token in `slot` and imports it
    ///
    /// The parameters are validated before anything is done on the
    /// token, an unknown curve fails with
    /// [ErrorKind::UnsupportedAlgorithm]
    pub fn generate_on_token(
        env: &TokenEnvironment,
        slot: SlotId,
        params: &KeyGenParams,
        config: &crate::config::Config,
        ui: &mut dyn UserInteraction,
        progress: &mut dyn FnMut(),
    ) -> Result<TokenKeyRecord> {
        let task = KeyGenTask::new(params, config.keygen_poll_interval())?;
        Self::generate_with_task(env, slot, &task, ui, progress)
    }

    /// Same as [TokenKeyRecord::generate_on_token] with a task built by
    /// the caller, so that it can be cancelled
    pub fn generate_with_task(
        env: &TokenEnvironment,
        slot: SlotId,
        task: &KeyGenTask,
        ui: &mut dyn UserInteraction,
        progress: &mut dyn FnMut(),
    ) -> Result<TokenKeyRecord> {
        let mut session = env.open_session(slot, true)?;
        if let Err(e) = session.randomize() {
            log::debug!("Token random generator not seeded: {}", e);
        }
        login(session.as_mut(), ui, false)?;

        let id = task.run(session.as_mut(), progress)?;

        let mut store = ObjectStore::new(session.as_mut());
        let filter = AttributeTemplate::new()
            .with(Attribute::from_ulong(AttributeKind::Class, CKO_PUBLIC_KEY))
            .with(Attribute::from_bytes(AttributeKind::Id, id));
        let handles = store.find(&filter)?;
        if handles.len() != 1 {
            log::warn!("{} public keys match the generated id", handles.len());
        }
        match handles.first() {
            Some(handle) => read_object(store.session(), *handle, None),
            None => {
                log::error!("Generated key not found on the token");
                Err(Error::with_msg(
                    ErrorKind::ObjectNotFound,
                    "unable to find the generated key",
                ))
            }
        }
    }

    /// Locates the card, verifies it holds the public key, logs in and
    /// finds the single private key object
    pub fn private_key_handle(
        &self,
        env: &TokenEnvironment,
        ui: &mut dyn UserInteraction,
    ) -> Result<PrivateKeyLocation> {
        let slot = prepare_card(env, self, true, ui)?;
        let mut session = env.open_session(slot, false)?;
        login(session.as_mut(), ui, false)?;
        let handle = ObjectStore::new(session.as_mut())
            .find_one(&self.identity_template(CKO_PRIVATE_KEY))?;
        Ok(PrivateKeyLocation {
            slot: slot,
            session: session,
            handle: handle,
        })
    }

    /// Changes the user PIN, or the SO PIN if `is_admin` is set, on the
    /// card holding the key
    pub fn change_pin(
        &self,
        env: &TokenEnvironment,
        is_admin: bool,
        ui: &mut dyn UserInteraction,
    ) -> Result<()> {
        let slot = prepare_card(env, self, false, ui)?;
        let mut session = env.open_session(slot, true)?;
        let prompt = pin_prompt(session.as_ref(), is_admin);
        let mut old_pin = read_pin(ui, &format!("Current {}", prompt))?;
        let ret = login_with(session.as_mut(), &old_pin, is_admin)
            .and_then(|_| read_pin(ui, &format!("New {}", prompt)))
            .and_then(|mut new_pin| {
                let r = session.set_pin(&old_pin, &new_pin);
                new_pin.zeroize();
                r
            });
        old_pin.zeroize();
        ret
    }

    /// Sets a new user PIN on the card holding the key, after a SO login
    pub fn init_pin(
        &self,
        env: &TokenEnvironment,
        ui: &mut dyn UserInteraction,
    ) -> Result<()> {
        let slot = prepare_card(env, self, false, ui)?;
        let mut session = env.open_session(slot, true)?;
        login(session.as_mut(), ui, true)?;
        let prompt = pin_prompt(session.as_ref(), false);
        let mut pin = read_pin(ui, &format!("New {}", prompt))?;
        let ret = session.init_pin(&pin);
        pin.zeroize();
        ret
    }
}
