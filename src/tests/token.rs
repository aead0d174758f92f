// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

use crate::attribute::*;
use crate::codec;
use crate::config::Config;
use crate::key::AsymmetricKeyMaterial;
use crate::mechanism::Digest;
use crate::pkcs11::*;
use crate::record::*;
use crate::session::ObjectHandle;
use crate::store::OBJECT_ID_LEN;

use serial_test::parallel;

fn store(token: &TestToken, seed: u8, label: &str) -> TokenKeyRecord {
    let mut ui = TestUi::new();
    ret_or_panic!(TokenKeyRecord::store_token(
        &token.env,
        token.slot,
        &rsa_material(seed),
        label,
        &mut ui
    ))
}

fn find_class(
    token: &TestToken,
    class: CK_OBJECT_CLASS,
) -> Vec<ObjectHandle> {
    let filter = AttributeTemplate::new()
        .with(Attribute::from_ulong(AttributeKind::Class, class));
    ret_or_panic!(token.card.find(&filter))
}

fn attrs_of(token: &TestToken, class: CK_OBJECT_CLASS) -> AttributeTemplate {
    let handles = find_class(token, class);
    assert_eq!(handles.len(), 1);
    ret_or_panic!(token.card.attributes(handles[0]))
}

#[test]
#[parallel]
fn test_store_rsa_key() {
    let token = TestToken::new();
    let mut ui = TestUi::new();
    let record = ret_or_panic!(TokenKeyRecord::store_token(
        &token.env,
        token.slot,
        &rsa_material(1),
        "My key",
        &mut ui
    ));

    assert_eq!(record.fingerprint().label, TOKEN_LABEL);
    assert_eq!(record.fingerprint().serial, TOKEN_SERIAL);
    assert_eq!(record.slot_label(), "My key");
    assert_eq!(record.object_id().len(), OBJECT_ID_LEN);
    assert_eq!(record.public_key(), &rsa_material(1).public_key());
    assert_eq!(ret_or_panic!(record.public_key().bits()), 2048);
    assert!(!record.mechanisms().is_empty());
    assert_eq!(ui.pin_prompts.len(), 1);
    assert_eq!(token.object_count(), 2);

    let public = attrs_of(&token, CKO_PUBLIC_KEY);
    let private = attrs_of(&token, CKO_PRIVATE_KEY);
    for (tmpl, is_private) in [(&public, false), (&private, true)] {
        assert_eq!(
            ret_or_panic!(tmpl.get_bytes(AttributeKind::Id)),
            &record.object_id().to_vec()
        );
        assert!(ret_or_panic!(tmpl.get_bool(AttributeKind::Token)));
        assert_eq!(
            ret_or_panic!(tmpl.get_bool(AttributeKind::Private)),
            is_private
        );
        assert_eq!(
            ret_or_panic!(tmpl.get_string(AttributeKind::Label)),
            "My key"
        );
    }
    for kind in [
        AttributeKind::Wrap,
        AttributeKind::Encrypt,
        AttributeKind::Verify,
    ] {
        assert!(ret_or_panic!(public.get_bool(kind)));
    }
    for kind in [
        AttributeKind::Unwrap,
        AttributeKind::Decrypt,
        AttributeKind::Sign,
    ] {
        assert!(ret_or_panic!(private.get_bool(kind)));
    }
    assert!(private.get(AttributeKind::PrivateExponent).is_some());

    /* the record survives persistence */
    let data = ret_or_panic!(record.encode());
    assert_eq!(
        ret_or_panic!(TokenKeyRecord::decode(&data, RECORD_VERSION)),
        record
    );
}

#[test]
#[parallel]
fn test_store_is_idempotent() {
    let token = TestToken::new();
    let first = store(&token, 1, "key");
    assert_eq!(token.object_count(), 2);

    let mut ui = TestUi::new();
    let second = ret_or_panic!(TokenKeyRecord::store_token(
        &token.env,
        token.slot,
        &rsa_material(1),
        "another label",
        &mut ui
    ));
    assert_eq!(token.object_count(), 2);
    assert_eq!(second.object_id(), first.object_id());
    assert_eq!(second.slot_label(), "key");
    assert_eq!(ui.notices.len(), 1);
    assert!(ui.pin_prompts.is_empty());

    /* a different key gets its own objects and id */
    let third = store(&token, 2, "key");
    assert_eq!(token.object_count(), 4);
    assert_ne!(third.object_id(), first.object_id());
}

#[test]
#[parallel]
fn test_store_each_family() {
    let token = TestToken::new();
    let mut ui = TestUi::new();
    for material in [dsa_material(3), ec_material(4)] {
        let record = ret_or_panic!(TokenKeyRecord::store_token(
            &token.env,
            token.slot,
            &material,
            "key",
            &mut ui
        ));
        assert_eq!(record.public_key(), &material.public_key());
    }
    assert_eq!(token.object_count(), 4);
}

/// Stores two keys that share every public component but the public
/// value and checks both end up on the token as separate pairs
fn store_two_keys(
    first: AsymmetricKeyMaterial,
    second: AsymmetricKeyMaterial,
) {
    let token = TestToken::new();
    let mut ui = TestUi::new();
    let mut records = Vec::new();
    for material in [&first, &second] {
        records.push(ret_or_panic!(TokenKeyRecord::store_token(
            &token.env,
            token.slot,
            material,
            "key",
            &mut ui
        )));
    }
    assert!(ui.notices.is_empty());
    assert_eq!(token.object_count(), 4);
    assert_ne!(records[0].object_id(), records[1].object_id());
    assert_eq!(records[0].public_key(), &first.public_key());
    assert_eq!(records[1].public_key(), &second.public_key());
}

#[test]
#[parallel]
fn test_store_ec_keys_on_same_curve() {
    store_two_keys(ec_material(4), ec_material(5));
}

#[test]
#[parallel]
fn test_store_dsa_keys_with_shared_parameters() {
    let second = match dsa_material(3) {
        AsymmetricKeyMaterial::Dsa {
            mut public,
            private,
        } => {
            public.value += 2u32;
            AsymmetricKeyMaterial::Dsa {
                public: public,
                private: private,
            }
        }
        _ => unreachable!(),
    };
    store_two_keys(dsa_material(3), second);
}

#[test]
#[parallel]
fn test_store_rolls_back_public_object() {
    let token = TestToken::new();
    ret_or_panic!(token.card.reject_class(CKO_PRIVATE_KEY));
    let mut ui = TestUi::new();
    assert_eq!(
        err_kind!(TokenKeyRecord::store_token(
            &token.env,
            token.slot,
            &rsa_material(1),
            "key",
            &mut ui
        )),
        ErrorKind::CreateRejected
    );
    assert_eq!(token.object_count(), 0);
}

#[test]
#[parallel]
fn test_store_requires_private_material() {
    let token = TestToken::new();
    let mut ui = TestUi::new();
    let public_only =
        AsymmetricKeyMaterial::from(rsa_material(1).public_key());
    assert_eq!(
        err_kind!(TokenKeyRecord::store_token(
            &token.env,
            token.slot,
            &public_only,
            "key",
            &mut ui
        )),
        ErrorKind::MalformedObject
    );
    assert!(ui.pin_prompts.is_empty());
    assert_eq!(token.object_count(), 0);
}

#[test]
#[parallel]
fn test_store_authentication() {
    let token = TestToken::new();

    let mut ui = TestUi::with_pins(&[None]);
    assert_eq!(
        err_kind!(TokenKeyRecord::store_token(
            &token.env,
            token.slot,
            &rsa_material(1),
            "key",
            &mut ui
        )),
        ErrorKind::AuthenticationFailed
    );

    let mut ui = TestUi::with_pins(&[Some("wrong")]);
    assert_eq!(
        err_kind!(TokenKeyRecord::store_token(
            &token.env,
            token.slot,
            &rsa_material(1),
            "key",
            &mut ui
        )),
        ErrorKind::AuthenticationFailed
    );
    assert_eq!(token.object_count(), 0);
}

#[test]
#[parallel]
fn test_load_token() {
    let token = TestToken::new();
    let record = store(&token, 1, "stored");
    let handle = find_class(&token, CKO_PUBLIC_KEY)[0];

    let mut session = token.session(false);
    let loaded =
        ret_or_panic!(TokenKeyRecord::load_token(session.as_mut(), handle));
    assert_eq!(loaded, record);

    let imported = ret_or_panic!(TokenKeyRecord::import_from_slot(
        &token.env,
        token.slot,
        record.object_id()
    ));
    assert_eq!(imported, record);
}

#[test]
#[parallel]
fn test_load_token_name_fallback() {
    let token = TestToken::new();
    let mut tmpl = ret_or_panic!(codec::public_template(&ec_material(2)));
    tmpl.set(Attribute::from_bytes(AttributeKind::Id, vec![1, 2, 3]));
    tmpl.set(Attribute::from_bytes(
        AttributeKind::Subject,
        ALICE_SUBJECT.to_vec(),
    ));
    let with_subject = ret_or_panic!(token.card.put_object(tmpl));

    let mut tmpl = ret_or_panic!(codec::public_template(&ec_material(3)));
    tmpl.set(Attribute::from_string(AttributeKind::Label, ""));
    let anonymous = ret_or_panic!(token.card.put_object(tmpl));

    let mut session = token.session(false);
    let record = ret_or_panic!(TokenKeyRecord::load_token(
        session.as_mut(),
        with_subject
    ));
    assert_eq!(record.slot_label(), "Alice");
    assert_eq!(record.object_id(), &[1, 2, 3]);
    assert_eq!(record.object_id_hex(), "010203");

    let record =
        ret_or_panic!(TokenKeyRecord::load_token(session.as_mut(), anonymous));
    assert_eq!(record.slot_label(), "");
    assert!(record.object_id().is_empty());
}

#[test]
#[parallel]
fn test_reload_is_atomic() {
    let token = TestToken::new();
    let mut record = store(&token, 1, "stored");
    let before = record.clone();

    let broken = AttributeTemplate::new()
        .with(Attribute::from_ulong(AttributeKind::Class, CKO_PUBLIC_KEY))
        .with(Attribute::from_ulong(AttributeKind::KeyType, CKK_RSA));
    let handle = ret_or_panic!(token.card.put_object(broken));

    let mut session = token.session(false);
    assert_eq!(
        err_kind!(record.reload(session.as_mut(), handle)),
        ErrorKind::MalformedObject
    );
    assert_eq!(record, before);

    let good = find_class(&token, CKO_PUBLIC_KEY)[0];
    ret_or_panic!(record.reload(session.as_mut(), good));
    assert_eq!(record, before);
}

#[test]
#[parallel]
fn test_delete_from_token() {
    let token = TestToken::new();
    let record = store(&token, 1, "key");
    let other = store(&token, 2, "other");

    /* declining leaves everything in place */
    let mut ui = TestUi::new();
    let report = ret_or_panic!(record.delete_from_token(&token.env, &mut ui));
    assert!(report.is_none());
    assert_eq!(ui.questions.len(), 1);
    assert!(ui.questions[0].contains(TOKEN_SERIAL));
    assert_eq!(token.object_count(), 4);

    let mut ui = TestUi::new();
    ui.answers.push_back(true);
    let report = ret_or_panic!(record.delete_from_token(&token.env, &mut ui));
    let report = match report {
        Some(r) => r,
        None => panic!("deletion was not confirmed"),
    };
    assert!(report.is_complete());
    assert_eq!(report.deleted.len(), 2);
    assert_eq!(token.object_count(), 2);

    /* the other key is untouched */
    let mut session = token.session(false);
    let remaining = find_class(&token, CKO_PUBLIC_KEY)[0];
    let loaded =
        ret_or_panic!(TokenKeyRecord::load_token(session.as_mut(), remaining));
    assert_eq!(loaded.object_id(), other.object_id());
}

#[test]
#[parallel]
fn test_delete_all_matches() {
    let token = TestToken::new();
    let record = store(&token, 1, "key");

    /* a stray copy of the public object with the same id */
    let mut dup = ret_or_panic!(codec::public_template(&rsa_material(1)));
    dup.set(record.id_attribute());
    ret_or_panic!(token.card.put_object(dup));
    assert_eq!(token.object_count(), 3);

    let mut ui = TestUi::new();
    ui.answers.push_back(true);
    let report = ret_or_panic!(record.delete_from_token(&token.env, &mut ui));
    assert_eq!(report.map(|r| r.deleted.len()), Some(3));
    assert_eq!(token.object_count(), 0);
}

#[test]
#[parallel]
fn test_rename_on_token() {
    let token = TestToken::new();
    let mut record = store(&token, 1, "old name");

    let mut ui = TestUi::new();
    assert!(ret_or_panic!(record.rename_on_token(
        &token.env,
        "new name",
        &mut ui
    )));
    assert_eq!(record.slot_label(), "new name");
    for class in [CKO_PUBLIC_KEY, CKO_PRIVATE_KEY] {
        let attrs = attrs_of(&token, class);
        assert_eq!(
            ret_or_panic!(attrs.get_string(AttributeKind::Label)),
            "new name"
        );
    }

    /* without a private object nothing changes */
    let handle = find_class(&token, CKO_PRIVATE_KEY)[0];
    let mut session = token.login();
    ret_or_panic!(session.destroy_object(handle));
    let mut ui = TestUi::new();
    assert!(!ret_or_panic!(record.rename_on_token(
        &token.env,
        "third",
        &mut ui
    )));
    assert_eq!(record.slot_label(), "new name");
    let attrs = attrs_of(&token, CKO_PUBLIC_KEY);
    assert_eq!(
        ret_or_panic!(attrs.get_string(AttributeKind::Label)),
        "new name"
    );
}

#[test]
#[parallel]
fn test_private_key_handle() {
    let token = TestToken::new();
    let record = store(&token, 1, "key");
    let expected = find_class(&token, CKO_PRIVATE_KEY)[0];

    let mut ui = TestUi::new();
    let location =
        ret_or_panic!(record.private_key_handle(&token.env, &mut ui));
    assert_eq!(location.slot, token.slot);
    assert_eq!(location.handle, expected);
    assert!(location.session.is_logged_in());

    /* two private objects for the same key is an error */
    let mut dup = ret_or_panic!(codec::private_template(&rsa_material(1)));
    dup.set(record.id_attribute());
    dup.set(Attribute::from_bool(AttributeKind::Private, true));
    ret_or_panic!(token.card.put_object(dup));
    let mut ui = TestUi::new();
    assert_eq!(
        err_kind!(record.private_key_handle(&token.env, &mut ui)),
        ErrorKind::AmbiguousMatch
    );
}

#[test]
#[parallel]
fn test_private_key_requires_card() {
    let token = TestToken::new();
    let record = store(&token, 1, "key");
    let card = ret_or_panic!(token.backend.remove(token.slot));
    assert!(card.is_some());

    let mut ui = TestUi::new();
    assert_eq!(
        err_kind!(record.private_key_handle(&token.env, &mut ui)),
        ErrorKind::CardNotPresent
    );
    assert_eq!(ui.confirm_prompts.len(), 1);
    assert!(ui.pin_prompts.is_empty());
}

#[test]
#[parallel]
fn test_change_pin() {
    let token = TestToken::new();
    let record = store(&token, 1, "key");

    let mut ui = TestUi::with_pins(&[Some(USER_PIN), Some("87654321")]);
    ret_or_panic!(record.change_pin(&token.env, false, &mut ui));
    assert_eq!(ui.pin_prompts.len(), 2);

    let mut session = token.session(false);
    assert!(!ret_or_panic!(session.login(USER_PIN.as_bytes(), false)));
    assert!(ret_or_panic!(session.login(b"87654321", false)));

    let mut ui = TestUi::with_pins(&[Some("wrong")]);
    assert_eq!(
        err_kind!(record.change_pin(&token.env, false, &mut ui)),
        ErrorKind::AuthenticationFailed
    );
}

#[test]
#[parallel]
fn test_init_pin() {
    let token = TestToken::new();
    let record = store(&token, 1, "key");
    ret_or_panic!(token.card.set_so_pin("so-secret"));

    let mut ui = TestUi::with_pins(&[Some("so-secret"), Some("fresh")]);
    ret_or_panic!(record.init_pin(&token.env, &mut ui));

    let mut session = token.session(false);
    assert!(ret_or_panic!(session.login(b"fresh", false)));
}

#[test]
#[parallel]
fn test_record_digests() {
    let token = TestToken::new();
    let record = store(&token, 1, "key");
    let mut config = Config::default();

    assert_eq!(record.possible_digests(&config).len(), 6);
    config.only_token_hashes = true;
    assert_eq!(
        record.possible_digests(&config),
        vec![Digest::Sha1, Digest::Sha256]
    );
    assert_eq!(record.default_digest(), Digest::Sha1);
}
