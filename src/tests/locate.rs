// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

use crate::attribute::*;
use crate::codec;
use crate::locator::*;
use crate::record::*;

use serial_test::parallel;

fn fingerprint_of(label: &str, serial: &str) -> CardFingerprint {
    CardFingerprint {
        manufacturer: String::from("Tokenkey"),
        model: String::from("Memory Card"),
        label: label.to_string(),
        serial: serial.to_string(),
    }
}

fn record_for(label: &str, serial: &str) -> TokenKeyRecord {
    TokenKeyRecord::new(
        fingerprint_of(label, serial),
        String::from("key"),
        vec![0x42; 8],
        rsa_material(1).public_key(),
    )
}

#[test]
#[parallel]
fn test_locate_inserted_card() {
    let token = TestToken::with_card("A", "1");
    ret_or_panic!(token.backend.insert(3, MemoryCard::new("B", "2", "0000")));

    let fp = fingerprint_of("B", "2");
    let mut ui = TestUi::new();
    let mut locator = CardLocator::new(&fp);
    let backend = ret_or_panic!(token.env.backend());
    assert_eq!(
        ret_or_panic!(locator.step(backend, &mut ui)),
        LocatorState::Found(3)
    );
    assert_eq!(locator.attempts(), 1);
    assert!(ui.confirm_prompts.is_empty());

    /* terminal states do not enumerate again */
    assert_eq!(
        ret_or_panic!(locator.step(backend, &mut ui)),
        LocatorState::Found(3)
    );
    assert_eq!(locator.attempts(), 1);
}

#[test]
#[parallel]
fn test_label_and_serial_must_both_match() {
    let token = TestToken::with_card("A", "1");
    ret_or_panic!(token.backend.insert(2, MemoryCard::new("A", "2", "0000")));
    ret_or_panic!(token.backend.insert(3, MemoryCard::new("B", "1", "0000")));

    let fp = fingerprint_of("A", "2");
    let mut ui = TestUi::new();
    let slot = ret_or_panic!(CardLocator::new(&fp).run(&token.env, &mut ui));
    assert_eq!(slot, 2);
}

#[test]
#[parallel]
fn test_user_cancels() {
    let token = TestToken::with_card("A", "1");
    let fp = fingerprint_of("B", "2");
    let mut ui = TestUi::new();
    ui.confirms.extend([true, true, false]);

    let mut locator = CardLocator::new(&fp);
    assert_eq!(
        err_kind!(locator.run(&token.env, &mut ui)),
        ErrorKind::CardNotPresent
    );
    assert_eq!(locator.state(), LocatorState::Cancelled);
    assert_eq!(locator.attempts(), 3);
    assert_eq!(ui.confirm_prompts.len(), 3);
    for prompt in &ui.confirm_prompts {
        assert_eq!(prompt, &fp.insert_prompt());
    }
}

#[test]
#[parallel]
fn test_card_inserted_while_prompting() {
    let token = TestToken::with_card("A", "1");
    let fp = fingerprint_of("B", "2");
    let backend = token.backend.clone();
    let mut ui = TestUi::new();
    ui.confirms.extend([true, true]);
    ui.on_confirm = Some(Box::new(move |count| {
        if count == 2 {
            ret_or_panic!(backend.insert(7, MemoryCard::new("B", "2", "0")));
        }
    }));

    let mut locator = CardLocator::new(&fp);
    assert_eq!(ret_or_panic!(locator.run(&token.env, &mut ui)), 7);
    assert_eq!(locator.attempts(), 3);
    assert_eq!(ui.confirm_prompts.len(), 2);
}

#[test]
#[parallel]
fn test_unloaded_environment() {
    let fp = fingerprint_of("A", "1");
    let env = TokenEnvironment::new();
    let mut ui = TestUi::new();
    assert_eq!(
        err_kind!(CardLocator::new(&fp).run(&env, &mut ui)),
        ErrorKind::NotLoaded
    );
}

fn put_public(token: &TestToken, record: &TokenKeyRecord, seed: u8) {
    let mut tmpl = ret_or_panic!(codec::public_template(&rsa_material(seed)));
    tmpl.set(record.id_attribute());
    tmpl.set(Attribute::from_bool(AttributeKind::Private, false));
    ret_or_panic!(token.card.put_object(tmpl));
}

#[test]
#[parallel]
fn test_verify_public_key() {
    let token = TestToken::with_card("A", "1");
    let record = record_for("A", "1");
    let mut ui = TestUi::new();

    assert!(!ret_or_panic!(verify_public_key(
        &token.env,
        token.slot,
        &record,
        &mut ui
    )));
    assert_eq!(
        err_kind!(prepare_card(&token.env, &record, true, &mut ui)),
        ErrorKind::ObjectNotFound
    );
    /* without verification locating the card is enough */
    assert_eq!(
        ret_or_panic!(prepare_card(&token.env, &record, false, &mut ui)),
        token.slot
    );

    put_public(&token, &record, 1);
    assert!(ret_or_panic!(verify_public_key(
        &token.env,
        token.slot,
        &record,
        &mut ui
    )));
    assert!(ui.notices.is_empty());
}

#[test]
#[parallel]
fn test_verify_reports_mismatch() {
    let token = TestToken::with_card("A", "1");
    let record = record_for("A", "1");
    put_public(&token, &record, 9);

    let mut ui = TestUi::new();
    assert_eq!(
        err_kind!(prepare_card(&token.env, &record, true, &mut ui)),
        ErrorKind::ObjectNotFound
    );
    assert_eq!(
        ui.notices,
        vec![String::from("Public Key mismatch. Please re-import card")]
    );

    /* a matching candidate among mismatching ones is enough */
    put_public(&token, &record, 1);
    let mut ui = TestUi::new();
    assert_eq!(
        ret_or_panic!(prepare_card(&token.env, &record, true, &mut ui)),
        token.slot
    );
    assert_eq!(ui.notices.len(), 1);
}

#[test]
#[parallel]
fn test_mismatch_without_object_id_is_silent() {
    let token = TestToken::with_card("A", "1");
    let mut record = record_for("A", "1");
    record.object_id = Vec::new();
    put_public(&token, &record, 9);

    let mut ui = TestUi::new();
    assert!(!ret_or_panic!(verify_public_key(
        &token.env,
        token.slot,
        &record,
        &mut ui
    )));
    assert!(ui.notices.is_empty());
}
