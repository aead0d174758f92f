// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use super::*;

use crate::attribute::*;
use crate::codec;
use crate::ecc;
use crate::key::*;
use crate::pkcs11::*;

use serial_test::parallel;
use zeroize::Zeroizing;

/// Reads back the public half from the template a token would store
fn through_template(material: &AsymmetricKeyMaterial) -> PublicKey {
    let tmpl = ret_or_panic!(codec::public_template(material));
    ret_or_panic!(codec::decode_public_key(&tmpl)).public_key()
}

#[test]
#[parallel]
fn test_public_template_roundtrip() {
    for material in [rsa_material(1), dsa_material(2), ec_material(3)] {
        assert_eq!(through_template(&material), material.public_key());
    }
}

#[test]
#[parallel]
fn test_public_template_contents() {
    let tmpl = ret_or_panic!(codec::public_template(&rsa_material(1)));
    assert_eq!(
        ret_or_panic!(tmpl.get_ulong(AttributeKind::Class)),
        CKO_PUBLIC_KEY
    );
    assert_eq!(ret_or_panic!(tmpl.get_ulong(AttributeKind::KeyType)), CKK_RSA);
    let modulus = ret_or_panic!(tmpl.get_bytes(AttributeKind::Modulus));
    assert_eq!(modulus.len(), 256);
    assert!(tmpl.get(AttributeKind::PrivateExponent).is_none());

    /* EC points are stored DER wrapped */
    let tmpl = ret_or_panic!(codec::public_template(&ec_material(3)));
    let point = ret_or_panic!(tmpl.get_bytes(AttributeKind::EcPoint));
    assert_eq!(point.len(), 67);
    assert_eq!(&point[..3], &[0x04, 0x41, 0x04]);
}

#[test]
#[parallel]
fn test_private_template() {
    let tmpl = ret_or_panic!(codec::private_template(&rsa_material(1)));
    assert_eq!(
        ret_or_panic!(tmpl.get_ulong(AttributeKind::Class)),
        CKO_PRIVATE_KEY
    );
    for kind in [
        AttributeKind::Modulus,
        AttributeKind::PublicExponent,
        AttributeKind::PrivateExponent,
        AttributeKind::Prime1,
        AttributeKind::Prime2,
        AttributeKind::Exponent1,
        AttributeKind::Exponent2,
        AttributeKind::Coefficient,
    ] {
        assert!(tmpl.get(kind).is_some(), "{} missing", kind.name());
    }

    let tmpl = ret_or_panic!(codec::private_template(&ec_material(3)));
    assert!(tmpl.get(AttributeKind::Value).is_some());
    assert!(tmpl.get(AttributeKind::EcPoint).is_none());

    let public_only = AsymmetricKeyMaterial::from(dsa_material(2).public_key());
    assert_eq!(
        err_kind!(codec::private_template(&public_only)),
        ErrorKind::MalformedObject
    );
}

#[test]
#[parallel]
fn test_private_components_are_canonical() {
    assert_eq!(secret_uint(&[0, 0, 1, 2]).as_slice(), &[1, 2]);
    assert_eq!(secret_uint(&[0, 0]).as_slice(), &[0]);
    assert_eq!(secret_uint(b"").as_slice(), &[0]);

    let material = AsymmetricKeyMaterial::Dsa {
        public: match dsa_material(2).public_key() {
            PublicKey::Dsa(k) => k,
            _ => unreachable!(),
        },
        private: Some(DsaPrivateKey {
            value: Zeroizing::new(vec![0, 0, 0x12, 0x34]),
        }),
    };
    let tmpl = ret_or_panic!(codec::private_template(&material));
    assert_eq!(
        ret_or_panic!(tmpl.get_bytes(AttributeKind::Value)),
        &vec![0x12, 0x34]
    );
}

#[test]
#[parallel]
fn test_identity_template() {
    let material = dsa_material(2);
    let tmpl = codec::identity_template(&material, CKO_PRIVATE_KEY);
    assert_eq!(
        tmpl.kinds(),
        vec![
            AttributeKind::Class,
            AttributeKind::KeyType,
            AttributeKind::Prime,
            AttributeKind::Subprime,
            AttributeKind::Base,
        ]
    );
    /* both halves of the pair match their identity */
    let public = ret_or_panic!(codec::public_template(&material));
    let identity = codec::identity_template(&material, CKO_PUBLIC_KEY);
    assert!(public.matches(&identity));
    let private = ret_or_panic!(codec::private_template(&material));
    assert!(private.matches(&tmpl));
}

#[test]
#[parallel]
fn test_raw_ec_point_accepted() {
    let material = ec_material(5);
    let mut tmpl = ret_or_panic!(codec::public_template(&material));
    let raw = match &material {
        AsymmetricKeyMaterial::Ec { public, .. } => public.point.clone(),
        _ => unreachable!(),
    };
    tmpl.set(Attribute::from_bytes(AttributeKind::EcPoint, raw));
    let decoded = ret_or_panic!(codec::decode_public_key(&tmpl));
    assert_eq!(decoded.public_key(), material.public_key());
}

#[test]
#[parallel]
fn test_decode_failures() {
    let tmpl = AttributeTemplate::new()
        .with(Attribute::from_ulong(AttributeKind::KeyType, CKK_AES));
    assert_eq!(
        err_kind!(codec::decode_public_key(&tmpl)),
        ErrorKind::UnsupportedAlgorithm
    );

    let mut tmpl = ret_or_panic!(codec::public_template(&rsa_material(1)));
    tmpl.remove(AttributeKind::Modulus);
    assert_eq!(
        err_kind!(codec::decode_public_key(&tmpl)),
        ErrorKind::MalformedObject
    );

    let mut tmpl = ret_or_panic!(codec::public_template(&ec_material(3)));
    tmpl.set(Attribute::from_bytes(AttributeKind::EcPoint, vec![0x04, 1, 2]));
    assert_eq!(
        err_kind!(codec::decode_public_key(&tmpl)),
        ErrorKind::MalformedObject
    );
}

#[test]
#[parallel]
fn test_spki_roundtrip() {
    for material in [rsa_material(7), dsa_material(8), ec_material(9)] {
        let key = material.public_key();
        let der = ret_or_panic!(key.to_der());
        assert_eq!(ret_or_panic!(PublicKey::from_der(&der)), key);
    }
}

#[test]
#[parallel]
fn test_spki_strict_parsing() {
    let mut der = ret_or_panic!(rsa_material(7).public_key().to_der());
    der.push(0);
    assert_eq!(
        err_kind!(PublicKey::from_der(&der)),
        ErrorKind::IntegrityError
    );
    assert_eq!(
        err_kind!(PublicKey::from_der(&der[..10])),
        ErrorKind::IntegrityError
    );
}

#[test]
#[parallel]
fn test_key_sizes() {
    assert_eq!(ret_or_panic!(rsa_material(1).public_key().bits()), 2048);
    assert_eq!(ret_or_panic!(dsa_material(1).public_key().bits()), 1024);
    assert_eq!(ret_or_panic!(ec_material(1).public_key().bits()), 256);
}

#[test]
#[parallel]
fn test_public_key_equality() {
    assert_ne!(rsa_material(1).public_key(), rsa_material(2).public_key());
    assert_ne!(ec_material(1).public_key(), ec_material(2).public_key());

    let p384 = ret_or_panic!(ecc::curve_name_to_ec_params("secp384r1"));
    let mut other_curve = match ec_material(1).public_key() {
        PublicKey::Ec(k) => k,
        _ => unreachable!(),
    };
    other_curve.params = p384;
    assert_ne!(PublicKey::Ec(other_curve), ec_material(1).public_key());
}
