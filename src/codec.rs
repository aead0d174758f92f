// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Conversions between [AsymmetricKeyMaterial] and the attribute
//! templates used to create, find and read key objects on a token.

use crate::attribute::{Attribute, AttributeKind, AttributeTemplate};
use crate::ecc;
use crate::error::{Error, ErrorKind, Result};
use crate::key::*;
use crate::pkcs11::*;

/// The attributes needed to decode a public key object of any family
pub const PUBLIC_KEY_ATTRIBUTES: [AttributeKind; 9] = [
    AttributeKind::KeyType,
    AttributeKind::Modulus,
    AttributeKind::PublicExponent,
    AttributeKind::Prime,
    AttributeKind::Subprime,
    AttributeKind::Base,
    AttributeKind::Value,
    AttributeKind::EcParams,
    AttributeKind::EcPoint,
];

/// Wraps a raw EC point in a DER OCTET STRING, the form stored in
/// CKA_EC_POINT
pub fn wrap_ec_point(point: &[u8]) -> Result<Vec<u8>> {
    Ok(asn1::write_single(&point)?)
}

/// Extracts the raw EC point from a CKA_EC_POINT value
///
/// Some tokens store the raw point instead of the DER wrapped one, both
/// forms are accepted. When the curve is known the expected point size
/// is used to tell the two forms apart.
pub fn unwrap_ec_point(params: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let expected = ecc::ec_params_to_curve_name(params)
        .and_then(ecc::point_size)
        .ok();
    let wrapped = asn1::parse_single::<&[u8]>(data).ok();
    match (expected, wrapped) {
        (Some(size), Some(inner)) if inner.len() == size => {
            Ok(inner.to_vec())
        }
        (Some(size), _) if data.len() == size => Ok(data.to_vec()),
        (None, Some(inner)) => Ok(inner.to_vec()),
        (None, None) if !data.is_empty() => Ok(data.to_vec()),
        _ => Err(Error::with_msg(
            ErrorKind::MalformedObject,
            "invalid EC point encoding",
        )),
    }
}

fn add_identity(
    tmpl: &mut AttributeTemplate,
    material: &AsymmetricKeyMaterial,
) {
    tmpl.set(Attribute::from_ulong(
        AttributeKind::KeyType,
        material.family().key_type(),
    ));
    match material {
        AsymmetricKeyMaterial::Rsa { public, .. } => {
            tmpl.set(Attribute::from_biguint(
                AttributeKind::Modulus,
                &public.modulus,
            ));
            tmpl.set(Attribute::from_biguint(
                AttributeKind::PublicExponent,
                &public.public_exponent,
            ));
        }
        AsymmetricKeyMaterial::Dsa { public, .. } => {
            tmpl.set(Attribute::from_biguint(
                AttributeKind::Prime,
                &public.prime,
            ));
            tmpl.set(Attribute::from_biguint(
                AttributeKind::Subprime,
                &public.subprime,
            ));
            tmpl.set(Attribute::from_biguint(
                AttributeKind::Base,
                &public.base,
            ));
        }
        AsymmetricKeyMaterial::Ec { public, .. } => {
            tmpl.set(Attribute::from_bytes(
                AttributeKind::EcParams,
                public.params.clone(),
            ));
        }
    }
}

/// Returns the template that identifies the public or private object
/// holding this key, without any CKA_ID
///
/// The template carries the object class, the key type and the public
/// components that are present on both halves of a key pair.
pub fn identity_template(
    material: &AsymmetricKeyMaterial,
    class: CK_OBJECT_CLASS,
) -> AttributeTemplate {
    let mut tmpl = AttributeTemplate::with_capacity(5);
    tmpl.set(Attribute::from_ulong(AttributeKind::Class, class));
    add_identity(&mut tmpl, material);
    tmpl
}

/// Returns the template describing a public key object
pub fn public_template(
    material: &AsymmetricKeyMaterial,
) -> Result<AttributeTemplate> {
    let mut tmpl = identity_template(material, CKO_PUBLIC_KEY);
    match material {
        AsymmetricKeyMaterial::Rsa { .. } => (),
        AsymmetricKeyMaterial::Dsa { public, .. } => {
            tmpl.set(Attribute::from_biguint(
                AttributeKind::Value,
                &public.value,
            ));
        }
        AsymmetricKeyMaterial::Ec { public, .. } => {
            tmpl.set(Attribute::from_bytes(
                AttributeKind::EcPoint,
                wrap_ec_point(&public.point)?,
            ));
        }
    }
    Ok(tmpl)
}

fn secret_attribute(kind: AttributeKind, val: &SecretUint) -> Attribute {
    Attribute::from_bytes(kind, secret_uint(val).to_vec())
}

/// Returns the template describing a private key object
///
/// Fails with [ErrorKind::MalformedObject] if the material has no
/// private components
pub fn private_template(
    material: &AsymmetricKeyMaterial,
) -> Result<AttributeTemplate> {
    let mut tmpl = identity_template(material, CKO_PRIVATE_KEY);
    tmpl.set_zeroize();
    match material {
        AsymmetricKeyMaterial::Rsa {
            private: Some(private),
            ..
        } => {
            for (kind, val) in [
                (AttributeKind::PrivateExponent, &private.private_exponent),
                (AttributeKind::Prime1, &private.prime1),
                (AttributeKind::Prime2, &private.prime2),
                (AttributeKind::Exponent1, &private.exponent1),
                (AttributeKind::Exponent2, &private.exponent2),
                (AttributeKind::Coefficient, &private.coefficient),
            ] {
                tmpl.set(secret_attribute(kind, val));
            }
        }
        AsymmetricKeyMaterial::Dsa {
            private: Some(private),
            ..
        } => {
            tmpl.set(secret_attribute(AttributeKind::Value, &private.value));
        }
        AsymmetricKeyMaterial::Ec {
            private: Some(private),
            ..
        } => {
            tmpl.set(secret_attribute(AttributeKind::Value, &private.value));
        }
        _ => {
            return Err(Error::with_msg(
                ErrorKind::MalformedObject,
                "key material has no private components",
            ))
        }
    }
    Ok(tmpl)
}

/// Reconstructs the public key from the attributes of a public key
/// object
///
/// Fails with [ErrorKind::UnsupportedAlgorithm] for key types other than
/// RSA, DSA and EC, and with [ErrorKind::MalformedObject] if a required
/// attribute is missing or can't be interpreted
pub fn decode_public_key(
    tmpl: &AttributeTemplate,
) -> Result<AsymmetricKeyMaterial> {
    let family =
        KeyFamily::from_key_type(tmpl.get_ulong(AttributeKind::KeyType)?)?;
    let public = match family {
        KeyFamily::Rsa => PublicKey::Rsa(RsaPublicKey {
            modulus: tmpl.get_biguint(AttributeKind::Modulus)?,
            public_exponent: tmpl.get_biguint(AttributeKind::PublicExponent)?,
        }),
        KeyFamily::Dsa => PublicKey::Dsa(DsaPublicKey {
            prime: tmpl.get_biguint(AttributeKind::Prime)?,
            subprime: tmpl.get_biguint(AttributeKind::Subprime)?,
            base: tmpl.get_biguint(AttributeKind::Base)?,
            value: tmpl.get_biguint(AttributeKind::Value)?,
        }),
        KeyFamily::Ec => {
            let params = tmpl.get_bytes(AttributeKind::EcParams)?.clone();
            let point = unwrap_ec_point(
                &params,
                tmpl.get_bytes(AttributeKind::EcPoint)?,
            )?;
            PublicKey::Ec(EcPublicKey {
                params: params,
                point: point,
            })
        }
    };
    Ok(AsymmetricKeyMaterial::from(public))
}
