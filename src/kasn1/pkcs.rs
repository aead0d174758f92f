// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! This module provides the [asn1] objects used to serialize public keys
//! as defined in [RFC 5280](https://www.rfc-editor.org/rfc/rfc5280),
//! [RFC 3279](https://www.rfc-editor.org/rfc/rfc3279) and
//! [RFC 8017](https://www.rfc-editor.org/rfc/rfc8017).

use crate::error::{Error, ErrorKind, Result};
use crate::kasn1::{oid, DerEncBigUint};

/// Identifies the algorithm of a public key and its parameters
#[derive(asn1::Asn1Read, asn1::Asn1Write)]
pub struct AlgorithmIdentifier<'a> {
    pub oid: asn1::DefinedByMarker<asn1::ObjectIdentifier>,
    #[defined_by(oid)]
    pub params: AlgorithmParameters<'a>,
}

/// Public key algorithms known to this crate
#[derive(asn1::Asn1DefinedByRead, asn1::Asn1DefinedByWrite)]
pub enum AlgorithmParameters<'a> {
    #[defined_by(oid::RSA_OID)]
    Rsa(Option<asn1::Null>),

    #[defined_by(oid::DSA_OID)]
    Dsa(DssParms<'a>),

    /// The curve parameters are carried as an opaque DER element, in the
    /// same form found in the CKA_EC_PARAMS attribute
    #[defined_by(oid::EC_OID)]
    Ec(asn1::Tlv<'a>),

    #[default]
    Other(asn1::ObjectIdentifier, Option<asn1::Tlv<'a>>),
}

/// DSA domain parameters
///
/// Defined in [RFC 3279](https://www.rfc-editor.org/rfc/rfc3279)
#[derive(asn1::Asn1Read, asn1::Asn1Write)]
pub struct DssParms<'a> {
    pub p: DerEncBigUint<'a>,
    pub q: DerEncBigUint<'a>,
    pub g: DerEncBigUint<'a>,
}

/// X.509 SubjectPublicKeyInfo
#[derive(asn1::Asn1Read, asn1::Asn1Write)]
pub struct SubjectPublicKeyInfo<'a> {
    pub algorithm: AlgorithmIdentifier<'a>,
    pub subject_public_key: asn1::BitString<'a>,
}

impl SubjectPublicKeyInfo<'_> {
    pub fn new<'a>(
        params: AlgorithmParameters<'a>,
        pubkey: &'a [u8],
    ) -> Result<SubjectPublicKeyInfo<'a>> {
        Ok(SubjectPublicKeyInfo {
            algorithm: AlgorithmIdentifier {
                oid: asn1::DefinedByMarker::marker(),
                params: params,
            },
            subject_public_key: asn1::BitString::new(pubkey, 0).ok_or(
                Error::with_msg(ErrorKind::MalformedObject, "bad bit string"),
            )?,
        })
    }

    /// DER-encode SubjectPublicKeyInfo.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(asn1::write_single(self)?)
    }
}

/// PKCS#1 RSAPublicKey
#[derive(asn1::Asn1Read, asn1::Asn1Write)]
pub struct RsaPublicKey<'a> {
    pub modulus: DerEncBigUint<'a>,
    pub public_exponent: DerEncBigUint<'a>,
}

impl RsaPublicKey<'_> {
    /// Constructs an `RsaPublicKey` from big-endian magnitudes
    pub fn new<'a>(
        modulus: &'a [u8],
        public_exponent: &'a [u8],
    ) -> Result<RsaPublicKey<'a>> {
        Ok(RsaPublicKey {
            modulus: DerEncBigUint::new(modulus)?,
            public_exponent: DerEncBigUint::new(public_exponent)?,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(asn1::write_single(self)?)
    }
}
