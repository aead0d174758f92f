// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Catalogue of the named curves supported for EC keys and conversions
//! between curve names and the DER encoded CKA_EC_PARAMS value

use crate::error::{Error, ErrorKind, Result};
use crate::kasn1::oid;

/// Defined in ANSI X9.62, without the explicit parameters CHOICE
#[derive(asn1::Asn1Read, asn1::Asn1Write)]
enum ECParameters<'a> {
    /// Aka namedCurve, an oid that identifies the curve
    OId(asn1::ObjectIdentifier),
    /// Parameters defined out of band, never used
    ImplicitlyCA(asn1::Null),
    /// Identifies the curve via its standard printable name
    CurveName(asn1::PrintableString<'a>),
}

pub const NAME_SECP256R1: &str = "prime256v1";
pub const NAME_SECP384R1: &str = "secp384r1";
pub const NAME_SECP521R1: &str = "secp521r1";

const ALIAS_SECP256R1: &str = "secp256r1";

const BITS_SECP256R1: usize = 256;
const BITS_SECP384R1: usize = 384;
const BITS_SECP521R1: usize = 521;

fn unsupported_curve(what: &str) -> Error {
    Error::with_msg(
        ErrorKind::UnsupportedAlgorithm,
        format!("unsupported curve {}", what),
    )
}

fn name_to_oid(name: &str) -> Result<asn1::ObjectIdentifier> {
    match name {
        NAME_SECP256R1 | ALIAS_SECP256R1 => Ok(oid::EC_SECP256R1),
        NAME_SECP384R1 => Ok(oid::EC_SECP384R1),
        NAME_SECP521R1 => Ok(oid::EC_SECP521R1),
        _ => Err(unsupported_curve(name)),
    }
}

fn oid_to_name(o: &asn1::ObjectIdentifier) -> Result<&'static str> {
    match *o {
        oid::EC_SECP256R1 => Ok(NAME_SECP256R1),
        oid::EC_SECP384R1 => Ok(NAME_SECP384R1),
        oid::EC_SECP521R1 => Ok(NAME_SECP521R1),
        _ => Err(unsupported_curve(&o.to_string())),
    }
}

/// Returns the canonical name of a supported curve
pub fn canonical_curve_name(name: &str) -> Result<&'static str> {
    oid_to_name(&name_to_oid(name)?)
}

/// Returns the DER encoded CKA_EC_PARAMS for a named curve
///
/// Fails with [ErrorKind::UnsupportedAlgorithm] for unknown curves
pub fn curve_name_to_ec_params(name: &str) -> Result<Vec<u8>> {
    let oid = name_to_oid(name)?;
    Ok(asn1::write_single(&ECParameters::OId(oid))?)
}

/// Returns the canonical curve name for a DER encoded CKA_EC_PARAMS
pub fn ec_params_to_curve_name(params: &[u8]) -> Result<&'static str> {
    match asn1::parse_single::<ECParameters>(params) {
        Ok(ECParameters::OId(o)) => oid_to_name(&o),
        Ok(ECParameters::CurveName(name)) => {
            canonical_curve_name(name.as_str())
        }
        Ok(ECParameters::ImplicitlyCA(_)) => {
            Err(unsupported_curve("implicitCA"))
        }
        Err(e) => Err(Error::with_origin(ErrorKind::MalformedObject, e)),
    }
}

/// Returns the size in bits of a named curve
pub fn curve_bits(name: &str) -> Result<usize> {
    match canonical_curve_name(name)? {
        NAME_SECP256R1 => Ok(BITS_SECP256R1),
        NAME_SECP384R1 => Ok(BITS_SECP384R1),
        _ => Ok(BITS_SECP521R1),
    }
}

/// Size of an uncompressed point on the named curve
pub fn point_size(name: &str) -> Result<usize> {
    Ok(2 * ((curve_bits(name)? + 7) / 8) + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ec_params_roundtrip_names() {
        for name in [NAME_SECP256R1, NAME_SECP384R1, NAME_SECP521R1] {
            let params = curve_name_to_ec_params(name).unwrap();
            assert_eq!(ec_params_to_curve_name(&params).unwrap(), name);
        }
        assert_eq!(
            curve_name_to_ec_params(ALIAS_SECP256R1).unwrap(),
            curve_name_to_ec_params(NAME_SECP256R1).unwrap()
        );
    }

    #[test]
    fn prime256v1_encoding() {
        assert_eq!(
            curve_name_to_ec_params(NAME_SECP256R1).unwrap(),
            hex::decode("06082a8648ce3d030107").unwrap()
        );
    }

    #[test]
    fn unknown_curve() {
        let err = curve_name_to_ec_params("brainpoolP256r1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAlgorithm);
    }

    #[test]
    fn point_sizes() {
        assert_eq!(point_size(NAME_SECP256R1).unwrap(), 65);
        assert_eq!(point_size(NAME_SECP521R1).unwrap(), 133);
    }
}
