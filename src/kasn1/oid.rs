// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! OIDs used to describe public keys and certificate subjects

pub const RSA_OID: asn1::ObjectIdentifier =
    asn1::oid!(1, 2, 840, 113549, 1, 1, 1);
pub const DSA_OID: asn1::ObjectIdentifier = asn1::oid!(1, 2, 840, 10040, 4, 1);
pub const EC_OID: asn1::ObjectIdentifier = asn1::oid!(1, 2, 840, 10045, 2, 1);

pub const EC_SECP256R1: asn1::ObjectIdentifier =
    asn1::oid!(1, 2, 840, 10045, 3, 1, 7);
pub const EC_SECP384R1: asn1::ObjectIdentifier = asn1::oid!(1, 3, 132, 0, 34);
pub const EC_SECP521R1: asn1::ObjectIdentifier = asn1::oid!(1, 3, 132, 0, 35);

pub const COMMON_NAME_OID: asn1::ObjectIdentifier = asn1::oid!(2, 5, 4, 3);
pub const ORGANIZATION_NAME_OID: asn1::ObjectIdentifier =
    asn1::oid!(2, 5, 4, 10);
pub const ORGANIZATIONAL_UNIT_NAME_OID: asn1::ObjectIdentifier =
    asn1::oid!(2, 5, 4, 11);
pub const EMAIL_ADDRESS_OID: asn1::ObjectIdentifier =
    asn1::oid!(1, 2, 840, 113549, 1, 9, 1);
