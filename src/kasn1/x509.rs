// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Minimal X.509 Name parsing, used to derive a display name from the
//! CKA_SUBJECT attribute of key objects

use crate::error::Result;
use crate::kasn1::oid;

#[derive(asn1::Asn1Read)]
struct AttributeTypeAndValue<'a> {
    typ: asn1::ObjectIdentifier,
    value: asn1::Tlv<'a>,
}

type RelativeDistinguishedName<'a> = asn1::SetOf<'a, AttributeTypeAndValue<'a>>;
type Name<'a> = asn1::SequenceOf<'a, RelativeDistinguishedName<'a>>;

/// Name components in order of preference
const PREFERRED: [asn1::ObjectIdentifier; 4] = [
    oid::COMMON_NAME_OID,
    oid::EMAIL_ADDRESS_OID,
    oid::ORGANIZATIONAL_UNIT_NAME_OID,
    oid::ORGANIZATION_NAME_OID,
];

fn directory_string(tlv: &asn1::Tlv<'_>) -> Option<String> {
    if let Ok(s) = tlv.parse::<asn1::Utf8String<'_>>() {
        return Some(s.as_str().to_string());
    }
    if let Ok(s) = tlv.parse::<asn1::PrintableString<'_>>() {
        return Some(s.as_str().to_string());
    }
    if let Ok(s) = tlv.parse::<asn1::IA5String<'_>>() {
        return Some(s.as_str().to_string());
    }
    if let Ok(s) = tlv.parse::<asn1::BMPString<'_>>() {
        let units: Vec<u16> = s
            .as_utf16_be_bytes()
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16(&units).ok();
    }
    None
}

/// Returns the most descriptive component of a DER encoded Name
///
/// Looks for a common name first, then an email address, an
/// organizational unit and finally an organization. Returns None if the
/// name carries none of them.
pub fn subject_display_name(der: &[u8]) -> Result<Option<String>> {
    let name = asn1::parse_single::<Name<'_>>(der)?;
    let mut best: Option<(usize, String)> = None;
    for rdn in name {
        for atv in rdn {
            let rank = match PREFERRED.iter().position(|o| *o == atv.typ) {
                Some(r) => r,
                None => continue,
            };
            if let Some((r, _)) = &best {
                if *r <= rank {
                    continue;
                }
            }
            if let Some(s) = directory_string(&atv.value) {
                best = Some((rank, s));
            }
        }
    }
    Ok(best.map(|(_, s)| s))
}
