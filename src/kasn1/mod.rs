// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Helpers to use with the [asn1] crate

use std::borrow::Cow;

use crate::error::{Error, ErrorKind, Result};

use num_bigint::BigUint;
use zeroize::Zeroize;

/// An unsigned big integer DER encoded as an ASN.1 INTEGER
///
/// Accepts big-endian magnitudes and adds or strips leading zeros as
/// needed to produce a valid positive INTEGER encoding
pub struct DerEncBigUint<'a> {
    data: Cow<'a, [u8]>,
}

impl<'a> DerEncBigUint<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::with_msg(
                ErrorKind::MalformedObject,
                "empty integer",
            ));
        }
        let de = if data[0] & 0x80 == 0x80 {
            let mut v = Vec::with_capacity(data.len() + 1);
            v.push(0);
            v.extend_from_slice(data);
            DerEncBigUint {
                data: Cow::Owned(v),
            }
        } else {
            /* Skip leading zeroes that do not affect the sign */
            let mut skip = 0;
            while data[skip] == 0
                && skip + 1 < data.len()
                && data[skip + 1] & 0x80 == 0
            {
                skip += 1;
            }
            DerEncBigUint {
                data: Cow::from(&data[skip..]),
            }
        };
        match asn1::BigUint::new(&de.data) {
            Some(_) => Ok(de),
            None => Err(Error::with_msg(
                ErrorKind::MalformedObject,
                "invalid integer encoding",
            )),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get the magnitude bytes without leading zero bytes
    pub fn as_nopad_bytes(&self) -> &[u8] {
        let skip = self.data.iter().take_while(|b| **b == 0).count();
        &self.data[skip..]
    }

    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(self.as_nopad_bytes())
    }
}

impl Drop for DerEncBigUint<'_> {
    fn drop(&mut self) {
        if let Cow::Owned(_) = &self.data {
            self.data.to_mut().zeroize()
        }
    }
}

impl<'a> asn1::SimpleAsn1Readable<'a> for DerEncBigUint<'a> {
    const TAG: asn1::Tag = asn1::BigUint::TAG;
    fn parse_data(data: &'a [u8]) -> asn1::ParseResult<Self> {
        match DerEncBigUint::new(data) {
            Ok(x) => Ok(x),
            Err(_) => {
                Err(asn1::ParseError::new(asn1::ParseErrorKind::InvalidValue))
            }
        }
    }
}

impl asn1::SimpleAsn1Writable for DerEncBigUint<'_> {
    const TAG: asn1::Tag = asn1::BigUint::TAG;
    fn write_data(&self, dest: &mut asn1::WriteBuf) -> asn1::WriteResult {
        dest.push_slice(self.as_bytes())
    }
}

pub mod oid;
pub mod pkcs;
pub mod x509;
