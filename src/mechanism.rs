// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Maps the signing mechanisms advertised by a token to the message
//! digests that can be used with a token key.

use std::fmt;

use crate::key::KeyFamily;
use crate::pkcs11::*;

/// Message digest algorithms usable with token signing mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Digest {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Ripemd160,
}

impl Digest {
    pub fn name(self) -> &'static str {
        match self {
            Digest::Md5 => "MD5",
            Digest::Sha1 => "SHA-1",
            Digest::Sha256 => "SHA-256",
            Digest::Sha384 => "SHA-384",
            Digest::Sha512 => "SHA-512",
            Digest::Ripemd160 => "RIPEMD-160",
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct SigningMechanism {
    mechanism: CK_MECHANISM_TYPE,
    family: KeyFamily,
    digest: Digest,
}

macro_rules! signing_mechanism {
    ($mech:expr, $family:ident, $digest:ident) => {
        SigningMechanism {
            mechanism: $mech,
            family: KeyFamily::$family,
            digest: Digest::$digest,
        }
    };
}

/// Signing mechanisms with a built-in digest, in default selection
/// priority order
static SIGNING_MECHANISMS: [SigningMechanism; 8] = [
    signing_mechanism!(CKM_SHA1_RSA_PKCS, Rsa, Sha1),
    signing_mechanism!(CKM_DSA_SHA1, Dsa, Sha1),
    signing_mechanism!(CKM_ECDSA_SHA1, Ec, Sha1),
    signing_mechanism!(CKM_SHA256_RSA_PKCS, Rsa, Sha256),
    signing_mechanism!(CKM_SHA384_RSA_PKCS, Rsa, Sha384),
    signing_mechanism!(CKM_SHA512_RSA_PKCS, Rsa, Sha512),
    signing_mechanism!(CKM_RIPEMD160_RSA_PKCS, Rsa, Ripemd160),
    signing_mechanism!(CKM_MD5_RSA_PKCS, Rsa, Md5),
];

/// The digests usable with a key family when the token restrictions
/// are not taken into account
pub fn generic_digests(family: KeyFamily) -> Vec<Digest> {
    match family {
        KeyFamily::Rsa => vec![
            Digest::Md5,
            Digest::Sha1,
            Digest::Sha256,
            Digest::Sha384,
            Digest::Sha512,
            Digest::Ripemd160,
        ],
        KeyFamily::Dsa | KeyFamily::Ec => vec![Digest::Sha1],
    }
}

/// Computes the digests allowed for a key of `family` on a token that
/// advertises `mechanisms`
///
/// Unless `only_token_hashes` is set, or when no advertised mechanism
/// maps to a digest, the generic list for the family is returned
pub fn possible_digests(
    family: KeyFamily,
    mechanisms: &[CK_MECHANISM_TYPE],
    only_token_hashes: bool,
) -> Vec<Digest> {
    if !only_token_hashes {
        return generic_digests(family);
    }
    let mut digests = Vec::new();
    for m in mechanisms {
        for s in &SIGNING_MECHANISMS {
            if s.mechanism == *m
                && s.family == family
                && !digests.contains(&s.digest)
            {
                digests.push(s.digest);
            }
        }
    }
    if digests.is_empty() {
        return generic_digests(family);
    }
    digests
}

/// Picks the default digest from the mechanisms a token advertises,
/// SHA-1 if none is known
pub fn default_digest(mechanisms: &[CK_MECHANISM_TYPE]) -> Digest {
    for s in &SIGNING_MECHANISMS {
        if mechanisms.contains(&s.mechanism) {
            return s.digest;
        }
    }
    Digest::Sha1
}
