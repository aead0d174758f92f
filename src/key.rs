// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! This module defines the asymmetric key material handled by the crate.
//!
//! Private material is always carried together with the public
//! components it belongs to, see [AsymmetricKeyMaterial]. Public keys
//! can be serialized to and from a DER SubjectPublicKeyInfo, which is the
//! form stored inside a token key record.

use std::fmt;

use crate::ecc;
use crate::error::{Error, ErrorKind, Result};
use crate::kasn1::pkcs::{self, AlgorithmParameters, DssParms};
use crate::kasn1::DerEncBigUint;
use crate::pkcs11::*;

use num_bigint::BigUint;
use zeroize::Zeroizing;

/// The asymmetric key families that can live on a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Rsa,
    Dsa,
    Ec,
}

impl KeyFamily {
    /// The PKCS#11 key type
    pub fn key_type(self) -> CK_KEY_TYPE {
        match self {
            KeyFamily::Rsa => CKK_RSA,
            KeyFamily::Dsa => CKK_DSA,
            KeyFamily::Ec => CKK_EC,
        }
    }

    /// Maps a PKCS#11 key type to a family
    ///
    /// Fails with [ErrorKind::UnsupportedAlgorithm] for any other key type
    pub fn from_key_type(key_type: CK_KEY_TYPE) -> Result<KeyFamily> {
        match key_type {
            CKK_RSA => Ok(KeyFamily::Rsa),
            CKK_DSA => Ok(KeyFamily::Dsa),
            CKK_EC => Ok(KeyFamily::Ec),
            _ => Err(Error::with_msg(
                ErrorKind::UnsupportedAlgorithm,
                format!("unsupported key type 0x{:x}", key_type),
            )),
        }
    }

    /// The mechanism used to generate key pairs of this family
    pub fn keygen_mechanism(self) -> CK_MECHANISM_TYPE {
        match self {
            KeyFamily::Rsa => CKM_RSA_PKCS_KEY_PAIR_GEN,
            KeyFamily::Dsa => CKM_DSA_KEY_PAIR_GEN,
            KeyFamily::Ec => CKM_EC_KEY_PAIR_GEN,
        }
    }

    /// Short printable name
    pub fn name(self) -> &'static str {
        match self {
            KeyFamily::Rsa => "RSA",
            KeyFamily::Dsa => "DSA",
            KeyFamily::Ec => "EC",
        }
    }
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    pub modulus: BigUint,
    pub public_exponent: BigUint,
}

/// A private key component, held as its big-endian unsigned magnitude
/// and wiped when dropped
pub type SecretUint = Zeroizing<Vec<u8>>;

/// Copies a big-endian magnitude into a [SecretUint], without leading
/// zero bytes, zero is a single zero byte
pub fn secret_uint(bytes: &[u8]) -> SecretUint {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    if start == bytes.len() {
        return Zeroizing::new(vec![0]);
    }
    Zeroizing::new(bytes[start..].to_vec())
}

#[derive(Clone)]
pub struct RsaPrivateKey {
    pub private_exponent: SecretUint,
    pub prime1: SecretUint,
    pub prime2: SecretUint,
    pub exponent1: SecretUint,
    pub exponent2: SecretUint,
    pub coefficient: SecretUint,
}

impl fmt::Debug for RsaPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("RsaPrivateKey { .. }")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsaPublicKey {
    pub prime: BigUint,
    pub subprime: BigUint,
    pub base: BigUint,
    /// The public value y
    pub value: BigUint,
}

#[derive(Clone)]
pub struct DsaPrivateKey {
    /// The private value x
    pub value: SecretUint,
}

impl fmt::Debug for DsaPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("DsaPrivateKey { .. }")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcPublicKey {
    /// DER encoded curve parameters, as found in CKA_EC_PARAMS
    pub params: Vec<u8>,
    /// The raw encoded point, without any OCTET STRING wrapping
    pub point: Vec<u8>,
}

#[derive(Clone)]
pub struct EcPrivateKey {
    pub value: SecretUint,
}

impl fmt::Debug for EcPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("EcPrivateKey { .. }")
    }
}

/// The public half of an asymmetric key
///
/// Equality is algorithm aware: two keys are equal when they belong to
/// the same family and every public component is equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Dsa(DsaPublicKey),
    Ec(EcPublicKey),
}

impl PublicKey {
    pub fn family(&self) -> KeyFamily {
        match self {
            PublicKey::Rsa(_) => KeyFamily::Rsa,
            PublicKey::Dsa(_) => KeyFamily::Dsa,
            PublicKey::Ec(_) => KeyFamily::Ec,
        }
    }

    /// Key size in bits, for EC keys this is the curve size
    pub fn bits(&self) -> Result<usize> {
        match self {
            PublicKey::Rsa(k) => Ok(usize::try_from(k.modulus.bits())?),
            PublicKey::Dsa(k) => Ok(usize::try_from(k.prime.bits())?),
            PublicKey::Ec(k) => {
                ecc::curve_bits(ecc::ec_params_to_curve_name(&k.params)?)
            }
        }
    }

    /// DER encodes the key as a SubjectPublicKeyInfo
    pub fn to_der(&self) -> Result<Vec<u8>> {
        match self {
            PublicKey::Rsa(k) => {
                let n = k.modulus.to_bytes_be();
                let e = k.public_exponent.to_bytes_be();
                let key = pkcs::RsaPublicKey::new(&n, &e)?.serialize()?;
                let spki = pkcs::SubjectPublicKeyInfo::new(
                    AlgorithmParameters::Rsa(Some(())),
                    &key,
                )?;
                spki.serialize()
            }
            PublicKey::Dsa(k) => {
                let p = k.prime.to_bytes_be();
                let q = k.subprime.to_bytes_be();
                let g = k.base.to_bytes_be();
                let y = k.value.to_bytes_be();
                let key = asn1::write_single(&DerEncBigUint::new(&y)?)?;
                let spki = pkcs::SubjectPublicKeyInfo::new(
                    AlgorithmParameters::Dsa(DssParms {
                        p: DerEncBigUint::new(&p)?,
                        q: DerEncBigUint::new(&q)?,
                        g: DerEncBigUint::new(&g)?,
                    }),
                    &key,
                )?;
                spki.serialize()
            }
            PublicKey::Ec(k) => {
                let params = asn1::parse_single::<asn1::Tlv>(&k.params)
                    .map_err(|e| {
                        Error::with_origin(ErrorKind::MalformedObject, e)
                    })?;
                let spki = pkcs::SubjectPublicKeyInfo::new(
                    AlgorithmParameters::Ec(params),
                    &k.point,
                )?;
                spki.serialize()
            }
        }
    }

    /// Parses a DER encoded SubjectPublicKeyInfo
    ///
    /// The input must contain exactly one structure, trailing bytes are
    /// reported as [ErrorKind::IntegrityError]
    pub fn from_der(der: &[u8]) -> Result<PublicKey> {
        let spki = asn1::parse_single::<pkcs::SubjectPublicKeyInfo>(der)?;
        let key = spki.subject_public_key.as_bytes();
        match spki.algorithm.params {
            AlgorithmParameters::Rsa(_) => {
                let k = asn1::parse_single::<pkcs::RsaPublicKey>(key)?;
                Ok(PublicKey::Rsa(RsaPublicKey {
                    modulus: k.modulus.to_biguint(),
                    public_exponent: k.public_exponent.to_biguint(),
                }))
            }
            AlgorithmParameters::Dsa(params) => {
                let y = asn1::parse_single::<DerEncBigUint>(key)?;
                Ok(PublicKey::Dsa(DsaPublicKey {
                    prime: params.p.to_biguint(),
                    subprime: params.q.to_biguint(),
                    base: params.g.to_biguint(),
                    value: y.to_biguint(),
                }))
            }
            AlgorithmParameters::Ec(params) => Ok(PublicKey::Ec(EcPublicKey {
                params: params.full_data().to_vec(),
                point: key.to_vec(),
            })),
            AlgorithmParameters::Other(oid, _) => Err(Error::with_msg(
                ErrorKind::UnsupportedAlgorithm,
                format!("unsupported public key algorithm {}", oid),
            )),
        }
    }
}

/// Asymmetric key material, public only or public and private
#[derive(Debug, Clone)]
pub enum AsymmetricKeyMaterial {
    Rsa {
        public: RsaPublicKey,
        private: Option<RsaPrivateKey>,
    },
    Dsa {
        public: DsaPublicKey,
        private: Option<DsaPrivateKey>,
    },
    Ec {
        public: EcPublicKey,
        private: Option<EcPrivateKey>,
    },
}

impl AsymmetricKeyMaterial {
    pub fn family(&self) -> KeyFamily {
        match self {
            AsymmetricKeyMaterial::Rsa { .. } => KeyFamily::Rsa,
            AsymmetricKeyMaterial::Dsa { .. } => KeyFamily::Dsa,
            AsymmetricKeyMaterial::Ec { .. } => KeyFamily::Ec,
        }
    }

    /// Whether private components are present
    pub fn has_private(&self) -> bool {
        match self {
            AsymmetricKeyMaterial::Rsa { private, .. } => private.is_some(),
            AsymmetricKeyMaterial::Dsa { private, .. } => private.is_some(),
            AsymmetricKeyMaterial::Ec { private, .. } => private.is_some(),
        }
    }

    /// Returns a copy of the public half
    pub fn public_key(&self) -> PublicKey {
        match self {
            AsymmetricKeyMaterial::Rsa { public, .. } => {
                PublicKey::Rsa(public.clone())
            }
            AsymmetricKeyMaterial::Dsa { public, .. } => {
                PublicKey::Dsa(public.clone())
            }
            AsymmetricKeyMaterial::Ec { public, .. } => {
                PublicKey::Ec(public.clone())
            }
        }
    }
}

impl From<PublicKey> for AsymmetricKeyMaterial {
    fn from(key: PublicKey) -> AsymmetricKeyMaterial {
        match key {
            PublicKey::Rsa(public) => AsymmetricKeyMaterial::Rsa {
                public: public,
                private: None,
            },
            PublicKey::Dsa(public) => AsymmetricKeyMaterial::Dsa {
                public: public,
                private: None,
            },
            PublicKey::Ec(public) => AsymmetricKeyMaterial::Ec {
                public: public,
                private: None,
            },
        }
    }
}
