// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! This module provides the token independent representation of PKCS#11
//! object attributes ([Attribute], [AttributeTemplate]) and the static
//! mapping between the attribute kinds this crate understands, their
//! PKCS#11 identifiers and the data type they carry ([AttrType]).

use std::cmp::Ordering;

use crate::error::{Error, ErrorKind, Result};
use crate::pkcs11::*;

use num_bigint::BigUint;
use zeroize::Zeroize;

/// The data type carried by an attribute kind
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AttrType {
    BoolType,
    NumType,
    StringType,
    BytesType,
}

/// The closed set of attributes used to describe key objects
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum AttributeKind {
    Class,
    Token,
    Private,
    Label,
    Value,
    KeyType,
    Subject,
    Id,
    Encrypt,
    Decrypt,
    Wrap,
    Unwrap,
    Sign,
    Verify,
    Modulus,
    ModulusBits,
    PublicExponent,
    PrivateExponent,
    Prime1,
    Prime2,
    Exponent1,
    Exponent2,
    Coefficient,
    Prime,
    Subprime,
    Base,
    EcParams,
    EcPoint,
}

impl AttributeKind {
    /// Returns the PKCS#11 attribute type identifier
    pub fn ck_type(self) -> CK_ATTRIBUTE_TYPE {
        Attrmap::search_by_kind(self).id
    }

    /// Returns the data type this kind of attribute carries
    pub fn attrtype(self) -> AttrType {
        Attrmap::search_by_kind(self).atype
    }

    /// Returns the PKCS#11 name of the attribute
    pub fn name(self) -> &'static str {
        Attrmap::search_by_kind(self).name
    }

    /// Finds the kind from a PKCS#11 attribute type identifier
    pub fn from_ck_type(id: CK_ATTRIBUTE_TYPE) -> Result<AttributeKind> {
        match Attrmap::search_by_id(id) {
            Some(a) => Ok(a.kind),
            None => Err(Error::ck_rv(CKR_ATTRIBUTE_TYPE_INVALID)),
        }
    }

    /// Whether values of this kind must be wiped from memory when
    /// no longer used
    pub fn is_sensitive(self) -> bool {
        match self {
            AttributeKind::PrivateExponent
            | AttributeKind::Prime1
            | AttributeKind::Prime2
            | AttributeKind::Exponent1
            | AttributeKind::Exponent2
            | AttributeKind::Coefficient => true,
            _ => false,
        }
    }
}

/// Struct to map an attribute kind to its PKCS#11 type and printable name
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Attrmap<'a> {
    id: CK_ULONG,
    kind: AttributeKind,
    name: &'a str,
    atype: AttrType,
}

impl PartialOrd for Attrmap<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Attrmap<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Attrmap<'_> {
    /// Convenience function to efficiently search for a mapping by id
    fn search_by_id(id: CK_ULONG) -> Option<&'static Attrmap<'static>> {
        match ATTRMAP.binary_search_by(|a| a.id.cmp(&id)) {
            Ok(i) => Some(&ATTRMAP[i]),
            Err(_) => None,
        }
    }

    /// Every kind has exactly one entry, checked by the tests below
    fn search_by_kind(kind: AttributeKind) -> &'static Attrmap<'static> {
        for a in &ATTRMAP {
            if a.kind == kind {
                return a;
            }
        }
        unreachable!("attribute kind missing from map")
    }
}

/// Helper macro to populate the static attributes map
macro_rules! attrmap_element {
    ($id:expr => $kind:ident; as $attrtype:ident) => {
        Attrmap {
            id: $id,
            kind: AttributeKind::$kind,
            name: stringify!($id),
            atype: AttrType::$attrtype,
        }
    };
}

/// The attributes map, sorted by PKCS#11 id
static ATTRMAP: [Attrmap<'_>; 28] = [
    attrmap_element!(CKA_CLASS => Class; as NumType),
    attrmap_element!(CKA_TOKEN => Token; as BoolType),
    attrmap_element!(CKA_PRIVATE => Private; as BoolType),
    attrmap_element!(CKA_LABEL => Label; as StringType),
    attrmap_element!(CKA_VALUE => Value; as BytesType),
    attrmap_element!(CKA_KEY_TYPE => KeyType; as NumType),
    attrmap_element!(CKA_SUBJECT => Subject; as BytesType),
    attrmap_element!(CKA_ID => Id; as BytesType),
    attrmap_element!(CKA_ENCRYPT => Encrypt; as BoolType),
    attrmap_element!(CKA_DECRYPT => Decrypt; as BoolType),
    attrmap_element!(CKA_WRAP => Wrap; as BoolType),
    attrmap_element!(CKA_UNWRAP => Unwrap; as BoolType),
    attrmap_element!(CKA_SIGN => Sign; as BoolType),
    attrmap_element!(CKA_VERIFY => Verify; as BoolType),
    attrmap_element!(CKA_MODULUS => Modulus; as BytesType),
    attrmap_element!(CKA_MODULUS_BITS => ModulusBits; as NumType),
    attrmap_element!(CKA_PUBLIC_EXPONENT => PublicExponent; as BytesType),
    attrmap_element!(CKA_PRIVATE_EXPONENT => PrivateExponent; as BytesType),
    attrmap_element!(CKA_PRIME_1 => Prime1; as BytesType),
    attrmap_element!(CKA_PRIME_2 => Prime2; as BytesType),
    attrmap_element!(CKA_EXPONENT_1 => Exponent1; as BytesType),
    attrmap_element!(CKA_EXPONENT_2 => Exponent2; as BytesType),
    attrmap_element!(CKA_COEFFICIENT => Coefficient; as BytesType),
    attrmap_element!(CKA_PRIME => Prime; as BytesType),
    attrmap_element!(CKA_SUBPRIME => Subprime; as BytesType),
    attrmap_element!(CKA_BASE => Base; as BytesType),
    attrmap_element!(CKA_EC_PARAMS => EcParams; as BytesType),
    attrmap_element!(CKA_EC_POINT => EcPoint; as BytesType),
];

/// A tagged attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Boolean(bool),
    Integer(CK_ULONG),
    Bytes(Vec<u8>),
}

impl AttributeValue {
    /// Encodes an unsigned big integer as its big-endian magnitude
    ///
    /// The encoding carries no leading zero bytes, zero is a single
    /// zero byte
    pub fn from_biguint(n: &BigUint) -> AttributeValue {
        AttributeValue::Bytes(n.to_bytes_be())
    }

    fn zeroize(&mut self) {
        match self {
            AttributeValue::Bytes(v) => v.zeroize(),
            AttributeValue::Integer(n) => n.zeroize(),
            AttributeValue::Boolean(_) => (),
        }
    }
}

/// A single object attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    kind: AttributeKind,
    value: AttributeValue,
}

impl Attribute {
    /// Returns the attribute kind
    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    /// Returns a reference to the internal value
    pub fn value(&self) -> &AttributeValue {
        &self.value
    }

    /// Returns the PKCS#11 attribute type identifier
    pub fn ck_type(&self) -> CK_ATTRIBUTE_TYPE {
        self.kind.ck_type()
    }

    /// Returns the name of the attribute
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn type_error(&self) -> Error {
        Error::with_msg(
            ErrorKind::MalformedObject,
            format!("unexpected value type for {}", self.name()),
        )
    }

    /// Returns the internal value as a boolean
    pub fn to_bool(&self) -> Result<bool> {
        match self.value {
            AttributeValue::Boolean(b) => Ok(b),
            _ => Err(self.type_error()),
        }
    }

    /// Returns the internal value as a CK_ULONG
    pub fn to_ulong(&self) -> Result<CK_ULONG> {
        match self.value {
            AttributeValue::Integer(n) => Ok(n),
            _ => Err(self.type_error()),
        }
    }

    /// Returns a reference to the internal byte string
    pub fn to_bytes(&self) -> Result<&Vec<u8>> {
        match self.value {
            AttributeValue::Bytes(ref v) => Ok(v),
            _ => Err(self.type_error()),
        }
    }

    /// Returns the internal value as a String
    ///
    /// Returns a MalformedObject error if the value is not valid UTF-8
    pub fn to_string(&self) -> Result<String> {
        Ok(String::from_utf8(self.to_bytes()?.clone())?)
    }

    /// Interprets the internal byte string as an unsigned big integer
    ///
    /// Accepts any non empty big-endian encoding, including leading zeros
    pub fn to_biguint(&self) -> Result<BigUint> {
        let v = self.to_bytes()?;
        if v.is_empty() {
            return Err(Error::with_msg(
                ErrorKind::MalformedObject,
                format!("empty integer in {}", self.name()),
            ));
        }
        Ok(BigUint::from_bytes_be(v))
    }

    /// Wipes the value
    pub fn zeroize(&mut self) {
        self.value.zeroize();
    }

    /// Creates an attribute checking that the value matches the kind
    pub fn new(
        kind: AttributeKind,
        value: AttributeValue,
    ) -> Result<Attribute> {
        let ok = match (kind.attrtype(), &value) {
            (AttrType::BoolType, AttributeValue::Boolean(_)) => true,
            (AttrType::NumType, AttributeValue::Integer(_)) => true,
            (AttrType::StringType, AttributeValue::Bytes(_)) => true,
            (AttrType::BytesType, AttributeValue::Bytes(_)) => true,
            _ => false,
        };
        if !ok {
            return Err(Error::with_msg(
                ErrorKind::MalformedObject,
                format!("invalid value type for {}", kind.name()),
            ));
        }
        Ok(Attribute {
            kind: kind,
            value: value,
        })
    }

    /// Creates a new boolean attribute
    pub fn from_bool(kind: AttributeKind, val: bool) -> Attribute {
        Attribute {
            kind: kind,
            value: AttributeValue::Boolean(val),
        }
    }

    /// Creates a new CK_ULONG attribute
    pub fn from_ulong(kind: AttributeKind, val: CK_ULONG) -> Attribute {
        Attribute {
            kind: kind,
            value: AttributeValue::Integer(val),
        }
    }

    /// Creates a new byte string attribute
    pub fn from_bytes(kind: AttributeKind, val: Vec<u8>) -> Attribute {
        Attribute {
            kind: kind,
            value: AttributeValue::Bytes(val),
        }
    }

    /// Creates a new string attribute, stored as UTF-8 bytes
    pub fn from_string(kind: AttributeKind, val: &str) -> Attribute {
        Attribute {
            kind: kind,
            value: AttributeValue::Bytes(val.as_bytes().to_vec()),
        }
    }

    /// Creates a new big integer attribute in canonical encoding
    pub fn from_biguint(kind: AttributeKind, val: &BigUint) -> Attribute {
        Attribute {
            kind: kind,
            value: AttributeValue::from_biguint(val),
        }
    }
}

/// An ordered collection of attributes, at most one per kind
///
/// Templates are used both to describe objects to create and as search
/// filters. Setting a kind that is already present replaces its value
/// in place, so the last write governs.
#[derive(Debug, Clone, Default)]
pub struct AttributeTemplate {
    attributes: Vec<Attribute>,
    zeroize: bool,
}

impl Drop for AttributeTemplate {
    fn drop(&mut self) {
        if self.zeroize {
            for a in self.attributes.iter_mut() {
                a.zeroize();
            }
        }
    }
}

impl PartialEq for AttributeTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.attributes == other.attributes
    }
}

impl AttributeTemplate {
    /// Creates an empty template
    pub fn new() -> AttributeTemplate {
        AttributeTemplate::default()
    }

    /// Creates an empty template with room for `capacity` attributes
    pub fn with_capacity(capacity: usize) -> AttributeTemplate {
        AttributeTemplate {
            attributes: Vec::with_capacity(capacity),
            zeroize: false,
        }
    }

    /// Marks the template as holding sensitive material, values are
    /// wiped when the template is dropped
    pub fn set_zeroize(&mut self) {
        self.zeroize = true;
    }

    /// Inserts an attribute, replacing any value of the same kind
    pub fn set(&mut self, attr: Attribute) {
        if attr.kind.is_sensitive() {
            self.zeroize = true;
        }
        match self.attributes.iter_mut().find(|a| a.kind == attr.kind) {
            Some(a) => {
                a.zeroize();
                *a = attr;
            }
            None => self.attributes.push(attr),
        }
    }

    /// Builder style variant of [AttributeTemplate::set]
    pub fn with(mut self, attr: Attribute) -> AttributeTemplate {
        self.set(attr);
        self
    }

    /// Sets every attribute of another template, in order
    pub fn extend(&mut self, other: &AttributeTemplate) {
        for a in other.iter() {
            self.set(a.clone());
        }
    }

    /// Removes the attribute of the given kind
    pub fn remove(&mut self, kind: AttributeKind) -> Option<Attribute> {
        let idx = self.attributes.iter().position(|a| a.kind == kind)?;
        Some(self.attributes.remove(idx))
    }

    /// Returns the attribute of the given kind, if present
    pub fn get(&self, kind: AttributeKind) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.kind == kind)
    }

    fn get_required(&self, kind: AttributeKind) -> Result<&Attribute> {
        match self.get(kind) {
            Some(a) => Ok(a),
            None => Err(Error::with_msg(
                ErrorKind::MalformedObject,
                format!("missing attribute {}", kind.name()),
            )),
        }
    }

    /// Returns the boolean value of a required attribute
    pub fn get_bool(&self, kind: AttributeKind) -> Result<bool> {
        self.get_required(kind)?.to_bool()
    }

    /// Returns the CK_ULONG value of a required attribute
    pub fn get_ulong(&self, kind: AttributeKind) -> Result<CK_ULONG> {
        self.get_required(kind)?.to_ulong()
    }

    /// Returns the byte string of a required attribute
    pub fn get_bytes(&self, kind: AttributeKind) -> Result<&Vec<u8>> {
        self.get_required(kind)?.to_bytes()
    }

    /// Returns the string value of a required attribute
    pub fn get_string(&self, kind: AttributeKind) -> Result<String> {
        self.get_required(kind)?.to_string()
    }

    /// Returns the big integer value of a required attribute
    pub fn get_biguint(&self, kind: AttributeKind) -> Result<BigUint> {
        self.get_required(kind)?.to_biguint()
    }

    /// Checks that every attribute in `filter` is present in this
    /// template with an equal value
    pub fn matches(&self, filter: &AttributeTemplate) -> bool {
        filter
            .iter()
            .all(|f| self.get(f.kind).map(|a| a == f).unwrap_or(false))
    }

    /// Iterates over the attributes in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.attributes.iter()
    }

    /// Returns the kinds present in the template, in insertion order
    pub fn kinds(&self) -> Vec<AttributeKind> {
        self.attributes.iter().map(|a| a.kind).collect()
    }

    /// Number of attributes in the template
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the template is empty
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl FromIterator<Attribute> for AttributeTemplate {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        let mut tmpl = AttributeTemplate::new();
        for a in iter {
            tmpl.set(a);
        }
        tmpl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_order_of_attrmap() {
        let mut iter = ATTRMAP.iter();
        let mut prev = iter.next().unwrap();
        for a in iter {
            assert!(prev.id < a.id, "{} is out of order", a.name);
            prev = a;
        }
    }

    #[test]
    fn every_kind_is_mapped() {
        for a in &ATTRMAP {
            assert_eq!(AttributeKind::from_ck_type(a.id).unwrap(), a.kind);
            assert_eq!(a.kind.ck_type(), a.id);
        }
    }
}
