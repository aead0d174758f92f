// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! This module defines the crate [Error] type, the [ErrorKind]
//! classification every fallible operation reports, and the conversions
//! from the error types of the libraries this crate relies on.

use std::error;
use std::fmt;

use crate::pkcs11::*;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

type Origin = Box<dyn error::Error + Send + Sync>;

/// Error classification
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The key family, curve or mechanism is not supported
    UnsupportedAlgorithm,
    /// An object or a serialized record is missing data or carries
    /// values that can't be interpreted
    MalformedObject,
    /// No object matched a search that required one
    ObjectNotFound,
    /// More than one object matched a search that required exactly one
    AmbiguousMatch,
    /// The PIN was rejected or PIN entry was aborted
    AuthenticationFailed,
    /// The card holding the key is not inserted and the user gave up
    CardNotPresent,
    /// The token refused to create an object
    CreateRejected,
    /// Serialized data does not have the expected shape
    IntegrityError,
    /// The operation was cancelled before it was issued
    Cancelled,
    /// The token environment is not initialized
    NotLoaded,
    /// Configuration could not be found or parsed
    Config,
    /// A raw PKCS#11 error, see [Error::rv]
    Token,
}

impl ErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedAlgorithm => "unsupported algorithm",
            ErrorKind::MalformedObject => "malformed object",
            ErrorKind::ObjectNotFound => "object not found",
            ErrorKind::AmbiguousMatch => "ambiguous match",
            ErrorKind::AuthenticationFailed => "authentication failed",
            ErrorKind::CardNotPresent => "card not present",
            ErrorKind::CreateRejected => "object creation rejected",
            ErrorKind::IntegrityError => "integrity error",
            ErrorKind::Cancelled => "operation cancelled",
            ErrorKind::NotLoaded => "token environment not loaded",
            ErrorKind::Config => "configuration error",
            ErrorKind::Token => "token error",
        }
    }
}

/// The crate error
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    origin: Option<Origin>,
    errmsg: Option<String>,
    ckrv: CK_RV,
}

impl Error {
    /// Creates a bare error of the given kind
    pub fn new(kind: ErrorKind) -> Error {
        Error {
            kind: kind,
            origin: None,
            errmsg: None,
            ckrv: CKR_GENERAL_ERROR,
        }
    }

    /// Creates an error of the given kind with a descriptive message
    pub fn with_msg<S: Into<String>>(kind: ErrorKind, errmsg: S) -> Error {
        Error {
            kind: kind,
            origin: None,
            errmsg: Some(errmsg.into()),
            ckrv: CKR_GENERAL_ERROR,
        }
    }

    /// Creates an error of the given kind that wraps another error
    pub fn with_origin<E>(kind: ErrorKind, error: E) -> Error
    where
        E: Into<Origin>,
    {
        Error {
            kind: kind,
            origin: Some(error.into()),
            errmsg: None,
            ckrv: CKR_GENERAL_ERROR,
        }
    }

    /// Creates a [ErrorKind::Token] error from a PKCS#11 return value
    pub fn ck_rv(ckrv: CK_RV) -> Error {
        Error {
            kind: ErrorKind::Token,
            origin: None,
            errmsg: None,
            ckrv: ckrv,
        }
    }

    /// Creates a [ErrorKind::Token] error with a message
    pub fn ck_rv_with_errmsg<S: Into<String>>(ckrv: CK_RV, errmsg: S) -> Error {
        Error {
            kind: ErrorKind::Token,
            origin: None,
            errmsg: Some(errmsg.into()),
            ckrv: ckrv,
        }
    }

    /// Re-classifies an error, keeping the original as its source
    pub fn reclassify(self, kind: ErrorKind) -> Error {
        if self.kind == kind {
            return self;
        }
        Error {
            kind: kind,
            ckrv: self.ckrv,
            errmsg: None,
            origin: Some(Box::new(self)),
        }
    }

    /// Returns the error classification
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Checks the error classification
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Returns the PKCS#11 return value associated with the error
    pub fn rv(&self) -> CK_RV {
        self.ckrv
    }

    /// Returns the error message if any
    pub fn errmsg(&self) -> Option<&str> {
        self.errmsg.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref e) = self.errmsg {
            return write!(f, "{}: {}", self.kind.as_str(), e);
        }
        match self.kind {
            ErrorKind::Token => write!(f, "token error: 0x{:08x}", self.ckrv),
            _ => match self.origin {
                Some(ref o) => write!(f, "{}: {}", self.kind.as_str(), o),
                None => write!(f, "{}", self.kind.as_str()),
            },
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.origin {
            Some(ref o) => Some(o.as_ref()),
            None => None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error::new(kind)
    }
}

impl From<CK_RV> for Error {
    fn from(ckrv: CK_RV) -> Error {
        Error::ck_rv(ckrv)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::with_origin(ErrorKind::Config, error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Error {
        Error::with_origin(ErrorKind::Config, error)
    }
}

impl From<hex::FromHexError> for Error {
    fn from(error: hex::FromHexError) -> Error {
        Error::with_origin(ErrorKind::MalformedObject, error)
    }
}

impl From<asn1::ParseError> for Error {
    fn from(error: asn1::ParseError) -> Error {
        Error::with_origin(ErrorKind::IntegrityError, error)
    }
}

impl From<asn1::WriteError> for Error {
    fn from(error: asn1::WriteError) -> Error {
        Error::with_origin(ErrorKind::MalformedObject, error)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(error: std::num::TryFromIntError) -> Error {
        Error::with_origin(ErrorKind::MalformedObject, error)
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(error: std::string::FromUtf8Error) -> Error {
        Error::with_origin(ErrorKind::MalformedObject, error)
    }
}

impl From<getrandom::Error> for Error {
    fn from(error: getrandom::Error) -> Error {
        Error::with_msg(ErrorKind::Token, error.to_string())
    }
}

#[cfg(feature = "cryptoki")]
impl From<cryptoki::error::Error> for Error {
    fn from(error: cryptoki::error::Error) -> Error {
        Error::with_origin(ErrorKind::Token, error)
    }
}
