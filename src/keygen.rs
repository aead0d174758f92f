// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! On-token key pair generation as a pollable, cancellable task.
//!
//! Generating a key pair on a card can take a long time. The blocking
//! generate call runs on a worker thread while the calling thread polls
//! at a fixed interval and reports progress. Cancellation is honored
//! only until the generate call is issued, after that the task is
//! awaited to completion and any error it raised is returned to the
//! caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::ecc;
use crate::error::{Error, ErrorKind, Result};
use crate::key::KeyFamily;
use crate::pkcs11::*;
use crate::session::{KeyPairRequest, TokenSession};
use crate::store::ObjectStore;

/// Default interval between progress callbacks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What to generate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenParams {
    pub family: KeyFamily,
    /// Modulus or prime size in bits, ignored for EC keys
    pub bits: usize,
    /// Curve name, EC keys only
    pub curve: Option<String>,
    /// Label of the generated objects
    pub label: String,
}

impl KeyGenParams {
    pub fn rsa(label: &str, bits: usize) -> KeyGenParams {
        KeyGenParams {
            family: KeyFamily::Rsa,
            bits: bits,
            curve: None,
            label: label.to_string(),
        }
    }

    pub fn ec(label: &str, curve: &str) -> KeyGenParams {
        KeyGenParams {
            family: KeyFamily::Ec,
            bits: 0,
            curve: Some(curve.to_string()),
            label: label.to_string(),
        }
    }

    /// Validates the parameters and resolves them into the request
    /// issued to the token
    ///
    /// Fails with [ErrorKind::UnsupportedAlgorithm] for unknown curves
    /// or a missing curve on EC keys
    pub fn to_request(&self) -> Result<KeyPairRequest> {
        let (bits, ec_params) = match (self.family, &self.curve) {
            (KeyFamily::Ec, Some(name)) => (
                ecc::curve_bits(name)?,
                Some(ecc::curve_name_to_ec_params(name)?),
            ),
            (KeyFamily::Ec, None) => {
                return Err(Error::with_msg(
                    ErrorKind::UnsupportedAlgorithm,
                    "EC key generation requires a curve",
                ))
            }
            _ => (self.bits, None),
        };
        Ok(KeyPairRequest {
            label: self.label.clone(),
            mechanism: self.family.keygen_mechanism(),
            bits: CK_ULONG::try_from(bits)?,
            ec_params: ec_params,
            id: Vec::new(),
        })
    }
}

/// Shared cancellation flag of a [KeyGenTask]
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Requests cancellation, effective only if the generate call has
    /// not been issued yet
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A validated key pair generation, ready to run against a session
#[derive(Debug)]
pub struct KeyGenTask {
    request: KeyPairRequest,
    family: KeyFamily,
    poll: Duration,
    cancel: CancelHandle,
}

impl KeyGenTask {
    /// Validates the parameters, see [KeyGenParams::to_request]
    pub fn new(params: &KeyGenParams, poll: Duration) -> Result<KeyGenTask> {
        Ok(KeyGenTask {
            request: params.to_request()?,
            family: params.family,
            poll: poll,
            cancel: CancelHandle::default(),
        })
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    pub fn request(&self) -> &KeyPairRequest {
        &self.request
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Issues the generate call on a worker thread and waits for it,
    /// calling `progress` once per poll interval
    ///
    /// A fresh CKA_ID is allocated on the session and returned once the
    /// pair is generated. Fails with [ErrorKind::Cancelled] if
    /// cancellation was requested before the call was issued.
    pub fn run(
        &self,
        session: &mut dyn TokenSession,
        progress: &mut dyn FnMut(),
    ) -> Result<Vec<u8>> {
        if self.cancel.is_cancelled() {
            return Err(Error::new(ErrorKind::Cancelled));
        }
        log::debug!(
            "Generating {} key pair \"{}\"",
            self.family,
            self.request.label
        );
        let id = ObjectStore::new(&mut *session)
            .allocate_unique_id(CKO_PUBLIC_KEY)?;
        let mut request = self.request.clone();
        request.id = id.to_bytes()?.clone();
        let request = &request;
        thread::scope(|s| {
            let worker = s.spawn(move || session.generate_key_pair(request));
            while !worker.is_finished() {
                thread::sleep(self.poll);
                progress();
            }
            match worker.join() {
                Ok(res) => res,
                Err(_) => Err(Error::with_msg(
                    ErrorKind::Token,
                    "key generation worker panicked",
                )),
            }
        })
    }
}
