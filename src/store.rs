// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Search, create, delete and rename operations on token objects,
//! expressed in terms of attribute templates.

use crate::attribute::{Attribute, AttributeKind, AttributeTemplate};
use crate::error::{Error, ErrorKind, Result};
use crate::pkcs11::*;
use crate::session::{ObjectHandle, TokenSession};

/// Size in bytes of generated object identifiers
pub const OBJECT_ID_LEN: usize = 8;

/// Upper bound on id draws before giving up, only reachable with a
/// broken random source
const MAX_ID_ATTEMPTS: usize = 1024;

/// Outcome of a bulk delete, one entry per handle
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub deleted: Vec<ObjectHandle>,
    pub failed: Vec<(ObjectHandle, Error)>,
}

impl DeleteReport {
    /// Whether every handle was deleted
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Template based object operations on a borrowed session
#[derive(Debug)]
pub struct ObjectStore<'a> {
    session: &'a mut dyn TokenSession,
}

impl<'a> ObjectStore<'a> {
    pub fn new(session: &'a mut dyn TokenSession) -> ObjectStore<'a> {
        ObjectStore { session: session }
    }

    /// Returns the underlying session
    pub fn session(&mut self) -> &mut dyn TokenSession {
        &mut *self.session
    }

    /// Returns every object matching all attributes of the template,
    /// an empty result is not an error
    pub fn find(
        &mut self,
        template: &AttributeTemplate,
    ) -> Result<Vec<ObjectHandle>> {
        let handles = self.session.find_objects(template)?;
        log::debug!(
            "Search over {:?} matched {} object(s)",
            template.kinds(),
            handles.len()
        );
        Ok(handles)
    }

    /// Returns the single object matching the template
    ///
    /// Fails with [ErrorKind::ObjectNotFound] on zero matches and with
    /// [ErrorKind::AmbiguousMatch] on more than one
    pub fn find_one(
        &mut self,
        template: &AttributeTemplate,
    ) -> Result<ObjectHandle> {
        let handles = self.find(template)?;
        match handles.len() {
            0 => Err(Error::new(ErrorKind::ObjectNotFound)),
            1 => Ok(handles[0]),
            n => {
                log::warn!("Expected a single object, found {}", n);
                Err(Error::with_msg(
                    ErrorKind::AmbiguousMatch,
                    format!("{} objects match", n),
                ))
            }
        }
    }

    /// Creates an object
    ///
    /// Fails with [ErrorKind::CreateRejected] when the session is read
    /// only or not logged in, or when the token refuses the template
    pub fn create_object(
        &mut self,
        template: &AttributeTemplate,
    ) -> Result<ObjectHandle> {
        if !self.session.is_read_write() {
            return Err(Error::with_msg(
                ErrorKind::CreateRejected,
                "read-only session",
            ));
        }
        if !self.session.is_logged_in() {
            return Err(Error::with_msg(
                ErrorKind::CreateRejected,
                "session is not logged in",
            ));
        }
        self.session
            .create_object(template)
            .map_err(|e| e.reclassify(ErrorKind::CreateRejected))
    }

    /// Deletes every handle independently
    ///
    /// A failure on one handle is recorded in the report and does not
    /// stop the deletion of the others
    pub fn delete_objects(
        &mut self,
        handles: &[ObjectHandle],
    ) -> DeleteReport {
        let mut report = DeleteReport::default();
        for handle in handles {
            match self.session.destroy_object(*handle) {
                Ok(()) => report.deleted.push(*handle),
                Err(e) => {
                    log::warn!("Failed to delete object {}: {}", handle, e);
                    report.failed.push((*handle, e));
                }
            }
        }
        report
    }

    /// Overwrites the label of an object
    pub fn rename_object(
        &mut self,
        handle: ObjectHandle,
        label: &str,
    ) -> Result<()> {
        self.session.set_attribute(
            handle,
            &Attribute::from_string(AttributeKind::Label, label),
        )
    }

    /// Returns an id attribute that no object of the given class on this
    /// session carries
    pub fn allocate_unique_id(
        &mut self,
        class: CK_OBJECT_CLASS,
    ) -> Result<Attribute> {
        self.allocate_unique_id_with(class, |buf| {
            getrandom::fill(buf).map_err(Error::from)
        })
    }

    /// Same as [ObjectStore::allocate_unique_id] with an explicit source
    /// of candidate ids
    ///
    /// Candidates are drawn until one does not match any existing object
    /// of the class
    pub fn allocate_unique_id_with<F>(
        &mut self,
        class: CK_OBJECT_CLASS,
        mut source: F,
    ) -> Result<Attribute>
    where
        F: FnMut(&mut [u8]) -> Result<()>,
    {
        let mut candidate = [0u8; OBJECT_ID_LEN];
        for _ in 0..MAX_ID_ATTEMPTS {
            source(&mut candidate)?;
            let id =
                Attribute::from_bytes(AttributeKind::Id, candidate.to_vec());
            let filter = AttributeTemplate::new()
                .with(Attribute::from_ulong(AttributeKind::Class, class))
                .with(id.clone());
            if self.find(&filter)?.is_empty() {
                return Ok(id);
            }
            log::debug!("Object id {} in use", hex::encode(candidate));
        }
        Err(Error::with_msg(
            ErrorKind::CreateRejected,
            "unable to allocate a unique object id",
        ))
    }
}
