//! Transient and durable VM references
//!
//! ```text
//!            promote()
//! Handle<'s> ---------> Durable ----release()/drop---> (gone)
//!   |  valid until the        valid on any thread
//!   |  scope's frame pops     until released, exactly once
//!   v
//! delete_local()
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use kopi_sdk::{HandleKind, RawHandle, VmRuntime};

use crate::error::{Error, Result};
use crate::scope::Scope;

/// Transient VM reference, valid only inside the scope that produced it
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Handle<'s> {
    raw: RawHandle,
    _scope: PhantomData<&'s Scope>,
}

impl<'s> Handle<'s> {
    pub(crate) fn new(raw: RawHandle) -> Self {
        Self {
            raw,
            _scope: PhantomData,
        }
    }

    pub(crate) fn raw(self) -> RawHandle {
        self.raw
    }
}

impl fmt::Debug for Handle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.raw.addr())
    }
}

/// Durable VM reference.
///
/// Released exactly once: explicitly with [`Durable::release`] or implicitly
/// on drop.
pub struct Durable {
    raw: Option<RawHandle>,
    runtime: Arc<dyn VmRuntime>,
}

impl Durable {
    pub(crate) fn new(raw: RawHandle, runtime: Arc<dyn VmRuntime>) -> Self {
        Self {
            raw: Some(raw),
            runtime,
        }
    }

    pub(crate) fn raw(&self) -> RawHandle {
        match self.raw {
            Some(raw) => raw,
            None => unreachable!("durable handle used after release"),
        }
    }

    /// Use the reference inside a scope. The handle borrows both, so the
    /// reference cannot be released while the handle is in use.
    pub fn bind<'s>(&'s self, _scope: &'s Scope) -> Handle<'s> {
        Handle::new(self.raw())
    }

    /// Release the reference now
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.runtime.delete_global_ref(raw);
            log::debug!("released durable {:?}", raw);
        }
    }
}

impl Drop for Durable {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for Durable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw {
            Some(raw) => write!(f, "Durable({:#x})", raw.addr()),
            None => f.write_str("Durable(released)"),
        }
    }
}

impl Scope {
    pub(crate) fn wrap(&self, raw: RawHandle) -> Handle<'_> {
        Handle::new(raw)
    }

    /// Promote a transient handle to a durable one
    pub fn promote(&self, handle: Handle<'_>) -> Result<Durable> {
        match self.env().new_global_ref(handle.raw()) {
            Some(raw) => {
                log::debug!("promoted {:?} to durable {:?}", handle, raw);
                Ok(Durable::new(raw, Arc::clone(&self.shared().runtime)))
            }
            None => Err(self.pending_or(|| Error::UnexpectedType {
                expected: "live object".to_string(),
                found: format!("{:?}", handle),
            })),
        }
    }

    /// A second transient handle to the same object
    pub fn duplicate<'s>(&'s self, handle: Handle<'_>) -> Result<Handle<'s>> {
        match self.env().new_local_ref(handle.raw()) {
            Some(raw) => Ok(self.wrap(raw)),
            None => Err(self.pending_or(|| Error::UnexpectedType {
                expected: "live object".to_string(),
                found: format!("{:?}", handle),
            })),
        }
    }

    /// Lifetime class of a handle
    pub fn handle_kind(&self, handle: Handle<'_>) -> HandleKind {
        self.env().ref_kind(handle.raw())
    }

    /// Delete a transient handle before the scope ends. The handle must not
    /// be used afterwards.
    pub fn delete_local(&self, handle: Handle<'_>) {
        self.env().delete_local_ref(handle.raw());
    }

    /// Whether two references denote the same object (null equals null)
    pub fn is_same_object(&self, a: Option<Handle<'_>>, b: Option<Handle<'_>>) -> bool {
        self.env()
            .is_same_object(a.map(Handle::raw), b.map(Handle::raw))
    }
}
