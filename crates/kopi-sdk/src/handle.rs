//! Opaque VM handles and member identifiers
//!
//! Everything the VM hands out is address-sized and opaque. The sdk never
//! interprets these values; only the VM implementation knows what they point
//! at.

use std::fmt;
use std::num::NonZeroUsize;

/// Opaque, address-sized reference to a VM-resident entity (object or class).
///
/// A `RawHandle` carries no lifetime information. Whether it is transient
/// (scope-bound) or durable (valid until released) is a property tracked by
/// the VM and queried with [`VmEnv::ref_kind`](crate::VmEnv::ref_kind).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawHandle(NonZeroUsize);

impl RawHandle {
    /// Wrap an address. Returns `None` for the null address.
    #[inline]
    pub const fn new(addr: usize) -> Option<Self> {
        match NonZeroUsize::new(addr) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// The raw address value
    #[inline]
    pub const fn addr(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({:#x})", self.0)
    }
}

/// Lifetime class of a handle as reported by the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Not a live reference (released, popped, or never issued)
    Invalid,
    /// Valid only inside the local frame (and thread) that produced it
    Transient,
    /// Valid on any thread until explicitly released
    Durable,
}

/// Opaque method identifier, valid only for the class it was resolved against
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MethodId(NonZeroUsize);

impl MethodId {
    /// Wrap a VM method token. Returns `None` for zero.
    #[inline]
    pub const fn new(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// The raw token
    #[inline]
    pub const fn as_raw(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodId({})", self.0)
    }
}

/// Opaque field identifier, valid only for the class it was resolved against
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct FieldId(NonZeroUsize);

impl FieldId {
    /// Wrap a VM field token. Returns `None` for zero.
    #[inline]
    pub const fn new(raw: usize) -> Option<Self> {
        match NonZeroUsize::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    /// The raw token
    #[inline]
    pub const fn as_raw(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldId({})", self.0)
    }
}
