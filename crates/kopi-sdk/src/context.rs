//! VmEnv / VmRuntime traits — abstract VM operations
//!
//! Defines the interface a managed VM implements. The bridge programs
//! against these traits only; it never depends on VM internals.
//!
//! # Pending exceptions
//!
//! VM operations do not return errors for VM-side failures. A failing call
//! returns a zero/`None` value and leaves a *pending exception* on the
//! environment. Until the pending exception is cleared, the only operations
//! that may be called are:
//!
//! - [`VmEnv::exception_check`], [`VmEnv::exception_occurred`],
//!   [`VmEnv::exception_clear`]
//! - [`VmEnv::delete_local_ref`], [`VmEnv::delete_global_ref`]
//! - [`VmEnv::pop_local_frame`], [`VmEnv::ref_kind`]
//!
//! Calling anything else with an exception pending is undefined behaviour on
//! a real VM.

use std::rc::Rc;

use crate::error::VmResult;
use crate::handle::{FieldId, HandleKind, MethodId, RawHandle};
use crate::value::{ValueKind, VmValue};

/// Thread-affine VM interaction context.
///
/// An environment belongs to exactly one thread. Local handles it issues are
/// valid only on that thread, and only until the local frame that holds them
/// is popped. Implementations are expected to be `!Send`.
pub trait VmEnv {
    // ========================================================================
    // Classes
    // ========================================================================

    /// Resolve a class by internal (slash-separated) name.
    /// Raises a pending exception and returns `None` if the class is missing.
    fn find_class(&self, name: &str) -> Option<RawHandle>;

    /// Class of an object, as a new local handle
    fn get_object_class(&self, obj: RawHandle) -> RawHandle;

    /// Whether `obj` is an instance of `class` (or a subtype)
    fn is_instance_of(&self, obj: RawHandle, class: RawHandle) -> bool;

    /// Whether two handles refer to the same VM object (null equals null)
    fn is_same_object(&self, a: Option<RawHandle>, b: Option<RawHandle>) -> bool;

    // ========================================================================
    // Member lookup
    // ========================================================================

    /// Resolve an instance method. Raises and returns `None` if not found.
    fn get_method_id(&self, class: RawHandle, name: &str, signature: &str) -> Option<MethodId>;

    /// Resolve a static method. Raises and returns `None` if not found.
    fn get_static_method_id(
        &self,
        class: RawHandle,
        name: &str,
        signature: &str,
    ) -> Option<MethodId>;

    /// Resolve an instance field. Raises and returns `None` if not found.
    fn get_field_id(&self, class: RawHandle, name: &str, signature: &str) -> Option<FieldId>;

    /// Resolve a static field. Raises and returns `None` if not found.
    fn get_static_field_id(&self, class: RawHandle, name: &str, signature: &str)
        -> Option<FieldId>;

    // ========================================================================
    // Invocation
    // ========================================================================

    /// Invoke an instance method (virtual dispatch). Returns the zero value of
    /// `ret` if the call raised.
    fn call_method(
        &self,
        obj: RawHandle,
        method: MethodId,
        ret: ValueKind,
        args: &[VmValue],
    ) -> VmValue;

    /// Invoke a static method
    fn call_static_method(
        &self,
        class: RawHandle,
        method: MethodId,
        ret: ValueKind,
        args: &[VmValue],
    ) -> VmValue;

    /// Allocate an instance and run the given constructor on it
    fn new_object(&self, class: RawHandle, ctor: MethodId, args: &[VmValue])
        -> Option<RawHandle>;

    // ========================================================================
    // Fields
    // ========================================================================

    /// Read an instance field
    fn get_field(&self, obj: RawHandle, field: FieldId, kind: ValueKind) -> VmValue;

    /// Write an instance field
    fn set_field(&self, obj: RawHandle, field: FieldId, value: VmValue);

    /// Read a static field
    fn get_static_field(&self, class: RawHandle, field: FieldId, kind: ValueKind) -> VmValue;

    /// Write a static field
    fn set_static_field(&self, class: RawHandle, field: FieldId, value: VmValue);

    // ========================================================================
    // Exceptions
    // ========================================================================

    /// Whether an exception is pending
    fn exception_check(&self) -> bool;

    /// The pending exception as a new local handle, without clearing it
    fn exception_occurred(&self) -> Option<RawHandle>;

    /// Clear the pending exception
    fn exception_clear(&self);

    /// Make `throwable` the pending exception
    fn throw(&self, throwable: RawHandle);

    /// Construct an exception of `class` with `message` and make it pending
    fn throw_new(&self, class: RawHandle, message: &str);

    // ========================================================================
    // References
    // ========================================================================

    /// New local handle to the same object
    fn new_local_ref(&self, obj: RawHandle) -> Option<RawHandle>;

    /// Delete a local handle before its frame is popped
    fn delete_local_ref(&self, obj: RawHandle);

    /// New global (durable) handle to the same object
    fn new_global_ref(&self, obj: RawHandle) -> Option<RawHandle>;

    /// Delete a global handle
    fn delete_global_ref(&self, obj: RawHandle);

    /// Lifetime class of a handle
    fn ref_kind(&self, obj: RawHandle) -> HandleKind;

    /// Open a local frame with room for at least `capacity` handles
    fn push_local_frame(&self, capacity: usize) -> VmResult<()>;

    /// Pop the innermost local frame. If `result` is given, a handle to the
    /// same object is returned in the enclosing frame.
    fn pop_local_frame(&self, result: Option<RawHandle>) -> Option<RawHandle>;

    // ========================================================================
    // Strings and arrays
    // ========================================================================

    /// Allocate a VM string
    fn new_string(&self, s: &str) -> Option<RawHandle>;

    /// Decode a VM string. Returns `None` if `s` is not a string.
    fn string_utf(&self, s: RawHandle) -> Option<String>;

    /// Allocate a byte array with the given contents
    fn new_byte_array(&self, data: &[u8]) -> Option<RawHandle>;

    /// Copy out a byte array. Returns `None` if `arr` is not a byte array.
    fn byte_array_elements(&self, arr: RawHandle) -> Option<Vec<u8>>;

    /// Allocate an object array of `len` nulls
    fn new_object_array(&self, len: usize, element_class: RawHandle) -> Option<RawHandle>;

    /// Read an object array element (raises on out-of-bounds)
    fn object_array_element(&self, arr: RawHandle, index: usize) -> Option<RawHandle>;

    /// Write an object array element (raises on out-of-bounds)
    fn set_object_array_element(&self, arr: RawHandle, index: usize, value: Option<RawHandle>);

    /// Length of any array
    fn array_length(&self, arr: RawHandle) -> usize;
}

/// Process-wide VM instance.
///
/// Hands out per-thread environments. Global handle deletion is the only
/// reference operation that may be performed without an environment, since
/// durable handles routinely outlive the thread that created them.
pub trait VmRuntime: Send + Sync {
    /// Environment of the current thread, if it is attached
    fn current_env(&self) -> Option<Rc<dyn VmEnv>>;

    /// Attach the current thread (blocking) and return its environment
    fn attach_current_thread(&self) -> VmResult<Rc<dyn VmEnv>>;

    /// Detach the current thread
    fn detach_current_thread(&self) -> VmResult<()>;

    /// Delete a global handle from any thread
    fn delete_global_ref(&self, obj: RawHandle);
}
