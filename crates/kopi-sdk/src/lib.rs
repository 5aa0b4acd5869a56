//! Kopi SDK - raw interface to a managed VM
//!
//! This crate defines the minimal surface a managed, garbage-collected VM
//! exposes to native code: opaque handles, the tagged call-value union, and
//! the per-thread environment / process-wide runtime traits. It contains no
//! marshalling logic; `kopi-bridge` builds on top of it.
//!
//! # Example
//!
//! ```ignore
//! use kopi_sdk::{ValueKind, VmEnv, VmValue};
//!
//! fn string_length(env: &dyn VmEnv, s: kopi_sdk::RawHandle) -> Option<i32> {
//!     let class = env.get_object_class(s);
//!     let length = env.get_method_id(class, "length", "()I")?;
//!     let value = env.call_method(s, length, ValueKind::Int, &[]);
//!     if env.exception_check() {
//!         env.exception_clear();
//!         return None;
//!     }
//!     value.as_int()
//! }
//! ```

#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod handle;
pub mod value;

pub use context::{VmEnv, VmRuntime};
pub use error::{VmError, VmResult};
pub use handle::{FieldId, HandleKind, MethodId, RawHandle};
pub use value::{ValueKind, VmValue, VM_FALSE, VM_TRUE};
