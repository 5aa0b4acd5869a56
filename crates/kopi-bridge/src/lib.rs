//! Kopi Bridge - native ⇄ managed-VM interop
//!
//! Builds a safe calling layer on top of the raw `kopi-sdk` interface:
//! type signatures, value conversion, scoped and durable references, a call
//! dispatcher, exception translation in both directions, an async callback
//! gateway, and native callbacks the VM can call into.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use kopi_bridge::{Bridge, Signature, Value};
//!
//! let bridge = Bridge::new(runtime)?;
//! let scope = bridge.scope()?;
//! let map = scope.new_object("java.util.HashMap", &[], &[])?;
//! let object = Signature::object();
//! scope.call_method(
//!     map,
//!     "put",
//!     &[object.clone(), object.clone()],
//!     &object,
//!     &[Value::Object(scope.new_string("k")?), Value::Object(scope.new_string("v")?)],
//! )?;
//! let size: i32 = scope.call(map, "size", &[], &Signature::Int, &[])?;
//! ```

#![warn(missing_docs)]

mod bridge;
mod callback;
mod codec;
mod config;
mod convert;
mod dispatch;
mod error;
mod exception;
mod gateway;
mod pin;
mod refs;
mod registry;
mod scope;
mod signature;
mod value;

pub use bridge::Bridge;
pub use callback::{CallbackTable, NativeCallback};
pub use codec::{ErrorCodec, JsonCodec, StructuredError};
pub use config::{BridgeConfig, CallbackConfig, ConfigError, GatewayConfig};
pub use error::{Error, FatalPolicy, Result, SymbolKind};
pub use gateway::{Completion, Delivery, Gateway};
pub use pin::{PinKey, PinTable};
pub use refs::{Durable, Handle};
pub use registry::{FieldRef, MethodRef, Registry};
pub use scope::Scope;
pub use signature::{Signature, SignatureError, ERROR_CLASS, OBJECT_CLASS, STRING_CLASS};
pub use value::{FromValue, IntoValue, OwnedValue, Value};
