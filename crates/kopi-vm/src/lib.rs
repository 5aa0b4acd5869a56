//! Kopi VM - an in-process managed runtime
//!
//! `SandboxVm` implements the `kopi-sdk` runtime traits with a small object
//! model: classes with inheritance and interfaces, strings, byte and object
//! arrays, throwables, primitive boxes, and a hash map. Method bodies are
//! Rust closures that talk to the VM through the same [`VmEnv`] calls native
//! code uses.
//!
//! The sandbox checks reference discipline strictly. Using a popped or
//! deleted local, a local from another thread, a released global, or making
//! a disallowed call while an exception is pending panics immediately
//! instead of corrupting memory.
//!
//! # Example
//!
//! ```ignore
//! use kopi_sdk::{ValueKind, VmRuntime, VmValue};
//! use kopi_vm::{ClassBuilder, SandboxVm};
//!
//! let vm = SandboxVm::new();
//! vm.define_class(
//!     ClassBuilder::new("demo/Counter")
//!         .constructor("()V", |_, _| VmValue::Void)
//!         .method("next", "()I", |_, _| VmValue::Int(1)),
//! )?;
//! let env = vm.attach_current_thread()?;
//! let class = env.find_class("demo/Counter").unwrap();
//! ```
//!
//! [`VmEnv`]: kopi_sdk::VmEnv

#![warn(missing_docs)]

pub mod builtins;
mod class;
mod env;
mod heap;
mod runtime;

pub use class::{ClassBuilder, DefineError, Invocation, MethodFn, CLASS_CLASS, OBJECT_CLASS};
pub use env::{SandboxEnv, MAX_FRAME_CAPACITY};
pub use runtime::{SandboxStats, SandboxVm};
