//! Error types
//!
//! Recoverable failures are returned as [`Error`] values. Contract
//! violations (an unpin with no matching pin, a pointer read back as the
//! wrong type, an object call declared with a primitive return, a failed
//! callback delivery) cannot be reported to anyone meaningful and go through
//! [`FatalPolicy::fail`] instead.

use std::fmt;

use kopi_sdk::VmError;
use serde::{Deserialize, Serialize};

use crate::codec::StructuredError;
use crate::signature::{Signature, SignatureError};

/// Result type for bridge operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What kind of symbol a lookup was for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// A class
    Class,
    /// An instance method
    Method,
    /// A static method
    StaticMethod,
    /// An instance field
    Field,
    /// A static field
    StaticField,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SymbolKind::Class => "class",
            SymbolKind::Method => "method",
            SymbolKind::StaticMethod => "static method",
            SymbolKind::Field => "field",
            SymbolKind::StaticField => "static field",
        })
    }
}

/// Bridge errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A class, method, or field could not be resolved
    #[error("Cannot resolve {kind} {name} with signature {signature}")]
    Lookup {
        /// Symbol kind
        kind: SymbolKind,
        /// Symbol name
        name: String,
        /// Descriptor it was looked up with
        signature: String,
    },

    /// An argument did not match its declared signature
    #[error("Argument {index}: cannot pass {received} as {expected}")]
    Conversion {
        /// Zero-based argument position
        index: usize,
        /// Description of the native value
        received: String,
        /// Declared signature
        expected: Signature,
    },

    /// Wrong number of arguments for the declared signatures
    #[error("Expected {expected} arguments, got {got}")]
    ArgumentCount {
        /// Declared argument count
        expected: usize,
        /// Supplied argument count
        got: usize,
    },

    /// A VM value did not have the expected shape
    #[error("Expected {expected}, found {found}")]
    UnexpectedType {
        /// What was expected
        expected: String,
        /// What was found
        found: String,
    },

    /// A VM exception, drained and converted
    #[error("{class}: {message}")]
    Vm {
        /// Dotted class name of the exception
        class: String,
        /// Exception message
        message: String,
    },

    /// A structured error raised on the VM side
    #[error("{0}")]
    Structured(StructuredError),

    /// Attaching, detaching, or reserving a frame failed
    #[error(transparent)]
    Attach(#[from] VmError),

    /// The structured-error codec failed
    #[error("Error codec failed: {0}")]
    Codec(String),

    /// A signature could not be parsed
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// A worker thread could not be started
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// The bridge configuration was rejected
    #[error("Invalid bridge configuration: {0}")]
    Config(String),

    /// A cached member was used on an object of an unrelated class
    #[error("Object is not an instance of {owner}, which declares {member}")]
    WrongOwner {
        /// Class the member was resolved against
        owner: String,
        /// Member name and descriptor
        member: String,
    },
}

impl Error {
    /// Lookup failure
    pub fn lookup(kind: SymbolKind, name: impl Into<String>, signature: impl fmt::Display) -> Self {
        Error::Lookup {
            kind,
            name: name.into(),
            signature: signature.to_string(),
        }
    }

    /// Stable code used when this error crosses into the VM
    pub fn code(&self) -> &'static str {
        match self {
            Error::Lookup { .. } => "bridge.lookup",
            Error::Conversion { .. } => "bridge.conversion",
            Error::ArgumentCount { .. } => "bridge.argument_count",
            Error::UnexpectedType { .. } => "bridge.unexpected_type",
            Error::Vm { .. } => "vm.exception",
            Error::Structured(_) => "structured",
            Error::Attach(_) => "bridge.attach",
            Error::Codec(_) => "bridge.codec",
            Error::Signature(_) => "bridge.signature",
            Error::Spawn(_) => "bridge.spawn",
            Error::Config(_) => "bridge.config",
            Error::WrongOwner { .. } => "bridge.wrong_owner",
        }
    }

    /// Structured form of this error. A structured error converts to itself.
    pub fn to_structured(&self) -> StructuredError {
        match self {
            Error::Structured(inner) => inner.clone(),
            Error::Vm { class, message } => {
                StructuredError::new(self.code(), message.clone()).with_detail("class", class.clone())
            }
            Error::Conversion { index, expected, .. } => StructuredError::new(self.code(), self.to_string())
                .with_detail("index", index.to_string())
                .with_detail("expected", expected.to_string()),
            other => StructuredError::new(other.code(), other.to_string()),
        }
    }
}

impl From<StructuredError> for Error {
    fn from(error: StructuredError) -> Self {
        Error::Structured(error)
    }
}

// ============================================================================
// Fatal errors
// ============================================================================

/// What to do on a contract violation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatalPolicy {
    /// Panic (unwinds the current thread)
    #[default]
    Panic,
    /// Abort the process
    Abort,
}

impl FatalPolicy {
    /// Report a contract violation and stop
    #[cold]
    pub fn fail(self, message: impl fmt::Display) -> ! {
        log::error!("fatal: {}", message);
        match self {
            FatalPolicy::Panic => panic!("kopi fatal error: {}", message),
            FatalPolicy::Abort => std::process::abort(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = Error::lookup(SymbolKind::Method, "size", "()I");
        assert_eq!(err.to_string(), "Cannot resolve method size with signature ()I");

        let err = Error::Conversion {
            index: 1,
            received: "string".into(),
            expected: Signature::Int,
        };
        assert_eq!(err.to_string(), "Argument 1: cannot pass string as I");
    }

    #[test]
    fn test_to_structured() {
        let vm = Error::Vm {
            class: "java.lang.IllegalStateException".into(),
            message: "closed".into(),
        };
        let structured = vm.to_structured();
        assert_eq!(structured.code, "vm.exception");
        assert_eq!(structured.message, "closed");
        assert_eq!(structured.details["class"], "java.lang.IllegalStateException");

        let inner = StructuredError::new("app.failed", "boom");
        assert_eq!(Error::from(inner.clone()).to_structured(), inner);
        assert_eq!(Error::Spawn("x".into()).to_structured().code, "bridge.spawn");
    }

    #[test]
    #[should_panic(expected = "kopi fatal error: unpin")]
    fn test_fatal_panics_by_default() {
        FatalPolicy::default().fail("unpin of unknown key");
    }
}
