//! Error types for the raw VM interface

/// Result type for runtime-level operations
pub type VmResult<T> = Result<T, VmError>;

/// Failures of the runtime itself (as opposed to VM exceptions, which are
/// reported out-of-band through the pending-exception slot)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// The current thread could not be attached to the VM
    #[error("Failed to attach thread: {0}")]
    AttachFailed(String),

    /// The current thread could not be detached
    #[error("Failed to detach thread: {0}")]
    DetachFailed(String),

    /// The operation needs an attached thread
    #[error("Current thread is not attached to the VM")]
    NotAttached,

    /// A local frame could not be reserved
    #[error("Cannot reserve local frame of {requested} references")]
    FrameOverflow {
        /// Requested capacity
        requested: usize,
    },
}
