use thiserror::Error;

/// Errors surfaced by memory syscall wrappers.
#[derive(Error, Debug)]
pub enum MemprotError {
    /// The underlying syscall failed; the string carries the OS error.
    #[error("system operation failed: {0}")]
    SystemError(String),

    /// Invalid arguments were provided to the operation.
    #[error("invalid arguments: {0}")]
    InvalidArgument(String),

    /// The operation is not supported on this platform.
    #[error("operation not supported on this platform: {0}")]
    NotSupported(String),
}
