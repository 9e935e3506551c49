//! Unified error handling for the device runtime
//!
//! Internal APIs return `RuntimeResult` and propagate with `?`. Backend
//! failures are not recoverable at this layer; the C ABI facade is the
//! single place where an error becomes a process-fatal diagnostic.

use thiserror::Error;

/// Errors surfaced by the device runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A backend driver call returned a non-success status
    #[error("{api} failed with status {code}: {message}")]
    Backend {
        api: &'static str,
        code: i64,
        message: String,
    },

    /// Device id carries a platform tag nothing is registered for
    #[error("unknown platform tag {0} in device id")]
    UnknownPlatform(u32),

    /// Device index outside the platform's enumerated devices
    #[error("device index {index} out of range for platform '{platform}' ({count} device(s))")]
    InvalidDevice {
        platform: &'static str,
        index: usize,
        count: usize,
    },

    /// Negative byte count handed through the ABI
    #[error("negative size {0} rejected")]
    NegativeSize(i64),

    /// Kernel file extension the platform does not recognize
    #[error("unsupported kernel file extension for '{0}'")]
    UnsupportedExtension(String),

    /// Kernel file neither registered nor present on disk
    #[error("kernel file '{0}' not found")]
    KernelFileNotFound(String),

    /// IR lowering or native code generation failure
    #[error("JIT compilation failed: {0}")]
    Jit(String),

    /// Operation the platform cannot perform
    #[error("{0}")]
    Unsupported(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error, indicates a bug
    #[error("internal error: {0}")]
    Internal(String),

    /// Lock poisoned, indicates a bug
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for RuntimeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        RuntimeError::LockPoisoned(err.to_string())
    }
}

/// Result type used throughout the runtime.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_names_the_api_call() {
        let err = RuntimeError::Backend {
            api: "hsa_memory_allocate",
            code: 4096,
            message: "HSA_STATUS_ERROR_OUT_OF_RESOURCES".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("hsa_memory_allocate"));
        assert!(text.contains("4096"));
    }

    #[test]
    fn unknown_platform_names_the_tag() {
        let err = RuntimeError::UnknownPlatform(7);
        assert!(err.to_string().contains('7'));
    }

    #[test]
    fn poison_error_converts() {
        use std::sync::PoisonError;

        fn convert<T>(err: PoisonError<T>) -> RuntimeError {
            RuntimeError::from(err)
        }
        let _ = convert::<i32> as fn(PoisonError<i32>) -> RuntimeError;
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RuntimeError = io_err.into();
        assert!(matches!(err, RuntimeError::Io(_)));
    }
}
