//! Error types for the buffer store

use thiserror::Error;

use crate::transfer::TransferFault;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by store and session operations
///
/// "No data available" on a read is not an error: it is `Ok(0)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("capacity exceeded: {required} bytes required, maximum is {max}")]
    CapacityExceeded { required: usize, max: usize },

    #[error("transfer fault: {0}")]
    TransferFault(#[from] TransferFault),

    #[error("interrupted")]
    Interrupted,

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("session is not open for {0}")]
    BadHandle(&'static str),

    #[error("operation requires the administrative identity")]
    PermissionDenied,

    #[error("store is shut down")]
    ShutDown,
}

impl StoreError {
    /// POSIX error code the device interface reports for this error
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            StoreError::InvalidArgument(_) => 22,                             // EINVAL
            StoreError::OutOfMemory { .. } | StoreError::CapacityExceeded { .. } => 12, // ENOMEM
            StoreError::TransferFault(_) => 14,                               // EFAULT
            StoreError::Interrupted => 4,                                     // EINTR
            StoreError::Unsupported(_) => 25,                                 // ENOTTY
            StoreError::BadHandle(_) => 9,                                    // EBADF
            StoreError::PermissionDenied => 1,                                // EPERM
            StoreError::ShutDown => 19,                                       // ENODEV
        }
    }
}

/// Errors produced while loading or validating a `StoreConfig`
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse store config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read store config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid store config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_exceeded_reports_enomem() {
        let err = StoreError::CapacityExceeded {
            required: 2048,
            max: 1024,
        };
        assert_eq!(err.errno(), 12);
        assert_eq!(
            err.to_string(),
            "capacity exceeded: 2048 bytes required, maximum is 1024"
        );
    }

    #[test]
    fn test_distinct_interrupted_code() {
        assert_eq!(StoreError::Interrupted.errno(), 4);
        assert_ne!(
            StoreError::Interrupted.errno(),
            StoreError::InvalidArgument("x").errno()
        );
    }
}
