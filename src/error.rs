use std::io;
use thiserror::Error;

/// Errors produced by the worker-pool executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A mutex guarding executor state was poisoned by a panic in another thread
    #[error("mutex lock poisoned")]
    LockPoisoned,

    /// Spawning a worker thread failed
    #[error("thread spawn failed: {0}")]
    ThreadSpawn(io::Error),
}

/// Errors produced by the reactor driving the I/O event loop.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// Reactor initialization failed
    #[error("reactor initialization failed: {0}")]
    Init(io::Error),

    /// Registering a socket with the reactor failed
    #[error("registration failed: {0}")]
    Registration(io::Error),

    /// Event polling failed
    #[error("polling failed: {0}")]
    Polling(io::Error),

    /// A mutex guarding reactor state was poisoned by a panic in another thread
    #[error("mutex lock poisoned")]
    LockPoisoned,

    /// Wrapper for standard I/O errors
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Type alias for Results using ExecutorError as the error type
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Type alias for Results using ReactorError as the error type
pub type ReactorResult<T> = std::result::Result<T, ReactorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_executor_error_display() {
        let io_err = io::Error::new(io::ErrorKind::Other, "boom");
        let exec_err = ExecutorError::ThreadSpawn(io_err);

        assert_eq!(exec_err.to_string(), "thread spawn failed: boom");
    }

    /// Tests the automatic conversion from io::Error to ReactorError
    #[test]
    fn test_reactor_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test error");
        let reactor_err = ReactorError::from(io_err);

        assert!(matches!(reactor_err, ReactorError::Io(_)));
    }
}
