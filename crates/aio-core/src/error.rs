//! AIO error types.

use std::fmt;

#[derive(Debug)]
pub enum AioError {
    /// Submitted against a handle that was never `bind()`-ed.
    NotBound,
    /// Backend-specific submission queue is full.
    RingFull,
    /// Kernel resource exhausted at submit time, even after bounded retry.
    ResourceExhausted,
    /// The opcode/argument combination the backend was asked to perform
    /// is not one it can execute (defensive; should not occur in practice).
    Unsupported,
    /// Raw OS error, errno-shaped.
    Os(i32),
}

impl fmt::Display for AioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotBound => write!(f, "file handle not bound to this backend"),
            Self::RingFull => write!(f, "submission queue full"),
            Self::ResourceExhausted => write!(f, "kernel resource exhausted"),
            Self::Unsupported => write!(f, "unsupported operation"),
            Self::Os(errno) => write!(f, "OS error: errno {}", errno),
        }
    }
}

impl std::error::Error for AioError {}

pub type Result<T> = std::result::Result<T, AioError>;
