//! # aio-core — trait boundary and data model for the AIO engine
//!
//! This crate defines the types every backend and every engine shares:
//! the opaque tag, the opcode, the native file handle, the error type,
//! the `AioBackend` capability trait, and the bounded `ObjectCache`.
//!
//! Concrete backends (`aio-engine`) depend on this crate, never the
//! other way around.

pub mod backend;
pub mod cache;
pub mod error;
pub mod handle;
pub mod opcode;
pub mod tag;

pub use backend::{AioBackend, SubmitOp};
pub use cache::{NotifyMode, ObjectCache};
pub use error::{AioError, Result};
pub use handle::NativeFileHandle;
pub use opcode::Opcode;
pub use tag::Tag;
