//! # aio-engine — submission/completion engine over three backends
//!
//! `AioEngine` is the single public handle; `factory` builds one bound
//! to whichever backend fits the platform. Every backend dispatches
//! blocking work onto an `aio_pool::WorkerPool` supplied by the caller,
//! so one pool can be shared across several engines the way
//! `threadpool::threadpool` is shared across AIO contexts in the
//! original.

pub mod backends;
pub mod engine;
pub mod factory;

pub use aio_core::{AioError, NativeFileHandle, Opcode, Tag};
pub use aio_pool::{PoolConfig, PoolKind, WorkerPool};
pub use engine::AioEngine;
pub use factory::{create_kernel_aio, create_native_completion_aio, create_simulated_aio};
