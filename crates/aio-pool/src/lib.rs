//! # aio-pool — cooperative dynamically-sized worker thread pool
//!
//! A shared task queue plus a LIFO stack of standby workers for
//! cache-warm wakeups, backed by a dedicated timer thread that grows
//! the pool when it detects no progress despite every worker being
//! busy. Used by `aio-engine`'s simulated backend to run blocking I/O
//! off the submitting thread, but has no dependency on `aio-core` or
//! `aio-engine` itself.

pub mod config;
pub mod pool;
pub mod task;

pub use config::{PoolConfig, PoolKind};
pub use pool::{create_pool, WorkerPool};
pub use task::Task;
