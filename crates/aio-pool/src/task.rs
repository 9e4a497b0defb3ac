//! Pool task type.
//!
//! The original's `task { void (*m_func)(int, void*); void* m_arg; }` pair
//! becomes a boxed closure — there is no argument-pointer dance to do in
//! Rust, the closure already captures what it needs.

/// A unit of work submitted to a [`crate::pool::WorkerPool`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;
