//! Backend capability trait — §4.3, §9 "polymorphism over backends".
//!
//! The original models each backend as a struct inheriting from a common
//! `aio` base class. Rust has no class hierarchy to inherit from, so the
//! shared surface is expressed as a trait instead: interface dispatch, no
//! base-class state. Each concrete backend (`aio-engine::backends::*`)
//! owns its own fields and implements this trait directly.

use crate::error::Result;
use crate::handle::NativeFileHandle;
use crate::opcode::Opcode;
use crate::tag::Tag;

/// A single positional read or write request as handed to a backend.
#[derive(Debug, Clone, Copy)]
pub struct SubmitOp {
    pub handle: NativeFileHandle,
    pub opcode: Opcode,
    /// Byte offset into the file.
    pub offset: u64,
    /// Pointer to the caller-owned buffer. For reads the backend writes
    /// into it; for writes the backend reads from it. The buffer must
    /// remain valid and unmoved until the completion callback fires.
    pub buf: *mut u8,
    pub len: usize,
    /// Opaque value returned to the completion callback unchanged.
    pub tag: Tag,
}

// Safety: `SubmitOp` is handed from the submitting thread to backend
// internals (and, for the simulated backend, across to a worker-pool
// thread) exactly once before its buffer is touched; the caller
// guarantees the buffer outlives the round trip and that no other
// reference to it exists for the duration.
unsafe impl Send for SubmitOp {}

/// Capability set every AIO backend implements: bind a handle so it may
/// be submitted against, unbind it, and submit a request.
///
/// Binding is a no-op on backends with no kernel concept of per-handle
/// registration (kernel-AIO, simulated) but is enforced uniformly here
/// so callers get the same contract — and the same failure mode for
/// submitting against an unbound handle — regardless of which backend
/// is in play.
pub trait AioBackend: Send + Sync {
    /// Register `handle` with this backend. Idempotent.
    fn bind(&self, handle: NativeFileHandle) -> Result<()>;

    /// Unregister `handle`. Submits against it fail after this returns.
    fn unbind(&self, handle: NativeFileHandle) -> Result<()>;

    /// Submit one request. Returns once the request is *accepted* for
    /// processing, not once it completes — completion is delivered later
    /// via the engine's callback.
    fn submit(&self, op: SubmitOp) -> Result<()>;
}
