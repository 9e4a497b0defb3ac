//! Platform factory — §5.7.
//!
//! Grounded on `aio0aio.h`'s `create_win_aio`/`create_linux_aio`/
//! `create_simulated_aio` free functions and `tp0tp.h`'s
//! `create_threadpool`.

use std::sync::Arc;

use aio_core::NativeFileHandle;
use aio_pool::WorkerPool;

use crate::backends::completion_port::CompletionPortBackend;
use crate::backends::kernel_aio::KernelAioBackend;
use crate::backends::simulated::SimulatedBackend;
use crate::engine::{AioEngine, EngineCore};

/// Builds an engine backed by raw Linux kernel AIO (`io_setup`/
/// `io_submit`/`io_getevents`). Returns `None` if the kernel refuses to
/// hand out an AIO context even at the smallest size `do_io_setup` will
/// retry down to.
pub fn create_kernel_aio(pool: Arc<WorkerPool>, max_count: usize) -> Option<AioEngine> {
    let core = Arc::new(EngineCore::new());
    let backend = KernelAioBackend::new(core.clone(), pool, max_count)?;
    Some(AioEngine::from_parts(core, backend))
}

/// Builds an engine backed by this host's native completion queue
/// (`io_uring`, standing in for the original's Windows IOCP backend).
pub fn create_native_completion_aio(pool: Arc<WorkerPool>, max_count: usize) -> AioEngine {
    let core = Arc::new(EngineCore::new());
    let backend = CompletionPortBackend::new(core.clone(), pool, max_count)
        .expect("failed to initialise io_uring completion-port backend");
    AioEngine::from_parts(core, backend)
}

/// Builds an engine that performs blocking `pread`/`pwrite` on the
/// worker pool instead of using any kernel async I/O facility.
pub fn create_simulated_aio(pool: Arc<WorkerPool>, read_slots: usize, write_slots: usize) -> AioEngine {
    let core = Arc::new(EngineCore::new());
    let backend = SimulatedBackend::new(core.clone(), pool, read_slots, write_slots);
    AioEngine::from_parts(core, backend)
}

/// Re-exported so callers never need to reach into `aio_core` directly
/// just to name a file descriptor.
pub type FileHandle = NativeFileHandle;
