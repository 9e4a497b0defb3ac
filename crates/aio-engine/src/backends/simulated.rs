//! Simulated backend — §4.6.
//!
//! Grounded on `aio_simulated.cc`: a pooled IOCB handed a worker-pool
//! task that performs a blocking `pread`/`pwrite`, reclaims the IOCB,
//! and hands the result to the engine. The original keeps one unbounded
//! freelist shared across both opcodes; this backend keeps one bounded
//! [`ObjectCache`] per opcode instead, sized by `read_slots`/
//! `write_slots` at construction, so a runaway submitter blocks on
//! `acquire()` rather than growing memory without limit.

use std::sync::{Arc, Weak};

use aio_core::{AioBackend, NativeFileHandle, NotifyMode, ObjectCache, Opcode, Result, SubmitOp, Tag};
use aio_pool::WorkerPool;

use crate::engine::{EngineBackend, EngineCore};

#[derive(Clone, Copy)]
struct SimulatedIocb {
    handle: NativeFileHandle,
    offset: u64,
    buf: *mut u8,
    len: u32,
    tag: Tag,
}

impl Default for SimulatedIocb {
    fn default() -> Self {
        Self {
            handle: -1,
            offset: 0,
            buf: std::ptr::null_mut(),
            len: 0,
            tag: Tag::default(),
        }
    }
}

// Safety: see `CompletionSlot` in `completion_port.rs`.
unsafe impl Send for SimulatedIocb {}

pub struct SimulatedBackend {
    self_weak: Weak<SimulatedBackend>,
    read_cache: ObjectCache<SimulatedIocb>,
    write_cache: ObjectCache<SimulatedIocb>,
    core: Arc<EngineCore>,
    pool: Arc<WorkerPool>,
}

impl SimulatedBackend {
    pub fn new(core: Arc<EngineCore>, pool: Arc<WorkerPool>, read_slots: usize, write_slots: usize) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_weak: weak.clone(),
            read_cache: ObjectCache::new(read_slots.max(1), NotifyMode::One),
            write_cache: ObjectCache::new(write_slots.max(1), NotifyMode::One),
            core,
            pool,
        })
    }

    fn cache_for(&self, opcode: Opcode) -> &ObjectCache<SimulatedIocb> {
        match opcode {
            Opcode::Read => &self.read_cache,
            Opcode::Write => &self.write_cache,
        }
    }
}

impl AioBackend for SimulatedBackend {
    fn bind(&self, _handle: NativeFileHandle) -> Result<()> {
        Ok(())
    }

    fn unbind(&self, _handle: NativeFileHandle) -> Result<()> {
        Ok(())
    }

    fn submit(&self, op: SubmitOp) -> Result<()> {
        let iocb_ptr = self.cache_for(op.opcode).acquire();
        unsafe {
            *iocb_ptr = SimulatedIocb {
                handle: op.handle,
                offset: op.offset,
                buf: op.buf,
                len: op.len as u32,
                tag: op.tag,
            };
        }

        // Keep the backend (and therefore its object caches) alive for
        // as long as this task outlives `submit`, rather than reaching
        // for a raw pointer into `self`.
        let backend = self
            .self_weak
            .upgrade()
            .expect("backend dropped while a submit was still in flight");
        let opcode = op.opcode;

        self.pool.submit(vec![Box::new(move || {
            let iocb = unsafe { *iocb_ptr };
            unsafe { backend.cache_for(opcode).release(iocb_ptr) };

            let result = match opcode {
                Opcode::Read => unsafe {
                    libc::pread(
                        iocb.handle,
                        iocb.buf as *mut libc::c_void,
                        iocb.len as usize,
                        iocb.offset as libc::off_t,
                    )
                },
                Opcode::Write => unsafe {
                    libc::pwrite(
                        iocb.handle,
                        iocb.buf as *const libc::c_void,
                        iocb.len as usize,
                        iocb.offset as libc::off_t,
                    )
                },
            };

            let (ret_len, err) = if result < 0 {
                (0i64, unsafe { *libc::__errno_location() })
            } else {
                (result as i64, 0)
            };

            backend
                .core
                .deliver(iocb.handle, opcode, iocb.offset, iocb.buf, iocb.len, ret_len, err, iocb.tag);
        })]);

        Ok(())
    }
}

impl EngineBackend for SimulatedBackend {
    fn request_shutdown(&self) {
        // No dedicated thread of its own: every in-flight operation is
        // already a task on the shared pool, which the engine's owner
        // drains independently.
    }
}
