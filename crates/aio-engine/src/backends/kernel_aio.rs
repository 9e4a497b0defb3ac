//! Kernel-AIO backend — §4.5.
//!
//! Grounded on `aio_linux.cc`: `do_io_setup`'s halve-and-retry context
//! sizing, the bounded `EAGAIN` retry loop around `io_submit`, and the
//! `getevent_thread_routine` reaper. None of `io_setup`/`io_submit`/
//! `io_getevents`/`io_destroy` have a binding in the `libc` crate, so
//! they're invoked directly through `libc::syscall` — the same
//! raw-syscall idiom `ksvc-module::fixed_pool::execute_syscall` uses for
//! its own unbound syscalls.
//!
//! `linux_iocb : iocb` (C++ struct inheritance, base-first layout) is
//! reproduced as `KernelAioIocb` embedding `RawIocb` as its first field:
//! a `*mut RawIocb` handed back by `io_getevents` can be cast straight
//! to `*mut KernelAioIocb`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use aio_core::{AioBackend, AioError, NativeFileHandle, NotifyMode, ObjectCache, Opcode, Result, SubmitOp, Tag};
use aio_pool::WorkerPool;

use crate::engine::{EngineBackend, EngineCore};

/// Opaque kernel AIO context handle (`aio_context_t`, an `unsigned long`
/// in the kernel ABI).
type AioContextT = u64;

const IOCB_CMD_PREAD: u16 = 0;
const IOCB_CMD_PWRITE: u16 = 1;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        const SYS_IO_SETUP: i64 = 206;
        const SYS_IO_DESTROY: i64 = 207;
        const SYS_IO_GETEVENTS: i64 = 208;
        const SYS_IO_SUBMIT: i64 = 209;
    } else if #[cfg(target_arch = "aarch64")] {
        const SYS_IO_SETUP: i64 = 0;
        const SYS_IO_DESTROY: i64 = 1;
        const SYS_IO_GETEVENTS: i64 = 4;
        const SYS_IO_SUBMIT: i64 = 2;
    } else {
        compile_error!("kernel AIO syscall numbers are not wired up for this target_arch");
    }
}

/// `struct iocb` as defined by the kernel's AIO ABI (`linux/aio_abi.h`).
/// 64 bytes on every 64-bit arch this backend targets.
#[repr(C)]
#[derive(Clone, Copy)]
struct RawIocb {
    aio_data: u64,
    aio_key: u32,
    aio_rw_flags: i32,
    aio_lio_opcode: u16,
    aio_reqprio: i16,
    aio_fildes: u32,
    aio_buf: u64,
    aio_nbytes: u64,
    aio_offset: i64,
    aio_reserved2: u64,
    aio_flags: u32,
    aio_resfd: u32,
}

impl Default for RawIocb {
    fn default() -> Self {
        // Safety: an all-zero `RawIocb` is a valid bit pattern — every
        // field is a plain integer.
        unsafe { std::mem::zeroed() }
    }
}

/// `struct io_event`, 32 bytes.
#[repr(C)]
#[derive(Clone, Copy)]
struct RawIoEvent {
    data: u64,
    obj: u64,
    res: i64,
    res2: i64,
}

/// `linux_iocb : iocb` — the kernel's `iocb` embedded as the first
/// field, followed by the bookkeeping this backend needs to reconstruct
/// a completion.
#[repr(C)]
struct KernelAioIocb {
    raw: RawIocb,
    handle: NativeFileHandle,
    opcode: Opcode,
    offset: u64,
    buf: *mut u8,
    len: u32,
    tag: Tag,
}

impl Default for KernelAioIocb {
    fn default() -> Self {
        Self {
            raw: RawIocb::default(),
            handle: -1,
            opcode: Opcode::Read,
            offset: 0,
            buf: std::ptr::null_mut(),
            len: 0,
            tag: Tag::default(),
        }
    }
}

// Safety: see `CompletionSlot` in `completion_port.rs` — same
// single-owner-between-submit-and-reap invariant.
unsafe impl Send for KernelAioIocb {}

unsafe fn sys_io_setup(nr_events: u32, ctx: *mut AioContextT) -> std::result::Result<(), i32> {
    let ret = libc::syscall(SYS_IO_SETUP, nr_events as libc::c_long, ctx);
    if ret == 0 {
        Ok(())
    } else {
        Err(*libc::__errno_location())
    }
}

unsafe fn sys_io_destroy(ctx: AioContextT) {
    libc::syscall(SYS_IO_DESTROY, ctx);
}

unsafe fn sys_io_submit(ctx: AioContextT, iocb: *mut RawIocb) -> std::result::Result<i64, i32> {
    let mut list: [*mut RawIocb; 1] = [iocb];
    let ret = libc::syscall(SYS_IO_SUBMIT, ctx, 1i64, list.as_mut_ptr());
    if ret >= 0 {
        Ok(ret)
    } else {
        Err(*libc::__errno_location())
    }
}

unsafe fn sys_io_getevents(
    ctx: AioContextT,
    min_nr: i64,
    max_nr: i64,
    events: *mut RawIoEvent,
) -> std::result::Result<i64, i32> {
    let ret = libc::syscall(
        SYS_IO_GETEVENTS,
        ctx,
        min_nr,
        max_nr,
        events,
        std::ptr::null::<libc::timespec>(),
    );
    if ret >= 0 {
        Ok(ret)
    } else {
        Err(*libc::__errno_location())
    }
}

/// Can decrease `nr_events` by half repeatedly on `EAGAIN` (per-user
/// resource limits in `/proc/sys/fs/aio-max-nr`), never going below 128.
fn do_io_setup(mut nr_events: usize) -> Option<(AioContextT, usize)> {
    loop {
        let mut ctx: AioContextT = 0;
        match unsafe { sys_io_setup(nr_events as u32, &mut ctx) } {
            Ok(()) => return Some((ctx, nr_events)),
            Err(errno) => {
                nr_events /= 2;
                if nr_events >= 128 && errno == libc::EAGAIN {
                    continue;
                }
                return None;
            }
        }
    }
}

const IO_SUBMIT_EAGAIN_RETRIES: u32 = 100;
const IO_SUBMIT_EAGAIN_SLEEP: Duration = Duration::from_micros(1_000_000);
const MAX_EVENTS: usize = 64;

pub struct KernelAioBackend {
    ctx: AioContextT,
    cache: ObjectCache<KernelAioIocb>,
    core: Arc<EngineCore>,
    pool: Arc<WorkerPool>,
    shutdown: Arc<AtomicBool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl KernelAioBackend {
    /// Returns `None` exactly when `do_io_setup` cannot obtain a kernel
    /// AIO context even at the 128-event floor.
    pub fn new(core: Arc<EngineCore>, pool: Arc<WorkerPool>, max_count: usize) -> Option<Arc<Self>> {
        let (ctx, real_max_count) = do_io_setup(max_count.max(1))?;

        let backend = Arc::new(Self {
            ctx,
            cache: ObjectCache::new(real_max_count, NotifyMode::One),
            core,
            pool,
            shutdown: Arc::new(AtomicBool::new(false)),
            reaper: Mutex::new(None),
        });

        let reaper_backend = backend.clone();
        let handle = thread::Builder::new()
            .name("aio-kernel-reaper".to_string())
            .spawn(move || reaper_loop(reaper_backend))
            .expect("failed to spawn kernel-AIO reaper thread");
        *backend.reaper.lock().unwrap() = Some(handle);

        Some(backend)
    }
}

impl AioBackend for KernelAioBackend {
    fn bind(&self, _handle: NativeFileHandle) -> Result<()> {
        Ok(())
    }

    fn unbind(&self, _handle: NativeFileHandle) -> Result<()> {
        Ok(())
    }

    fn submit(&self, op: SubmitOp) -> Result<()> {
        let cb_ptr = self.cache.acquire();
        unsafe {
            (*cb_ptr).handle = op.handle;
            (*cb_ptr).opcode = op.opcode;
            (*cb_ptr).offset = op.offset;
            (*cb_ptr).buf = op.buf;
            (*cb_ptr).len = op.len as u32;
            (*cb_ptr).tag = op.tag;

            let raw = &mut (*cb_ptr).raw;
            *raw = RawIocb::default();
            raw.aio_data = cb_ptr as u64;
            raw.aio_fildes = op.handle as u32;
            raw.aio_buf = op.buf as u64;
            raw.aio_nbytes = op.len as u64;
            raw.aio_offset = op.offset as i64;
            raw.aio_lio_opcode = match op.opcode {
                Opcode::Read => IOCB_CMD_PREAD,
                Opcode::Write => IOCB_CMD_PWRITE,
            };
        }

        let raw_ptr: *mut RawIocb = unsafe { &mut (*cb_ptr).raw };

        for n_retries in 0..=IO_SUBMIT_EAGAIN_RETRIES {
            let result = unsafe { sys_io_submit(self.ctx, raw_ptr) };
            match result {
                Ok(1) => return Ok(()),
                Err(errno) if errno == libc::EAGAIN && n_retries < IO_SUBMIT_EAGAIN_RETRIES => {
                    thread::sleep(IO_SUBMIT_EAGAIN_SLEEP);
                    continue;
                }
                _ => {
                    unsafe { self.cache.release(cb_ptr) };
                    return Err(AioError::ResourceExhausted);
                }
            }
        }

        unsafe { self.cache.release(cb_ptr) };
        Err(AioError::ResourceExhausted)
    }
}

impl EngineBackend for KernelAioBackend {
    fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        unsafe { sys_io_destroy(self.ctx) };
        if let Some(handle) = self.reaper.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn reaper_loop(backend: Arc<KernelAioBackend>) {
    let mut events = [RawIoEvent {
        data: 0,
        obj: 0,
        res: 0,
        res2: 0,
    }; MAX_EVENTS];

    loop {
        let result = unsafe {
            sys_io_getevents(backend.ctx, 1, MAX_EVENTS as i64, events.as_mut_ptr())
        };

        if backend.shutdown.load(Ordering::Acquire) {
            return;
        }

        match result {
            Ok(count) if count > 0 => {
                for event in &events[..count as usize] {
                    let iocb_ptr = event.obj as *mut KernelAioIocb;
                    let (handle, opcode, offset, buf, len, tag) = unsafe {
                        let iocb = &*iocb_ptr;
                        (iocb.handle, iocb.opcode, iocb.offset, iocb.buf, iocb.len, iocb.tag)
                    };
                    unsafe { backend.cache.release(iocb_ptr) };

                    let res = event.res;
                    let (ret_len, err) = if res < 0 { (0i64, -res as i32) } else { (res, 0) };

                    let core = backend.core.clone();
                    backend.pool.submit(vec![Box::new(move || {
                        core.deliver(handle, opcode, offset, buf, len, ret_len, err, tag);
                    })]);
                }
            }
            Ok(_) => continue,
            Err(errno) if errno == libc::EAGAIN => {
                thread::sleep(Duration::from_millis(1));
                continue;
            }
            Err(errno) if errno == libc::EINTR => continue,
            Err(_) => {
                // Unexpected kernel error on the reaper thread: there is
                // no way to make further progress on this context.
                std::process::abort();
            }
        }
    }
}
