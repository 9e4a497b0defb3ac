//! AIO end-to-end smoke test.
//!
//! Exercises each backend (simulated, kernel-AIO, io_uring completion
//! port) against a real temp file: submit a batch of positional writes,
//! read them back, and check that every tag and byte range round-trips.
//! Mirrors the style of the teacher's own smoke binaries — section
//! headers, a running pass/fail tally, exit code reflects the tally.

use std::collections::HashMap;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use aio_engine::{create_kernel_aio, create_native_completion_aio, create_simulated_aio, AioEngine, Opcode, PoolKind, Tag, WorkerPool};
use aio_pool::create_pool;

const LINE: &str = "────────────────────────────────────────────────────────────";

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        self.total += 1;
        if ok {
            self.passed += 1;
            println!("  [{:2}] {:<52} PASS", self.total, name);
        } else {
            self.failed += 1;
            println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
        }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!("  Total: {}  Passed: {}  Failed: {}", self.total, self.passed, self.failed);
        println!("{}", LINE);
    }
}

/// Tracks completions delivered off the worker pool and lets the
/// submitting thread block until a target count has arrived.
struct Completions {
    inner: Mutex<HashMap<u64, (i64, i32)>>,
    cv: Condvar,
}

impl Completions {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
        })
    }

    fn record(&self, tag: u64, ret_len: i64, err: i32) {
        let mut guard = self.inner.lock().unwrap();
        guard.insert(tag, (ret_len, err));
        self.cv.notify_all();
    }

    fn wait_for(&self, count: usize, timeout: Duration) -> HashMap<u64, (i64, i32)> {
        let guard = self.inner.lock().unwrap();
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |m| m.len() < count)
            .unwrap();
        guard.clone()
    }
}

fn tag_to_u64(tag: Tag) -> u64 {
    let mut buf = [0u8; 8];
    let slice = tag.as_slice();
    buf[..slice.len().min(8)].copy_from_slice(&slice[..slice.len().min(8)]);
    u64::from_le_bytes(buf)
}

fn wire_callback(engine: &AioEngine, completions: Arc<Completions>) {
    engine.set_callback(move |_handle, _opcode, _offset, _buf, _len, ret_len, err, tag| {
        completions.record(tag_to_u64(tag), ret_len, err);
    });
}

const BLOCK: usize = 4096;
const BLOCKS: usize = 16;

/// Writes `BLOCKS` distinct 4096-byte blocks through `engine`, then reads
/// them back through the same engine, checking tags and content both
/// ways.
fn exercise_backend(t: &mut TestRunner, label: &str, engine: AioEngine, file: &std::fs::File) {
    let fd = file.as_raw_fd();
    let completions = Completions::new();
    wire_callback(&engine, completions.clone());

    if engine.bind(fd).is_err() {
        t.check(&format!("{}: bind(fd)", label), false, "bind failed");
        return;
    }

    // Own the write buffers for the whole round trip — the backend
    // reads from them asynchronously.
    let mut write_bufs: Vec<Vec<u8>> = (0..BLOCKS)
        .map(|i| vec![(i % 256) as u8; BLOCK])
        .collect();

    for (i, buf) in write_bufs.iter_mut().enumerate() {
        let tag = (i as u64).to_le_bytes();
        engine
            .submit_io(fd, Opcode::Write, (i * BLOCK) as u64, buf.as_mut_ptr(), BLOCK as u32, &tag)
            .expect("submit_io(write)");
    }

    let writes = completions.wait_for(BLOCKS, Duration::from_secs(10));
    t.check(
        &format!("{}: all {} writes complete", label, BLOCKS),
        writes.len() == BLOCKS,
        &format!("got {}/{}", writes.len(), BLOCKS),
    );
    let writes_ok = writes.values().all(|&(ret_len, err)| ret_len == BLOCK as i64 && err == 0);
    t.check(&format!("{}: writes report full length, no error", label), writes_ok, "short write or error");

    engine.wait_for_pending_writes();
    t.check(&format!("{}: wait_for_pending_writes returns", label), true, "");

    let read_completions = Completions::new();
    wire_callback(&engine, read_completions.clone());

    let mut read_bufs: Vec<Vec<u8>> = (0..BLOCKS).map(|_| vec![0u8; BLOCK]).collect();
    for (i, buf) in read_bufs.iter_mut().enumerate() {
        let tag = (i as u64).to_le_bytes();
        engine
            .submit_io(fd, Opcode::Read, (i * BLOCK) as u64, buf.as_mut_ptr(), BLOCK as u32, &tag)
            .expect("submit_io(read)");
    }

    let reads = read_completions.wait_for(BLOCKS, Duration::from_secs(10));
    t.check(
        &format!("{}: all {} reads complete", label, BLOCKS),
        reads.len() == BLOCKS,
        &format!("got {}/{}", reads.len(), BLOCKS),
    );

    let mut content_ok = true;
    for (i, buf) in read_bufs.iter().enumerate() {
        if buf.iter().any(|&b| b != (i % 256) as u8) {
            content_ok = false;
        }
    }
    t.check(&format!("{}: read content matches what was written", label), content_ok, "mismatch");

    engine.unbind(fd);
}

fn test_unbound_handle_rejected(t: &mut TestRunner, pool: Arc<WorkerPool>) {
    t.section("Completion-port backend: unbound handle");
    let engine = create_native_completion_aio(pool, 32);
    let mut buf = [0u8; BLOCK];
    let tmp = tempfile();
    let fd = tmp.as_raw_fd();
    // Deliberately not bound.
    let result = engine.submit_io(fd, Opcode::Read, 0, buf.as_mut_ptr(), BLOCK as u32, &0u64.to_le_bytes());
    t.check("submit_io against unbound handle returns an error", result.is_err(), "expected NotBound");
}

fn tempfile() -> std::fs::File {
    let path = std::env::temp_dir().join(format!("aio-smoke-{}.dat", std::process::id()));
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .expect("create temp file")
}

fn main() {
    println!("=== AIO engine smoke test ===");
    let mut t = TestRunner::new();
    let pool = create_pool(PoolKind::Generic);

    t.section("Simulated backend");
    {
        let file = tempfile();
        let engine = create_simulated_aio(pool.clone(), BLOCKS, BLOCKS);
        exercise_backend(&mut t, "simulated", engine, &file);
    }

    t.section("Kernel-AIO backend");
    match create_kernel_aio(pool.clone(), BLOCKS) {
        Some(engine) => {
            let file = tempfile();
            exercise_backend(&mut t, "kernel-aio", engine, &file);
        }
        None => {
            println!("  (kernel AIO context unavailable in this environment — skipped)");
        }
    }

    t.section("Completion-port (io_uring) backend");
    {
        let file = tempfile();
        let engine = create_native_completion_aio(pool.clone(), BLOCKS);
        exercise_backend(&mut t, "completion-port", engine, &file);
    }

    test_unbound_handle_rejected(&mut t, pool.clone());

    pool.shutdown();
    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
