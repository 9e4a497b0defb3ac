//! Submits N writes through one AIO backend and reports completions/sec.
//!
//! Usage: aio-bench [simulated|kernel|io_uring] [count] [block_size]

use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use aio_engine::{create_kernel_aio, create_native_completion_aio, create_simulated_aio, Opcode, PoolKind};
use aio_pool::create_pool;

struct Done {
    count: AtomicUsize,
    target: usize,
    lock: Mutex<()>,
    cv: Condvar,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let backend = args.get(1).map(String::as_str).unwrap_or("simulated");
    let count: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10_000);
    let block_size: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(4096);

    let pool = create_pool(PoolKind::Generic);
    let path = std::env::temp_dir().join(format!("aio-bench-{}.dat", std::process::id()));
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .expect("create temp file");
    file.set_len((count * block_size) as u64).expect("truncate temp file");
    let fd = file.as_raw_fd();

    let done = Arc::new(Done {
        count: AtomicUsize::new(0),
        target: count,
        lock: Mutex::new(()),
        cv: Condvar::new(),
    });

    macro_rules! wire {
        ($engine:expr) => {{
            let d = done.clone();
            $engine.set_callback(move |_h, _op, _off, _buf, _len, _ret, _err, _tag| {
                if d.count.fetch_add(1, Ordering::SeqCst) + 1 == d.target {
                    let _g = d.lock.lock().unwrap();
                    d.cv.notify_all();
                }
            });
        }};
    }

    let buf = vec![0xABu8; block_size];
    let mut buf_copies: Vec<Vec<u8>> = (0..count).map(|_| buf.clone()).collect();

    println!("aio-bench: backend={} count={} block_size={}", backend, count, block_size);
    let start = Instant::now();

    match backend {
        "simulated" => {
            let engine = create_simulated_aio(pool.clone(), 256, 256);
            wire!(engine);
            engine.bind(fd).unwrap();
            submit_all(&engine, fd, &mut buf_copies, block_size);
        }
        "kernel" => {
            let engine = create_kernel_aio(pool.clone(), 256).expect("kernel AIO unavailable in this environment");
            wire!(engine);
            engine.bind(fd).unwrap();
            submit_all(&engine, fd, &mut buf_copies, block_size);
        }
        "io_uring" => {
            let engine = create_native_completion_aio(pool.clone(), 256);
            wire!(engine);
            engine.bind(fd).unwrap();
            submit_all(&engine, fd, &mut buf_copies, block_size);
        }
        other => {
            eprintln!("unknown backend {:?}, expected simulated|kernel|io_uring", other);
            std::process::exit(2);
        }
    }

    {
        let guard = done.lock.lock().unwrap();
        let _ = done
            .cv
            .wait_timeout_while(guard, std::time::Duration::from_secs(60), |_| {
                done.count.load(Ordering::SeqCst) < done.target
            })
            .unwrap();
    }

    let elapsed = start.elapsed();
    let completed = done.count.load(Ordering::SeqCst);
    let secs = elapsed.as_secs_f64();
    println!(
        "completed {}/{} in {:.3}s — {:.0} ops/sec, {:.1} MB/s",
        completed,
        count,
        secs,
        completed as f64 / secs,
        (completed * block_size) as f64 / secs / 1_000_000.0,
    );

    pool.shutdown();
    let _ = std::fs::remove_file(&path);
}

fn submit_all(
    engine: &aio_engine::AioEngine,
    fd: i32,
    buf_copies: &mut [Vec<u8>],
    block_size: usize,
) {
    for (i, buf) in buf_copies.iter_mut().enumerate() {
        let tag = (i as u64).to_le_bytes();
        engine
            .submit_io(fd, Opcode::Write, (i * block_size) as u64, buf.as_mut_ptr(), block_size as u32, &tag)
            .expect("submit_io");
    }
}
