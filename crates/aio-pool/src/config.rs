//! Pool tuning knobs.

use std::time::Duration;

/// Which concrete pool implementation `create_pool` builds.
///
/// The original selects between `threadpool_generic` and
/// `threadpool_win` (backed by `TrySubmitThreadpoolCallback`) purely on
/// `_WIN32`. There is no portable "ask the OS for a threadpool" API
/// outside Windows, so `Native` degrades to the same generic
/// implementation on every platform this crate targets; the variant is
/// kept so call sites that care about the distinction (and a future
/// Windows-hosted build) still have somewhere to express it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Generic,
    Native,
}

/// Configuration for a [`crate::pool::WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of tasks allowed to run concurrently before `submit`
    /// stops waking/creating new workers. Default: `std::thread::available_parallelism()`.
    pub concurrency: usize,
    /// Floor below which the pool will not shrink (reserved for a
    /// future shrink policy; currently workers only exit at shutdown).
    pub min_threads: usize,
    /// Ceiling the stall-detecting timer will not grow the pool past.
    pub max_threads: usize,
    /// How often the timer thread samples pool progress.
    pub timer_interval: Duration,
    /// Safety-net wakeup period for idle workers, bounding how long a
    /// worker can go without re-checking shutdown state.
    pub thread_timeout: Duration,
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            concurrency,
            min_threads: 0,
            max_threads: concurrency * 8,
            timer_interval: Duration::from_millis(10),
            thread_timeout: Duration::from_millis(60_000),
            thread_name: "aio-pool-worker".to_string(),
        }
    }
}
