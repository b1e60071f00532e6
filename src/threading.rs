use std::env;
use std::sync::OnceLock;

/// A wrapper around the Rayon thread pool used by parallel kernels.
///
/// If the pool could not be created, work runs directly on the calling
/// thread.
pub struct ThreadPool {
    /// The wrapped thread pool, or None if we failed to construct one.
    pool: Option<rayon::ThreadPool>,
}

impl ThreadPool {
    /// Run a function in the thread pool.
    ///
    /// This corresponds to [`rayon::ThreadPool::install`], except that if no
    /// pool is available it just runs `op` directly.
    pub fn run<R: Send, Op: FnOnce() -> R + Send>(&self, op: Op) -> R {
        if let Some(pool) = self.pool.as_ref() {
            pool.install(op)
        } else {
            op()
        }
    }

    /// Create a thread pool with a given number of threads.
    pub fn with_num_threads(num_threads: usize) -> ThreadPool {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("infergraph-{}", index))
            .build();

        ThreadPool { pool: pool.ok() }
    }

    /// Return the number of threads in the pool.
    pub fn num_threads(&self) -> usize {
        self.pool
            .as_ref()
            .map(|pool| pool.current_num_threads())
            .unwrap_or(1)
    }
}

/// Parse a thread count override, clamping it to `[1, max_threads]`.
fn parse_num_threads(value: &str, max_threads: usize) -> Option<usize> {
    value
        .trim()
        .parse::<usize>()
        .ok()
        .map(|n| n.clamp(1, max_threads.max(1)))
}

/// Return the [Rayon][rayon] thread pool which is used by parallel kernels.
///
/// This differs from Rayon's default global thread pool in that it is tuned
/// for CPU rather than IO-bound work by choosing a thread count based on the
/// number of physical rather than logical cores.
///
/// The thread count can be overridden at the process level by setting the
/// `INFERGRAPH_NUM_THREADS` environment variable, whose value must be a
/// number between 1 and the logical core count.
///
/// [rayon]: https://github.com/rayon-rs/rayon
pub fn thread_pool() -> &'static ThreadPool {
    static THREAD_POOL: OnceLock<ThreadPool> = OnceLock::new();
    THREAD_POOL.get_or_init(|| {
        let physical_cpus = num_cpus::get_physical().max(1);
        let num_threads = env::var("INFERGRAPH_NUM_THREADS")
            .ok()
            .and_then(|value| parse_num_threads(&value, num_cpus::get()))
            .unwrap_or(physical_cpus);
        ThreadPool::with_num_threads(num_threads)
    })
}
