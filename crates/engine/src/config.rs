use std::time::Duration;

/// Engine tuning, loaded from environment variables in the binary.
///
/// | Env Var                  | Default | Meaning                              |
/// |--------------------------|---------|--------------------------------------|
/// | `WORKER_COUNT`           | `4`     | Parallel workers in the pool         |
/// | `JOB_SOFT_TIMEOUT_SECS`  | `1500`  | Cooperative cancellation deadline    |
/// | `JOB_HARD_TIMEOUT_SECS`  | `1800`  | Forced-failure deadline              |
/// | `PROGRESS_CACHE_TTL_SECS`| `3600`  | Snapshot lifetime in the cache       |
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of parallel workers pulling from the queue.
    pub worker_count: usize,
    /// Soft deadline: raises the job's cancellation signal, which the worker
    /// observes between steps.
    pub soft_timeout: Duration,
    /// Hard deadline: forcibly fails the job even if the worker does not
    /// cooperate.
    pub hard_timeout: Duration,
    /// How long a progress snapshot stays readable after its last write.
    pub cache_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            soft_timeout: Duration::from_secs(25 * 60),
            hard_timeout: Duration::from_secs(30 * 60),
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl EngineConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let secs = |name: &str, default: Duration| -> Duration {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        Self {
            worker_count: std::env::var("WORKER_COUNT")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.worker_count),
            soft_timeout: secs("JOB_SOFT_TIMEOUT_SECS", defaults.soft_timeout),
            hard_timeout: secs("JOB_HARD_TIMEOUT_SECS", defaults.hard_timeout),
            cache_ttl: secs("PROGRESS_CACHE_TTL_SECS", defaults.cache_ttl),
        }
    }
}
