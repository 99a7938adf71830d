//! Scheduler configuration
//!
//! Values come from code (`with_*` methods) or from the environment:
//!
//! | Variable              | Meaning                                    |
//! |-----------------------|--------------------------------------------|
//! | `GOFLOW_NUM_THREADS`  | worker threads (0 = one per logical CPU)   |
//! | `GOFLOW_MAX_PENDING`  | cap on queued + running tasks (0 = none)   |
//! | `GOFLOW_STACK_SIZE`   | worker thread stack size in bytes          |

use crate::error::ConfigError;

/// Environment variable overriding the worker count
pub const ENV_NUM_THREADS: &str = "GOFLOW_NUM_THREADS";

/// Environment variable enabling the bounded (backpressure) scheduler
pub const ENV_MAX_PENDING: &str = "GOFLOW_MAX_PENDING";

/// Environment variable overriding the worker stack size
pub const ENV_STACK_SIZE: &str = "GOFLOW_STACK_SIZE";

/// Default thread-name prefix for workers
pub const DEFAULT_THREAD_PREFIX: &str = "goflow-worker";

/// Scheduler construction parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads (0 = number of logical CPUs)
    pub worker_count: usize,

    /// Maximum queued + running tasks before `spawn` blocks (None = unbounded)
    pub max_pending: Option<usize>,

    /// Worker threads are named `<prefix>-<index>`
    pub thread_prefix: String,

    /// Stack size for worker threads (None = platform default)
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            max_pending: None,
            thread_prefix: DEFAULT_THREAD_PREFIX.to_string(),
            stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Configuration with an explicit worker count
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Self::default()
        }
    }

    /// Read overrides from the environment on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(n) = parse_var(&lookup, ENV_NUM_THREADS)? {
            config.worker_count = n;
        }
        if let Some(n) = parse_var(&lookup, ENV_MAX_PENDING)? {
            config.max_pending = (n > 0).then_some(n);
        }
        if let Some(n) = parse_var(&lookup, ENV_STACK_SIZE)? {
            config.stack_size = (n > 0).then_some(n);
        }

        Ok(config)
    }

    /// Set the worker count
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Cap the number of queued + running tasks; `spawn` blocks at the cap
    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = Some(max_pending.max(1));
        self
    }

    /// Set the worker thread-name prefix
    pub fn with_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_prefix = prefix.into();
        self
    }

    /// Set the worker stack size
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Worker count after resolving 0 to the CPU count
    pub fn effective_workers(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_count
        }
    }
}

fn parse_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<usize>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<usize>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue { var, value: raw })
        }
    }
}
