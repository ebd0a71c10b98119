//! Configuration types for ForgeQ.

use serde::{Deserialize, Serialize};

/// Main configuration for a forge instance.
///
/// # Examples
///
/// ```rust
/// use forgeq::config::{ForgeConfig, WorkerSettings};
///
/// // Default configuration
/// let config = ForgeConfig::default();
///
/// // Custom configuration
/// let config = ForgeConfig {
///     workers: WorkerSettings {
///         count: 4,
///         idle_backoff_ms: 500,
///         ..Default::default()
///     },
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    /// Worker pool settings
    pub workers: WorkerSettings,

    /// Stale-claim sweeper settings
    pub sweeper: SweeperSettings,

    /// Store settings
    pub store: StoreSettings,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Number of worker loops to spawn
    pub count: usize,

    /// Base idle sleep after an empty claim (in milliseconds)
    pub idle_backoff_ms: u64,

    /// Upper bound for the idle backoff (in milliseconds)
    pub max_idle_backoff_ms: u64,

    /// Pause after a storage error before retrying (in milliseconds)
    pub storage_retry_ms: u64,

    /// Time to wait for loops to finish on graceful shutdown (in seconds)
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: num_cpus::get().max(1),
            idle_backoff_ms: 1000,     // 1 second
            max_idle_backoff_ms: 5000, // 5 seconds
            storage_retry_ms: 1000,    // 1 second
            shutdown_timeout_secs: 30,
        }
    }
}

impl WorkerSettings {
    /// Settings with a specific worker count.
    pub fn with_count(count: usize) -> Self {
        Self {
            count,
            ..Default::default()
        }
    }

    /// Set the base idle backoff.
    pub fn with_idle_backoff(mut self, backoff_ms: u64) -> Self {
        self.idle_backoff_ms = backoff_ms;
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout_secs: u64) -> Self {
        self.shutdown_timeout_secs = timeout_secs;
        self
    }
}

/// Stale-claim sweeper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperSettings {
    /// A `busy` record older than this is considered orphaned (in seconds)
    pub stale_after_secs: u64,

    /// How often the sweeper runs (in seconds)
    pub interval_secs: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            stale_after_secs: 300, // 5 minutes
            interval_secs: 60,     // 1 minute
        }
    }
}

/// Store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Maximum number of records held at once (0 = unlimited)
    pub max_records: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { max_records: 0 }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: LogLevel,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_targets: false,
        }
    }
}

impl LoggingConfig {
    /// Install a global `tracing` subscriber for these settings.
    ///
    /// Safe to call more than once; later calls are ignored.
    pub fn init(&self) {
        let level: tracing::Level = self.level.into();
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(self.include_targets)
            .try_init();
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl ForgeConfig {
    /// Configuration tuned for development: a small pool, fast sweeps,
    /// chatty logs.
    pub fn development() -> Self {
        Self {
            workers: WorkerSettings {
                count: 2,
                idle_backoff_ms: 250,
                max_idle_backoff_ms: 2000,
                ..Default::default()
            },
            sweeper: SweeperSettings {
                stale_after_secs: 60,
                interval_secs: 10,
            },
            store: StoreSettings { max_records: 10_000 },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                include_targets: true,
            },
        }
    }

    /// Configuration for tests: a single worker with tight timings so
    /// suites stay fast and deterministic.
    pub fn testing() -> Self {
        Self {
            workers: WorkerSettings {
                count: 1,
                idle_backoff_ms: 10,
                max_idle_backoff_ms: 50,
                storage_retry_ms: 10,
                shutdown_timeout_secs: 5,
            },
            sweeper: SweeperSettings {
                stale_after_secs: 1,
                interval_secs: 1,
            },
            store: StoreSettings { max_records: 1000 },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                include_targets: true,
            },
        }
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.workers.count == 0 {
            errors.push("worker count must be greater than 0".to_string());
        }
        if self.workers.count > 1000 {
            errors.push("worker count should not exceed 1000".to_string());
        }
        if self.workers.idle_backoff_ms == 0 {
            errors.push("idle backoff must be greater than 0".to_string());
        }
        if self.workers.max_idle_backoff_ms < self.workers.idle_backoff_ms {
            errors.push(
                "max idle backoff must be greater than or equal to the base backoff".to_string(),
            );
        }
        if self.sweeper.stale_after_secs == 0 {
            errors.push("stale threshold must be greater than 0".to_string());
        }
        if self.sweeper.interval_secs == 0 {
            errors.push("sweep interval must be greater than 0".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
