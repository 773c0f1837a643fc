use crate::server::types::RunningMode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid running mode '{0}' (expected base|ac|aup|full)")]
    InvalidMode(String),

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Server configuration, loaded from environment variables with defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mode: RunningMode,
    /// Maximum staleness tolerated for a quote before it must be refreshed.
    pub validity_interval_ms: f64,
    /// Bound on how far an item's refresh period may relax (beta).
    pub relaxation_bound: f64,
    /// Deadline for user transactions; drives the overload computation.
    pub desired_delay_bound_ms: f64,
    pub sampling_period_sec: f64,
    /// Smoothing factor for the overload degree, 0 < alpha <= 1.
    pub alpha: f64,
    pub user_queue_capacity: usize,
    pub sys_queue_capacity: usize,
    pub num_workers: usize,
    pub num_sys_workers: usize,
    pub num_update_threads: usize,
    pub pin_threads: bool,
    /// CSV trace output; tracing is disabled when unset.
    pub trace_file: Option<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode_str = std::env::var("QB_MODE").unwrap_or_else(|_| "full".to_string());
        let mode = RunningMode::parse(&mode_str).ok_or(ConfigError::InvalidMode(mode_str))?;

        let config = Self {
            mode,
            validity_interval_ms: env_parse("QB_VALIDITY_INTERVAL_MS", 1000.0),
            relaxation_bound: env_parse("QB_RELAXATION_BOUND", 2.0),
            desired_delay_bound_ms: env_parse("QB_DESIRED_DELAY_BOUND_MS", 1000.0),
            sampling_period_sec: env_parse("QB_SAMPLING_PERIOD_SEC", 30.0),
            alpha: env_parse("QB_ALPHA", 0.6),
            user_queue_capacity: env_parse("QB_USER_QUEUE_CAPACITY", 1024),
            sys_queue_capacity: env_parse("QB_SYS_QUEUE_CAPACITY", 1024),
            num_workers: env_parse("QB_NUM_WORKERS", 4),
            num_sys_workers: env_parse("QB_NUM_SYS_WORKERS", 2),
            num_update_threads: env_parse("QB_NUM_UPDATE_THREADS", 2),
            pin_threads: env_parse("QB_PIN_THREADS", false),
            trace_file: std::env::var("QB_TRACE_FILE").ok().filter(|s| !s.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        fn positive(name: &'static str, v: f64) -> Result<(), ConfigError> {
            if v > 0.0 && v.is_finite() {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue {
                    name,
                    reason: format!("must be > 0, got {}", v),
                })
            }
        }

        positive("QB_VALIDITY_INTERVAL_MS", self.validity_interval_ms)?;
        positive("QB_DESIRED_DELAY_BOUND_MS", self.desired_delay_bound_ms)?;
        positive("QB_SAMPLING_PERIOD_SEC", self.sampling_period_sec)?;

        if self.relaxation_bound < 1.0 || !self.relaxation_bound.is_finite() {
            return Err(ConfigError::InvalidValue {
                name: "QB_RELAXATION_BOUND",
                reason: format!("must be >= 1, got {}", self.relaxation_bound),
            });
        }

        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "QB_ALPHA",
                reason: format!("must be in (0, 1], got {}", self.alpha),
            });
        }

        for (name, v) in [
            ("QB_USER_QUEUE_CAPACITY", self.user_queue_capacity),
            ("QB_SYS_QUEUE_CAPACITY", self.sys_queue_capacity),
            ("QB_NUM_WORKERS", self.num_workers),
            ("QB_NUM_SYS_WORKERS", self.num_sys_workers),
            ("QB_NUM_UPDATE_THREADS", self.num_update_threads),
        ] {
            if v == 0 {
                return Err(ConfigError::InvalidValue {
                    name,
                    reason: "must be > 0".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Items must be refreshed at least twice per validity interval.
    pub fn min_update_period_ms(&self) -> f64 {
        0.5 * self.validity_interval_ms
    }

    /// Adaptive relaxation never exceeds beta times the minimum period.
    pub fn max_update_period_ms(&self) -> f64 {
        0.5 * self.relaxation_bound * self.validity_interval_ms
    }

    /// Explicit constructor used by tests and the demo binary.
    pub fn new(mode: RunningMode, validity_interval_ms: f64, desired_delay_bound_ms: f64) -> Self {
        Self {
            mode,
            validity_interval_ms,
            relaxation_bound: 2.0,
            desired_delay_bound_ms,
            sampling_period_sec: 30.0,
            alpha: 0.6,
            user_queue_capacity: 1024,
            sys_queue_capacity: 1024,
            num_workers: 4,
            num_sys_workers: 2,
            num_update_threads: 2,
            pin_threads: false,
            trace_file: None,
        }
    }
}
