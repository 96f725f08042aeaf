use std::env;
use std::time::Duration;

use crate::error::SyncError;

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WAIT_STEP: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_ACTIVATE_TIMEOUT: Duration = Duration::from_secs(10);

pub const ENV_OSASCRIPT_TIMEOUT_MS: &str = "MAC_APP_SYNC_OSASCRIPT_TIMEOUT_MS";
pub const ENV_OSASCRIPT_ATTEMPTS: &str = "MAC_APP_SYNC_OSASCRIPT_ATTEMPTS";
pub const ENV_OSASCRIPT_BACKOFF_MS: &str = "MAC_APP_SYNC_OSASCRIPT_BACKOFF_MS";

/// How long to poll a condition and how often.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    timeout: Duration,
    step: Duration,
}

impl WaitConfig {
    pub fn new(timeout: Duration, step: Duration) -> Result<Self, SyncError> {
        if timeout.is_zero() {
            return Err(SyncError::InvalidConfig(
                "wait timeout must be greater than zero".to_string(),
            ));
        }
        if step.is_zero() {
            return Err(SyncError::InvalidConfig(
                "wait step must be greater than zero".to_string(),
            ));
        }
        Ok(Self { timeout, step })
    }

    /// Build from fractional seconds, as taken on the command line.
    pub fn from_secs_f64(timeout_secs: f64, step_secs: f64) -> Result<Self, SyncError> {
        Self::new(
            positive_secs("wait timeout", timeout_secs)?,
            positive_secs("wait step", step_secs)?,
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn step(&self) -> Duration {
        self.step
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            step: DEFAULT_WAIT_STEP,
        }
    }
}

/// Attempt budget for [`crate::retry::retry_with_backoff`].
///
/// Delays double per attempt with no cap and no jitter, so keep
/// `max_retries` small.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    max_retries: u32,
    initial_delay: Duration,
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Result<Self, SyncError> {
        if max_retries < 1 {
            return Err(SyncError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_retries,
            initial_delay,
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Pause after the failed attempt at `attempt_index` (0-based):
    /// `initial_delay * 2^attempt_index`.
    ///
    /// Saturates at `Duration::MAX` only once the product itself no longer
    /// fits in a `Duration`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        const NANOS_PER_SEC: u128 = 1_000_000_000;

        let base = self.initial_delay.as_nanos();
        if base == 0 {
            return Duration::ZERO;
        }
        let nanos = 1u128
            .checked_shl(attempt_index)
            .and_then(|factor| base.checked_mul(factor))
            .filter(|nanos| *nanos <= Duration::MAX.as_nanos());
        match nanos {
            Some(nanos) => Duration::new(
                u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX),
                (nanos % NANOS_PER_SEC) as u32,
            ),
            None => Duration::MAX,
        }
    }

    /// Every pause that a fully failing run will take, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries.saturating_sub(1))
            .map(|i| self.delay_for(i))
            .collect()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
        }
    }
}

/// Settings for [`crate::activate::ensure_active`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivateConfig {
    wait: WaitConfig,
}

impl ActivateConfig {
    pub fn new(timeout: Duration, step: Duration) -> Result<Self, SyncError> {
        Ok(Self {
            wait: WaitConfig::new(timeout, step)?,
        })
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, SyncError> {
        Self::new(timeout, DEFAULT_WAIT_STEP)
    }

    pub fn wait(&self) -> WaitConfig {
        self.wait
    }
}

impl Default for ActivateConfig {
    fn default() -> Self {
        Self {
            wait: WaitConfig {
                timeout: DEFAULT_ACTIVATE_TIMEOUT,
                step: DEFAULT_WAIT_STEP,
            },
        }
    }
}

/// Timings for each `osascript` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    pub osascript_timeout: Duration,
    pub attempts: u32,
    pub backoff: Duration,
}

impl BridgeConfig {
    /// Defaults, overridden by any non-blank, parsable `MAC_APP_SYNC_OSASCRIPT_*`
    /// variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read_u64 = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .and_then(|v| v.parse::<u64>().ok())
        };

        let mut config = Self::default();
        if let Some(ms) = read_u64(ENV_OSASCRIPT_TIMEOUT_MS).filter(|ms| *ms > 0) {
            config.osascript_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = read_u64(ENV_OSASCRIPT_ATTEMPTS) {
            config.attempts = u32::try_from(n).unwrap_or(u32::MAX).max(1);
        }
        if let Some(ms) = read_u64(ENV_OSASCRIPT_BACKOFF_MS) {
            config.backoff = Duration::from_millis(ms);
        }
        config
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.attempts.max(1),
            initial_delay: self.backoff,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            osascript_timeout: Duration::from_millis(450),
            attempts: 1,
            backoff: Duration::from_millis(40),
        }
    }
}

fn positive_secs(label: &str, secs: f64) -> Result<Duration, SyncError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(SyncError::InvalidConfig(format!(
            "{label} must be a positive number of seconds, got {secs}"
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|err| SyncError::InvalidConfig(format!("{label}: {err}")))
}
