use std::time::Duration;

/// Failures surfaced by the waiting, activation and bridge helpers.
///
/// Errors raised by a polled condition never show up here; they are folded
/// into [`crate::wait::Probe::Unavailable`]. Errors from an operation run
/// under [`crate::retry::retry_with_backoff`] are returned as the caller's
/// own type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("timed out after {}ms waiting for condition", .timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("failed to activate {app}")]
    ActivationFailed { app: String },

    #[error("application not found: {app}")]
    NotFound { app: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl SyncError {
    /// Stable snake_case code used in CLI JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Timeout { .. } => "timeout",
            SyncError::ActivationFailed { .. } => "activation_failed",
            SyncError::NotFound { .. } => "not_found",
            SyncError::InvalidConfig(_) => "invalid_config",
            SyncError::Bridge(err) => err.code(),
        }
    }
}

/// Failures talking to the OS through `osascript`.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("osascript requires macOS")]
    Unsupported,

    #[error("failed to spawn osascript: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("osascript failed with status {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    #[error("osascript timed out after {}ms", .after.as_millis())]
    TimedOut { after: Duration },

    #[error("osascript succeeded but returned empty output")]
    EmptyOutput,

    #[error("unexpected osascript output: {0}")]
    Unexpected(String),

    #[error("osascript i/o error: {0}")]
    Io(#[source] std::io::Error),
}

impl BridgeError {
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Unsupported => "unsupported_platform",
            BridgeError::Spawn(_) => "osascript_spawn_failed",
            BridgeError::Exit { .. } => "osascript_exit",
            BridgeError::TimedOut { .. } => "osascript_timeout",
            BridgeError::EmptyOutput => "osascript_empty_stdout",
            BridgeError::Unexpected(_) => "osascript_unexpected_output",
            BridgeError::Io(_) => "osascript_wait_output_failed",
        }
    }

    /// Whether another attempt could plausibly succeed.
    ///
    /// A script that ran to completion and reported an error will report the
    /// same error again, except for the AppleEvent timeout (-1712) which shows
    /// up while the target app is still launching.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::TimedOut { .. } | BridgeError::EmptyOutput | BridgeError::Io(_) => true,
            BridgeError::Exit { stderr, .. } => stderr.contains("(-1712)"),
            BridgeError::Unsupported | BridgeError::Spawn(_) | BridgeError::Unexpected(_) => false,
        }
    }
}
