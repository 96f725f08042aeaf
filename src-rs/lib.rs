//! Helpers for driving macOS applications from one-shot automation runs:
//! poll a condition until a deadline, retry a flaky step with exponential
//! backoff, and make sure an app is frontmost before sending it UI events.

pub mod activate;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod error;
pub mod osascript;
pub mod permissions;
pub mod retry;
pub mod wait;

pub use activate::{ensure_active, ensure_active_with};
pub use bridge::{AppBridge, AppHandle, OsascriptBridge};
pub use clock::{Pacer, SystemPacer};
pub use config::{ActivateConfig, BridgeConfig, RetryConfig, WaitConfig};
pub use error::{BridgeError, SyncError};
pub use osascript::{applescript_string, sh_quote, OsascriptRunner, ScriptLanguage};
pub use permissions::{request_permissions, PermissionReport};
pub use retry::{retry_with_backoff, retry_with_backoff_using};
pub use wait::{wait_until, wait_until_with, Probe, WaitReport};
