//! Condition polling with a deadline.
//!
//! A condition is probed repeatedly until it reports [`Probe::Ready`] or the
//! deadline passes. Probes that fail outright are expected while the thing
//! being watched does not exist yet (a process that has not launched, a
//! window that has not opened), so they count as "not yet" and are never
//! surfaced to the caller.

use std::time::Duration;

use tracing::debug;

use crate::clock::{duration_ms, Pacer, SystemPacer};
use crate::config::WaitConfig;
use crate::error::SyncError;

/// Outcome of a single condition check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Ready,
    Pending,
    /// The probe itself failed; treated exactly like `Pending`.
    Unavailable,
}

impl Probe {
    pub fn is_ready(self) -> bool {
        matches!(self, Probe::Ready)
    }
}

impl From<bool> for Probe {
    fn from(value: bool) -> Self {
        if value {
            Probe::Ready
        } else {
            Probe::Pending
        }
    }
}

impl<E> From<Result<bool, E>> for Probe {
    fn from(value: Result<bool, E>) -> Self {
        match value {
            Ok(ready) => Probe::from(ready),
            Err(_) => Probe::Unavailable,
        }
    }
}

/// What a successful wait cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    /// Number of times the condition was evaluated, including the one that
    /// returned ready.
    pub checks: u32,
    pub elapsed: Duration,
}

impl WaitReport {
    pub fn elapsed_ms(&self) -> u64 {
        duration_ms(self.elapsed)
    }
}

/// Poll `condition` on the system clock until it is ready or
/// `config.timeout()` elapses.
pub fn wait_until<F, P>(condition: F, config: &WaitConfig) -> Result<WaitReport, SyncError>
where
    F: FnMut() -> P,
    P: Into<Probe>,
{
    wait_until_with(&SystemPacer, condition, config)
}

/// [`wait_until`] with an explicit time source.
pub fn wait_until_with<C, F, P>(
    pacer: &C,
    mut condition: F,
    config: &WaitConfig,
) -> Result<WaitReport, SyncError>
where
    C: Pacer + ?Sized,
    F: FnMut() -> P,
    P: Into<Probe>,
{
    let start = pacer.now();
    let deadline = start + config.timeout();
    let mut checks = 0u32;

    loop {
        if pacer.now() >= deadline {
            break;
        }

        checks = checks.saturating_add(1);
        if condition().into().is_ready() {
            return Ok(WaitReport {
                checks,
                elapsed: pacer.now().saturating_duration_since(start),
            });
        }

        // The condition may itself take a while; measure from after it ran.
        let remaining = deadline.saturating_duration_since(pacer.now());
        if remaining.is_zero() {
            break;
        }
        pacer.sleep(config.step().min(remaining));
    }

    debug!(
        checks,
        timeout_ms = duration_ms(config.timeout()),
        "condition not met before deadline"
    );
    Err(SyncError::Timeout {
        timeout: config.timeout(),
    })
}
