use tracing::{debug, info_span, warn};

use crate::bridge::{AppBridge, AppHandle};
use crate::clock::{duration_ms, Pacer, SystemPacer};
use crate::config::ActivateConfig;
use crate::error::SyncError;
use crate::wait::{wait_until_with, WaitReport};

/// Bring `app` to the foreground and block until the OS reports it frontmost.
///
/// A missing application fails straight away with [`SyncError::NotFound`].
/// Otherwise exactly one activate request is sent, followed by one bounded
/// poll; if the app never turns frontmost the result is
/// [`SyncError::ActivationFailed`].
pub fn ensure_active<B>(
    bridge: &B,
    app: &str,
    config: &ActivateConfig,
) -> Result<AppHandle, SyncError>
where
    B: AppBridge + ?Sized,
{
    ensure_active_with(&SystemPacer, bridge, app, config).map(|(handle, _)| handle)
}

/// [`ensure_active`] with an explicit time source, also returning what the
/// poll cost.
pub fn ensure_active_with<C, B>(
    pacer: &C,
    bridge: &B,
    app: &str,
    config: &ActivateConfig,
) -> Result<(AppHandle, WaitReport), SyncError>
where
    C: Pacer + ?Sized,
    B: AppBridge + ?Sized,
{
    let span = info_span!("ensure_active", app = %app);
    let _guard = span.enter();

    let handle = bridge.resolve(app)?;

    debug!(bundle_id = ?handle.bundle_id, "activating");
    bridge.activate(&handle);

    debug!("polling for frontmost");
    match wait_until_with(pacer, || bridge.is_frontmost(app), &config.wait()) {
        Ok(report) => {
            debug!(checks = report.checks, elapsed_ms = report.elapsed_ms(), "frontmost");
            Ok((handle, report))
        }
        Err(SyncError::Timeout { timeout }) => {
            warn!(timeout_ms = duration_ms(timeout), "app never became frontmost");
            Err(SyncError::ActivationFailed {
                app: app.to_string(),
            })
        }
        Err(other) => Err(other),
    }
}
