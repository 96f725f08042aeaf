use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::error::{BridgeError, SyncError};
use crate::osascript::{OsascriptRunner, ScriptLanguage};

/// Opaque reference to an application the OS knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppHandle {
    pub name: String,
    pub bundle_id: Option<String>,
}

impl AppHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bundle_id: None,
        }
    }

    pub fn with_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.bundle_id = Some(bundle_id.into());
        self
    }
}

/// The OS-side capabilities the activation helper relies on.
pub trait AppBridge {
    /// Look up `app`. Fails with [`SyncError::NotFound`] when the OS has no
    /// such application.
    fn resolve(&self, app: &str) -> Result<AppHandle, SyncError>;

    /// Ask the OS to bring `handle` to the foreground. Nothing is awaited.
    fn activate(&self, handle: &AppHandle);

    /// Whether the process named `process` is currently frontmost.
    fn is_frontmost(&self, process: &str) -> Result<bool, BridgeError>;

    /// Name of the current frontmost process, if one can be determined.
    fn frontmost_name(&self) -> Result<Option<String>, BridgeError> {
        Ok(None)
    }
}

impl<B: AppBridge + ?Sized> AppBridge for &B {
    fn resolve(&self, app: &str) -> Result<AppHandle, SyncError> {
        (**self).resolve(app)
    }

    fn activate(&self, handle: &AppHandle) {
        (**self).activate(handle)
    }

    fn is_frontmost(&self, process: &str) -> Result<bool, BridgeError> {
        (**self).is_frontmost(process)
    }

    fn frontmost_name(&self) -> Result<Option<String>, BridgeError> {
        (**self).frontmost_name()
    }
}

const RESOLVE_SCRIPT: &str = r#"
on run argv
  set appName to item 1 of argv
  try
    return "ok:" & (id of application appName)
  on error errMsg number errNum
    return "err:" & errNum & ":" & errMsg
  end try
end run
"#;

const ACTIVATE_SCRIPT: &str = r#"
on run argv
  tell application (item 1 of argv) to activate
  return "ok"
end run
"#;

const FRONTMOST_SCRIPT: &str = r#"
on run argv
  tell application "System Events"
    return (frontmost of process (item 1 of argv)) as text
  end tell
end run
"#;

const FRONTMOST_NAME_SCRIPT: &str =
    "tell application \"System Events\" to get name of first process whose frontmost is true";

// "Can't get application" and LaunchServices "application not found".
const NOT_FOUND_CODES: [&str; 2] = ["-1728", "-10814"];

// Launching an app on activate can take far longer than a query.
const ACTIVATE_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// [`AppBridge`] backed by AppleScript and System Events.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsascriptBridge {
    runner: OsascriptRunner,
}

impl OsascriptBridge {
    pub fn new(runner: OsascriptRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &OsascriptRunner {
        &self.runner
    }
}

impl AppBridge for OsascriptBridge {
    fn resolve(&self, app: &str) -> Result<AppHandle, SyncError> {
        let out = self
            .runner
            .run(RESOLVE_SCRIPT, ScriptLanguage::AppleScript, &[app.to_string()])?;
        parse_resolve_output(app, &out)
    }

    fn activate(&self, handle: &AppHandle) {
        let timeout = self.runner.config().osascript_timeout.max(ACTIVATE_CALL_TIMEOUT);
        if let Err(err) = self.runner.run_with_timeout(
            ACTIVATE_SCRIPT,
            ScriptLanguage::AppleScript,
            &[handle.name.clone()],
            timeout,
        ) {
            debug!(app = %handle.name, error = %err, "activate request did not confirm");
        }
    }

    fn is_frontmost(&self, process: &str) -> Result<bool, BridgeError> {
        let out = self.runner.run(
            FRONTMOST_SCRIPT,
            ScriptLanguage::AppleScript,
            &[process.to_string()],
        )?;
        parse_bool(&out)
    }

    fn frontmost_name(&self) -> Result<Option<String>, BridgeError> {
        match self
            .runner
            .run(FRONTMOST_NAME_SCRIPT, ScriptLanguage::AppleScript, &[])
        {
            Ok(name) => Ok(Some(name)),
            Err(BridgeError::EmptyOutput) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

fn parse_resolve_output(app: &str, out: &str) -> Result<AppHandle, SyncError> {
    if let Some(bundle_id) = out.strip_prefix("ok:") {
        let handle = AppHandle::new(app);
        let bundle_id = bundle_id.trim();
        return Ok(if bundle_id.is_empty() {
            handle
        } else {
            handle.with_bundle_id(bundle_id)
        });
    }

    if let Some(rest) = out.strip_prefix("err:") {
        let (code, message) = rest.split_once(':').unwrap_or((rest, ""));
        if NOT_FOUND_CODES.contains(&code.trim()) {
            return Err(SyncError::NotFound {
                app: app.to_string(),
            });
        }
        return Err(BridgeError::Exit {
            code: code.trim().parse().unwrap_or(1),
            stderr: message.to_string(),
        }
        .into());
    }

    Err(BridgeError::Unexpected(out.to_string()).into())
}

fn parse_bool(out: &str) -> Result<bool, BridgeError> {
    match out.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(BridgeError::Unexpected(out.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_output_with_bundle_id() {
        let handle = parse_resolve_output("Keynote", "ok:com.apple.iWork.Keynote").unwrap();
        assert_eq!(handle.name, "Keynote");
        assert_eq!(handle.bundle_id.as_deref(), Some("com.apple.iWork.Keynote"));
    }

    #[test]
    fn resolve_output_without_bundle_id() {
        let handle = parse_resolve_output("Scratch", "ok:").unwrap();
        assert_eq!(handle, AppHandle::new("Scratch"));
    }

    #[test]
    fn resolve_output_maps_missing_app_to_not_found() {
        for out in [
            "err:-1728:Can't get application \"Nope\".",
            "err:-10814:Application isn't running",
        ] {
            let err = parse_resolve_output("Nope", out).unwrap_err();
            assert!(matches!(err, SyncError::NotFound { ref app } if app == "Nope"));
        }
    }

    #[test]
    fn resolve_output_keeps_other_errors() {
        let err = parse_resolve_output("Mail", "err:-1743:Not authorized").unwrap_err();
        match err {
            SyncError::Bridge(BridgeError::Exit { code, stderr }) => {
                assert_eq!(code, -1743);
                assert_eq!(stderr, "Not authorized");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            parse_resolve_output("Mail", "garbage"),
            Err(SyncError::Bridge(BridgeError::Unexpected(_)))
        ));
    }

    #[test]
    fn frontmost_output_parses_applescript_booleans() {
        assert!(parse_bool("true").unwrap());
        assert!(!parse_bool(" false\n").unwrap());
        assert!(parse_bool("missing value").is_err());
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn osascript_bridge_is_unsupported_off_macos() {
        let bridge = OsascriptBridge::default();
        assert!(matches!(
            bridge.is_frontmost("Finder"),
            Err(BridgeError::Unsupported)
        ));
        assert!(matches!(
            bridge.resolve("Finder"),
            Err(SyncError::Bridge(BridgeError::Unsupported))
        ));
    }
}
