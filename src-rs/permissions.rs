use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::BridgeError;
use crate::osascript::{applescript_string, OsascriptRunner, ScriptLanguage};

/// Apps the automation scripts drive, in the order prompts are raised.
pub const DEFAULT_APPS: [&str; 8] = [
    "Calendar",
    "Notes",
    "Mail",
    "Keynote",
    "Numbers",
    "Pages",
    "Reminders",
    "Microsoft Excel",
];

// The first call blocks on the user answering the Automation consent dialog.
const PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Label and read-only query per app. The query has to use the app's own
/// scripting terminology; properties of `application` itself can be answered
/// without sending an Apple Event and never raise the prompt.
fn read_only_query(app: &str) -> (&'static str, &'static str) {
    match app {
        "Calendar" => ("Calendars", "name of every calendar"),
        "Notes" => ("Folders", "name of every folder"),
        "Mail" => ("Accounts", "name of every account"),
        "Keynote" | "Numbers" | "Pages" => ("Open documents", "name of documents"),
        "Reminders" => ("Lists", "name of every list"),
        "Microsoft Excel" => ("Workbooks", "count of workbooks"),
        _ => ("Windows", "count of windows"),
    }
}

/// AppleScript that brings `app` forward and asks it one read-only question.
fn permission_script(app: &str) -> String {
    let (label, query) = read_only_query(app);
    format!(
        "tell application {}\n  activate\n  return \"{label}: \" & (({query}) as text)\nend tell",
        applescript_string(app)
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionReport {
    pub app: String,
    pub ok: bool,
    pub response: Option<String>,
    pub error_code: Option<String>,
    pub message: Option<String>,
}

impl PermissionReport {
    fn from_result(app: &str, result: Result<String, BridgeError>) -> Self {
        match result {
            Ok(response) => Self {
                app: app.to_string(),
                ok: true,
                response: Some(response),
                error_code: None,
                message: None,
            },
            Err(err) => Self {
                app: app.to_string(),
                ok: false,
                response: None,
                error_code: Some(err.code().to_string()),
                message: Some(err.to_string()),
            },
        }
    }
}

/// Send a harmless read-only Apple Event to each app so macOS raises its
/// Automation consent prompt before a real automation run needs it.
pub fn request_permissions<S: AsRef<str>>(
    runner: &OsascriptRunner,
    apps: &[S],
) -> Vec<PermissionReport> {
    collect_reports(apps, |_, script| {
        runner.run_with_timeout(script, ScriptLanguage::AppleScript, &[], PROMPT_TIMEOUT)
    })
}

fn collect_reports<S, F>(apps: &[S], mut send: F) -> Vec<PermissionReport>
where
    S: AsRef<str>,
    F: FnMut(&str, &str) -> Result<String, BridgeError>,
{
    apps.iter()
        .map(|app| {
            let app = app.as_ref();
            let script = permission_script(app);
            let report = PermissionReport::from_result(app, send(app, &script));
            if report.ok {
                info!(app, "automation permission confirmed");
            } else {
                warn!(app, message = ?report.message, "app did not respond cleanly");
            }
            report
        })
        .collect()
}
