use std::ffi::OsStr;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};
use wait_timeout::ChildExt;

use crate::clock::duration_ms;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::retry::retry_with_backoff;

/// OSA language passed to `osascript -l`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLanguage {
    AppleScript,
    JavaScript,
}

impl ScriptLanguage {
    /// `.js` and `.jxa` files are JavaScript for Automation; everything else is
    /// handed to osascript as AppleScript.
    pub fn for_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("js") | Some("jxa") => ScriptLanguage::JavaScript,
            _ => ScriptLanguage::AppleScript,
        }
    }

    fn osa_name(self) -> &'static str {
        match self {
            ScriptLanguage::AppleScript => "AppleScript",
            ScriptLanguage::JavaScript => "JavaScript",
        }
    }
}

/// Runs OSA scripts through the `osascript` binary with a hard per-call
/// timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsascriptRunner {
    config: BridgeConfig,
}

impl OsascriptRunner {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run `script`, retrying transient failures per the bridge config.
    /// Returns trimmed stdout, which must be non-empty.
    pub fn run(
        &self,
        script: &str,
        language: ScriptLanguage,
        args: &[String],
    ) -> Result<String, BridgeError> {
        self.run_with_timeout(script, language, args, self.config.osascript_timeout)
    }

    /// Like [`run`](Self::run) with a caller-chosen per-attempt timeout.
    pub fn run_with_timeout(
        &self,
        script: &str,
        language: ScriptLanguage,
        args: &[String],
        timeout: Duration,
    ) -> Result<String, BridgeError> {
        if !cfg!(target_os = "macos") {
            return Err(BridgeError::Unsupported);
        }

        // Permanent failures ride out through the Ok side so they stop the
        // retry loop immediately.
        retry_with_backoff(
            || match run_once(script, language, args, timeout) {
                Ok(stdout) => Ok(Ok(stdout)),
                Err(err) if err.is_transient() => Err(err),
                Err(err) => Ok(Err(err)),
            },
            &self.config.retry(),
        )
        .and_then(|outcome| outcome)
    }

    /// Read and run a script file. The language follows the file extension.
    pub fn run_file(&self, path: &Path, args: &[String]) -> Result<String, BridgeError> {
        let script = fs::read_to_string(path).map_err(BridgeError::Io)?;
        let script = strip_shebang(&script);
        self.run(script, ScriptLanguage::for_path(path), args)
    }
}

fn run_once(
    script: &str,
    language: ScriptLanguage,
    args: &[String],
    timeout: Duration,
) -> Result<String, BridgeError> {
    let mut cmd = Command::new("osascript");
    if language == ScriptLanguage::JavaScript {
        cmd.arg("-l").arg(language.osa_name());
    }
    cmd.arg("-e").arg(script);
    if !args.is_empty() {
        cmd.arg("--");
        cmd.args(args);
    }

    trace!(language = language.osa_name(), args = args.len(), "spawning osascript");
    run_command(cmd, timeout)
}

/// Spawn `cmd` with piped output and wait at most `timeout` for it to exit.
///
/// Both pipes are drained on their own threads while waiting; a child that
/// fills a pipe buffer would otherwise block on `write` and never exit.
fn run_command(mut cmd: Command, timeout: Duration) -> Result<String, BridgeError> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(BridgeError::Spawn)?;
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_reader.join();
            let _ = stderr_reader.join();
            debug!(timeout_ms = duration_ms(timeout), "osascript timed out");
            return Err(BridgeError::TimedOut { after: timeout });
        }
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_reader.join();
            let _ = stderr_reader.join();
            return Err(BridgeError::Io(err));
        }
    };

    let stdout = collect(stdout_reader)?;
    let stderr = collect(stderr_reader)?;
    let stdout = String::from_utf8_lossy(&stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&stderr).trim().to_string();

    if !status.success() {
        let code = status.code().unwrap_or(1);
        debug!(code, stderr = %stderr, "osascript exited with failure");
        return Err(BridgeError::Exit { code, stderr });
    }
    if stdout.is_empty() {
        return Err(BridgeError::EmptyOutput);
    }
    Ok(stdout)
}

type Reader = JoinHandle<io::Result<Vec<u8>>>;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Reader {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(reader: Reader) -> Result<Vec<u8>, BridgeError> {
    reader
        .join()
        .map_err(|_| BridgeError::Io(io::Error::other("output reader thread panicked")))?
        .map_err(BridgeError::Io)
}

/// Drop a `#!/usr/bin/env osascript ...` line so the body can go through `-e`.
fn strip_shebang(script: &str) -> &str {
    if script.starts_with("#!") {
        script.split_once('\n').map(|(_, rest)| rest).unwrap_or("")
    } else {
        script
    }
}

/// Quote `s` for a POSIX shell: wrap in single quotes, escape embedded ones.
pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Render `s` as an AppleScript string literal.
pub fn applescript_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn language_follows_extension() {
        assert_eq!(
            ScriptLanguage::for_path(&PathBuf::from("insert_images.js")),
            ScriptLanguage::JavaScript
        );
        assert_eq!(
            ScriptLanguage::for_path(&PathBuf::from("deck.JXA")),
            ScriptLanguage::JavaScript
        );
        assert_eq!(
            ScriptLanguage::for_path(&PathBuf::from("export.applescript")),
            ScriptLanguage::AppleScript
        );
        assert_eq!(
            ScriptLanguage::for_path(&PathBuf::from("noext")),
            ScriptLanguage::AppleScript
        );
    }

    #[test]
    fn shebang_is_stripped() {
        assert_eq!(
            strip_shebang("#!/usr/bin/env osascript -l JavaScript\nrun();\n"),
            "run();\n"
        );
        assert_eq!(strip_shebang("#!only"), "");
        assert_eq!(strip_shebang("return 1"), "return 1");
    }

    #[test]
    fn sh_quote_escapes_single_quotes() {
        assert_eq!(sh_quote("plain"), "'plain'");
        assert_eq!(sh_quote("it's"), "'it'\\''s'");
        assert_eq!(sh_quote(""), "''");
    }

    #[test]
    fn applescript_string_escapes_quotes_and_backslashes() {
        assert_eq!(applescript_string("Keynote"), "\"Keynote\"");
        assert_eq!(applescript_string(r#"a "b" \c"#), r#""a \"b\" \\c""#);
    }

    #[test]
    fn missing_script_file_is_io_error() {
        let dir = tempdir().unwrap();
        let runner = OsascriptRunner::default();
        let err = runner
            .run_file(&dir.path().join("absent.js"), &[])
            .unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));
    }

    #[cfg(unix)]
    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[cfg(unix)]
    #[test]
    fn output_larger_than_pipe_buffer_is_collected() {
        let cmd = shell("head -c 200000 /dev/zero | tr '\\000' a");
        let out = run_command(cmd, Duration::from_secs(10)).unwrap();
        assert_eq!(out.len(), 200_000);
        assert!(out.bytes().all(|b| b == b'a'));
    }

    #[cfg(unix)]
    #[test]
    fn large_stderr_does_not_stall_a_failing_script() {
        let cmd = shell("head -c 200000 /dev/zero >&2; exit 3");
        match run_command(cmd, Duration::from_secs(10)) {
            Err(BridgeError::Exit { code, .. }) => assert_eq!(code, 3),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn hung_script_is_killed_at_timeout() {
        let start = std::time::Instant::now();
        let err = run_command(shell("exec sleep 5"), Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, BridgeError::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn blank_stdout_is_empty_output() {
        let err = run_command(shell("printf '  \\n'"), Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, BridgeError::EmptyOutput));
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn non_macos_is_unsupported() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("hello.applescript");
        fs::write(&script, "return \"ok\"").unwrap();
        let err = OsascriptRunner::default().run_file(&script, &[]).unwrap_err();
        assert!(matches!(err, BridgeError::Unsupported));
    }
}
