use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use mac_app_sync::permissions::DEFAULT_APPS;
use mac_app_sync::{
    ensure_active_with, request_permissions, retry_with_backoff, wait_until, ActivateConfig,
    AppBridge, BridgeConfig, OsascriptBridge, OsascriptRunner, RetryConfig, SyncError,
    SystemPacer, WaitConfig,
};

const LOG_ENV: &str = "MAC_APP_SYNC_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "mac-app-sync",
    version,
    about = "Activate, wait on and retry against macOS apps driven through osascript"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); MAC_APP_SYNC_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[allow(clippy::enum_variant_names)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Bring an app to the foreground and wait until it is frontmost
    Activate(ActivateArgs),
    /// Wait for an app to become frontmost without activating it
    #[command(name = "wait-frontmost")]
    WaitFrontmost(WaitArgs),
    /// Print the name of the frontmost process
    Frontmost(FrontmostArgs),
    /// Run an AppleScript/JXA file with retry, optionally activating an app first
    Run(RunArgs),
    /// Trigger Automation permission prompts with read-only Apple Events
    Permissions(PermissionsArgs),
}

#[derive(Args, Debug)]
struct ActivateArgs {
    /// Application name (e.g. Keynote)
    app: String,
    /// Seconds to wait for the app to become frontmost
    #[arg(long, default_value_t = 10.0)]
    timeout: f64,
    /// Seconds between frontmost checks
    #[arg(long, default_value_t = 0.2)]
    step: f64,
    /// Emit JSON payload
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct WaitArgs {
    /// Process name to watch
    app: String,
    /// Seconds to wait
    #[arg(long, default_value_t = 5.0)]
    timeout: f64,
    /// Seconds between checks
    #[arg(long, default_value_t = 0.2)]
    step: f64,
    /// Emit JSON payload
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct FrontmostArgs {
    /// Emit JSON payload
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Script file (.js/.jxa run as JavaScript, anything else as AppleScript)
    script: PathBuf,
    /// Make this app frontmost before running the script
    #[arg(long)]
    app: Option<String>,
    /// Seconds to wait for --app to become frontmost
    #[arg(long, default_value_t = 10.0)]
    activate_timeout: f64,
    /// Maximum attempts for the script
    #[arg(long, default_value_t = 3)]
    retries: u32,
    /// Pause after the first failed attempt, doubled after each further one
    #[arg(long, default_value_t = 100)]
    initial_delay_ms: u64,
    /// Per-attempt osascript timeout in seconds
    #[arg(long, default_value_t = 30.0)]
    script_timeout: f64,
    /// Emit JSON payload
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    /// Arguments passed to the script's run handler
    #[arg(last = true)]
    args: Vec<String>,
}

#[derive(Args, Debug)]
struct PermissionsArgs {
    /// Apps to prompt for (default: Calendar, Notes, Mail, Keynote, Numbers, Pages, Reminders, Microsoft Excel)
    apps: Vec<String>,
    /// Emit JSON payload
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let bridge = OsascriptBridge::new(OsascriptRunner::new(BridgeConfig::from_env()));

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Activate(args) => command_activate(&bridge, args),
        Commands::WaitFrontmost(args) => command_wait_frontmost(&bridge, args),
        Commands::Frontmost(args) => command_frontmost(&bridge, args),
        Commands::Run(args) => command_run(&bridge, args),
        Commands::Permissions(args) => command_permissions(&bridge, args),
    }
}

fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    }
}

fn init_logging(verbose: u8) {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(log_level(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "activate",
            "description": "Activate an app and wait until it is frontmost."
        }),
        json!({
            "name": "wait-frontmost",
            "description": "Poll until a process is frontmost, without activating it."
        }),
        json!({
            "name": "frontmost",
            "description": "Print the current frontmost process name."
        }),
        json!({
            "name": "run",
            "description": "Run an AppleScript/JXA file with exponential backoff retry."
        }),
        json!({
            "name": "permissions",
            "description": "Trigger Automation consent prompts with read-only Apple Events."
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn command_activate(bridge: &OsascriptBridge, args: ActivateArgs) -> Result<()> {
    let wait = WaitConfig::from_secs_f64(args.timeout, args.step)?;
    let config = ActivateConfig::new(wait.timeout(), wait.step())?;

    match ensure_active_with(&SystemPacer, bridge, &args.app, &config) {
        Ok((handle, report)) => {
            if args.json {
                let payload = json!({
                    "ok": true,
                    "app": handle.name,
                    "bundle_id": handle.bundle_id,
                    "checks": report.checks,
                    "elapsed_ms": report.elapsed_ms(),
                    "timestamp": timestamp_iso(),
                });
                println!("{}", serde_json::to_string(&payload)?);
            } else {
                println!("{}", handle.name);
            }
            Ok(())
        }
        Err(err) => {
            if args.json {
                println!("{}", serde_json::to_string(&failure_payload(&args.app, &err))?);
            }
            Err(err).with_context(|| format!("could not bring {} to the foreground", args.app))
        }
    }
}

fn command_wait_frontmost(bridge: &OsascriptBridge, args: WaitArgs) -> Result<()> {
    let config = WaitConfig::from_secs_f64(args.timeout, args.step)?;

    match wait_until(|| bridge.is_frontmost(&args.app), &config) {
        Ok(report) => {
            if args.json {
                let payload = json!({
                    "ok": true,
                    "app": args.app,
                    "checks": report.checks,
                    "elapsed_ms": report.elapsed_ms(),
                    "timestamp": timestamp_iso(),
                });
                println!("{}", serde_json::to_string(&payload)?);
            } else {
                println!("{}", args.app);
            }
            Ok(())
        }
        Err(err) => {
            if args.json {
                println!("{}", serde_json::to_string(&failure_payload(&args.app, &err))?);
            }
            Err(err).with_context(|| format!("{} did not become frontmost", args.app))
        }
    }
}

fn command_frontmost(bridge: &OsascriptBridge, args: FrontmostArgs) -> Result<()> {
    let name = bridge
        .frontmost_name()
        .context("failed to query frontmost process")?;

    if args.json {
        let payload = json!({
            "frontmost": name,
            "timestamp": timestamp_iso(),
        });
        println!("{}", serde_json::to_string(&payload)?);
    } else {
        let Some(name) = name else {
            bail!("no frontmost process reported");
        };
        println!("{name}");
    }
    Ok(())
}

fn command_run(bridge: &OsascriptBridge, args: RunArgs) -> Result<()> {
    if !args.script.is_file() {
        bail!("script not found: {}", args.script.display());
    }
    let retry = RetryConfig::new(args.retries, Duration::from_millis(args.initial_delay_ms))?;
    let script_timeout = positive_secs("--script-timeout", args.script_timeout)?;

    let activated = match args.app.as_deref() {
        Some(app) => {
            let config = ActivateConfig::with_timeout(positive_secs(
                "--activate-timeout",
                args.activate_timeout,
            )?)?;
            let (handle, _) = ensure_active_with(&SystemPacer, bridge, app, &config)
                .with_context(|| format!("could not bring {app} to the foreground"))?;
            Some(handle)
        }
        None => None,
    };

    let runner = OsascriptRunner::new(BridgeConfig {
        osascript_timeout: script_timeout,
        ..*bridge.runner().config()
    });

    let mut attempts = 0u32;
    let output = retry_with_backoff(
        || {
            attempts += 1;
            runner.run_file(&args.script, &args.args)
        },
        &retry,
    );

    match output {
        Ok(stdout) => {
            if args.json {
                let payload = json!({
                    "ok": true,
                    "script": args.script.display().to_string(),
                    "app": activated.as_ref().map(|h| h.name.clone()),
                    "attempts": attempts,
                    "output": stdout,
                    "timestamp": timestamp_iso(),
                });
                println!("{}", serde_json::to_string(&payload)?);
            } else {
                println!("{stdout}");
            }
            Ok(())
        }
        Err(err) => {
            if args.json {
                let payload = json!({
                    "ok": false,
                    "script": args.script.display().to_string(),
                    "attempts": attempts,
                    "error_code": err.code(),
                    "message": err.to_string(),
                    "timestamp": timestamp_iso(),
                });
                println!("{}", serde_json::to_string(&payload)?);
            }
            Err(err).with_context(|| {
                format!(
                    "{} failed after {attempts} attempt(s)",
                    args.script.display()
                )
            })
        }
    }
}

fn command_permissions(bridge: &OsascriptBridge, args: PermissionsArgs) -> Result<()> {
    let apps: Vec<String> = if args.apps.is_empty() {
        DEFAULT_APPS.iter().map(ToString::to_string).collect()
    } else {
        args.apps
    };

    let reports = request_permissions(bridge.runner(), &apps);
    let failures: Vec<&str> = reports
        .iter()
        .filter(|r| !r.ok)
        .map(|r| r.app.as_str())
        .collect();

    if args.json {
        let payload = json!({
            "ok": failures.is_empty(),
            "apps": reports,
            "timestamp": timestamp_iso(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for report in &reports {
            match (&report.response, &report.message) {
                (Some(response), _) => println!("{}: {response}", report.app),
                (None, Some(message)) => println!("{} failed: {message}", report.app),
                (None, None) => println!("{} failed", report.app),
            }
        }
    }

    if !failures.is_empty() {
        bail!(
            "some apps did not respond cleanly; re-run after granting permissions: {}",
            failures.join(", ")
        );
    }
    Ok(())
}

fn failure_payload(app: &str, err: &SyncError) -> Value {
    json!({
        "ok": false,
        "app": app,
        "error_code": err.code(),
        "message": err.to_string(),
        "timestamp": timestamp_iso(),
    })
}

fn positive_secs(flag: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .with_context(|| format!("{flag} must be a positive number of seconds, got {secs}"))
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}
