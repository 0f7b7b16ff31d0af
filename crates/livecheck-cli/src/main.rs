//! CLI for synchronizing shell-based test steps with a mobile CLI under test.
//!
//! # Usage
//!
//! ```bash
//! # Start the CLI under test with its output in a log
//! tns run android --path TNS_App > run.log 2>&1 &
//!
//! # Wait until the app is deployed (timeout and interval in seconds)
//! livecheck wait-log run.log "Project successfully built" emulator-5554 -t 240 -i 10
//!
//! # Fail fast if an error shows up first, keep the log for later checks
//! livecheck wait-log run.log "Successfully synced" --reject "Unable to apply changes" --keep-log
//!
//! # Stage fixture changes
//! livecheck replace TNS_App/app/app.css "#284848" green
//! livecheck find TNS_App app-debug.apk --exact
//! livecheck unpack data/apps/livesync-hello-world.tgz TNS_App
//!
//! # Clean up
//! livecheck remove TNS_App/platforms/android/build.log
//! livecheck kill node
//!
//! # Device state
//! livecheck devices
//! livecheck logcat emulator-5554 --clear
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use livecheck_core::adb::{Adb, AdbError};
use livecheck_core::config::HarnessConfig;
use livecheck_core::file::{FileError, FileHelper};
use livecheck_core::log_watcher::{LogWatcher, WatchError};
use livecheck_core::process::{ProcessError, ProcessHelper};
use tracing_subscriber::EnvFilter;

/// Log waiting and fixture helpers for mobile CLI integration tests.
#[derive(Parser)]
#[command(name = "livecheck")]
#[command(about = "Wait for CLI output in log files and stage test fixtures")]
#[command(version)]
struct Cli {
    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Wait until every expected string appears in a log file
    WaitLog {
        /// Log file written by the CLI under test
        file: PathBuf,
        /// Strings that must all appear, in any order
        expected: Vec<String>,
        /// Strings that fail the wait as soon as they appear
        #[arg(short, long)]
        reject: Vec<String>,
        /// Timeout in seconds
        #[arg(short, long, env = "LIVECHECK_TIMEOUT")]
        timeout: Option<u64>,
        /// Seconds between two checks
        #[arg(short, long, env = "LIVECHECK_INTERVAL")]
        interval: Option<u64>,
        /// Do not truncate the log after a successful wait
        #[arg(long)]
        keep_log: bool,
        /// Truncate the log before waiting
        #[arg(long)]
        clean_first: bool,
    },

    /// Print a file (prints nothing if it does not exist)
    Read {
        file: PathBuf,
    },

    /// Replace every occurrence of a string in a file
    Replace {
        file: PathBuf,
        old: String,
        new: String,
    },

    /// Find a file by name below a directory
    Find {
        /// Directory to search
        base: PathBuf,
        /// File name, or a part of it
        name: String,
        /// Require the whole file name to match
        #[arg(long)]
        exact: bool,
        /// Which match to print, ordered by path length
        #[arg(long, default_value = "0")]
        index: usize,
    },

    /// Delete a file, killing processes that hold it open if needed
    Remove {
        path: PathBuf,
        /// Do not kill processes holding the file
        #[arg(long)]
        no_force: bool,
    },

    /// Extract a .tgz/.tar.gz or .zip archive
    Unpack {
        archive: PathBuf,
        dest: PathBuf,
    },

    /// Kill processes by name, or by an open file with --handle
    Kill {
        /// Process name (or file path with --handle)
        target: String,
        #[arg(long)]
        handle: bool,
    },

    /// List attached Android devices
    Devices,

    /// Dump or clear the logcat buffer of a device
    Logcat {
        /// Device serial (e.g. emulator-5554)
        device: String,
        /// Clear the buffer instead of dumping it
        #[arg(long)]
        clear: bool,
    },

    /// Print the effective harness configuration
    Config,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

#[derive(Debug)]
enum CliError {
    ActionFailed(String),
    Timeout(String),
    Io(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::ActionFailed(_) => ExitCode::from(1),
            CliError::Timeout(_) => ExitCode::from(2),
            CliError::Io(_) => ExitCode::from(3),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::ActionFailed(msg) => write!(f, "Action failed: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl From<WatchError> for CliError {
    fn from(e: WatchError) -> Self {
        match e {
            WatchError::Timeout { ref tail, .. } => {
                let tail = tail.trim_end();
                if tail.is_empty() {
                    CliError::Timeout(format!("{} (log is empty)", e))
                } else {
                    CliError::Timeout(format!("{}\n--- log tail ---\n{}", e, tail))
                }
            }
            WatchError::Rejected { .. } => CliError::ActionFailed(e.to_string()),
            WatchError::Io(err) => CliError::Io(err.to_string()),
        }
    }
}

impl From<FileError> for CliError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Io(err) => CliError::Io(err.to_string()),
            other => CliError::ActionFailed(other.to_string()),
        }
    }
}

impl From<ProcessError> for CliError {
    fn from(e: ProcessError) -> Self {
        CliError::ActionFailed(e.to_string())
    }
}

impl From<AdbError> for CliError {
    fn from(e: AdbError) -> Self {
        CliError::ActionFailed(e.to_string())
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = HarnessConfig::from_env();
    tracing::debug!(?config, "loaded harness config");

    match cli.command {
        Command::WaitLog { ref file, ref expected, ref reject, timeout, interval, keep_log, clean_first } => {
            let mut options = config.wait.to_options();
            if let Some(secs) = timeout {
                options.timeout = Duration::from_secs(secs);
            }
            if let Some(secs) = interval {
                options.check_interval = Duration::from_secs(secs);
            }
            if keep_log {
                options = options.keep_log();
            }
            if clean_first {
                options = options.clean_first();
            }

            let report = LogWatcher::new(file, expected.iter().cloned())
                .reject(reject.iter().cloned())
                .options(options)
                .wait()?;

            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::json!({
                    "success": true,
                    "file": file,
                    "polls": report.polls,
                    "elapsed_ms": report.elapsed.as_millis() as u64,
                }));
            } else if !cli.quiet {
                eprintln!(
                    "Found {} string(s) in {} after {} poll(s) ({}ms)",
                    expected.len(),
                    file.display(),
                    report.polls,
                    report.elapsed.as_millis()
                );
            }
            Ok(())
        }
        Command::Read { ref file } => {
            print!("{}", FileHelper::read(file));
            Ok(())
        }
        Command::Replace { ref file, ref old, ref new } => {
            FileHelper::replace(file, old, new)?;
            report_success(&cli, serde_json::json!({ "success": true, "file": file }), || {
                format!("Replaced '{}' with '{}' in {}", old, new, file.display())
            });
            Ok(())
        }
        Command::Find { ref base, ref name, exact, index } => {
            match FileHelper::find(base, name, exact, index) {
                Some(path) => {
                    if cli.format == OutputFormat::Json {
                        println!("{}", serde_json::json!({ "path": path }));
                    } else {
                        println!("{}", path.display());
                    }
                    Ok(())
                }
                None => Err(CliError::ActionFailed(format!(
                    "No match #{} for '{}' in {}",
                    index,
                    name,
                    base.display()
                ))),
            }
        }
        Command::Remove { ref path, no_force } => {
            FileHelper::remove(path, !no_force)?;
            report_success(&cli, serde_json::json!({ "success": true, "path": path }), || {
                format!("Removed {}", path.display())
            });
            Ok(())
        }
        Command::Unpack { ref archive, ref dest } => {
            let name = archive.to_string_lossy();
            let unpacked = if name.ends_with(".zip") {
                FileHelper::unzip(archive, dest)
            } else {
                FileHelper::unpack_tar(archive, dest)
            };
            if !unpacked {
                return Err(CliError::ActionFailed(format!("Failed to unpack {}", archive.display())));
            }
            report_success(&cli, serde_json::json!({ "success": true, "dest": dest }), || {
                format!("Unpacked {} into {}", archive.display(), dest.display())
            });
            Ok(())
        }
        Command::Kill { ref target, handle } => {
            let killed = if handle {
                ProcessHelper::kill_by_handle(target)?
            } else {
                ProcessHelper::kill(target)?
            };
            report_success(&cli, serde_json::json!({ "success": true, "killed": killed }), || {
                format!("Killed {} process(es)", killed)
            });
            Ok(())
        }
        Command::Devices => {
            let devices = Adb::new(config.adb_path()).devices()?;
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&devices)
                    .map_err(|e| CliError::Io(e.to_string()))?);
            } else if devices.is_empty() {
                eprintln!("No Android devices found");
            } else {
                for device in &devices {
                    println!("{}\t{}", device.serial, device.state);
                }
            }
            Ok(())
        }
        Command::Logcat { ref device, clear } => {
            let adb = Adb::new(config.adb_path());
            if clear {
                adb.clear_logcat(device)?;
                report_success(&cli, serde_json::json!({ "success": true, "device": device }), || {
                    format!("Cleared logcat on {}", device)
                });
            } else {
                print!("{}", adb.get_logcat(device)?);
            }
            Ok(())
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)
                .map_err(|e| CliError::Io(e.to_string()))?);
            Ok(())
        }
    }
}

/// Prints a success payload in JSON mode, or the text message unless quiet.
fn report_success(cli: &Cli, json: serde_json::Value, text: impl FnOnce() -> String) {
    if cli.format == OutputFormat::Json {
        println!("{}", json);
    } else if !cli.quiet {
        eprintln!("{}", text());
    }
}
