//! Interface to the Android Debug Bridge (`adb`).
//!
//! Provides just enough device control for CLI integration tests: listing
//! devices, reading and clearing logcat, checking and stopping app
//! processes, and inspecting files an app synced to the device.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use livecheck_core::adb::Adb;
//!
//! let adb = Adb::new("adb");
//! for device in adb.devices().unwrap() {
//!     println!("{} ({})", device.serial, device.state);
//! }
//!
//! adb.clear_logcat("emulator-5554").unwrap();
//! adb.wait_until_app_is_running("org.nativescript.TNSApp", "emulator-5554", Duration::from_secs(60))
//!     .unwrap();
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::process::{CommandOutput, ProcessError, ProcessHelper};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const APP_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors that can occur when interacting with adb.
#[derive(Error, Debug)]
pub enum AdbError {
    /// An adb command returned a non-zero exit code or ran past its timeout.
    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    /// An app did not reach the expected state in time.
    #[error("{app} did not start on {device} within {timeout:?}")]
    AppNotRunning { app: String, device: String, timeout: Duration },

    /// The app is still running after being stopped.
    #[error("Failed to stop {app} on {device}")]
    StillRunning { app: String, device: String },

    /// adb itself could not be run.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// An Android device or emulator as reported by `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AndroidDevice {
    /// The serial number used with `adb -s` (e.g. "emulator-5554").
    pub serial: String,

    /// Connection state: "device", "offline", "unauthorized", ...
    pub state: String,
}

impl AndroidDevice {
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }

    pub fn is_emulator(&self) -> bool {
        self.serial.starts_with("emulator-")
    }
}

/// Wrapper around an `adb` binary.
#[derive(Debug, Clone)]
pub struct Adb {
    path: PathBuf,
    timeout: Duration,
    stop_timeout: Duration,
}

impl Adb {
    /// Creates a wrapper for the `adb` at `path` (a bare name is looked up in `PATH`).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), timeout: DEFAULT_TIMEOUT, stop_timeout: DEFAULT_STOP_TIMEOUT }
    }

    /// Sets the timeout applied to each adb invocation (default: 60s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how long [`Self::stop_application`] waits for the app to exit (default: 5s).
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    fn exec(&self, args: &[&str]) -> Result<CommandOutput, AdbError> {
        let program = self.path.to_string_lossy();
        let output = ProcessHelper::run(&program, args, Some(self.timeout))?;
        if !output.success() {
            return Err(AdbError::CommandFailed(format!(
                "adb {} -> {}",
                args.join(" "),
                output.output.trim()
            )));
        }
        Ok(output)
    }

    fn shell(&self, device: &str, command: &[&str]) -> Result<String, AdbError> {
        let mut args = vec!["-s", device, "shell"];
        args.extend_from_slice(command);
        Ok(self.exec(&args)?.output)
    }

    /// Lists attached devices and emulators.
    ///
    /// # Errors
    ///
    /// - [`AdbError::Process`] if adb cannot be started
    /// - [`AdbError::CommandFailed`] if adb returns a non-zero exit code
    pub fn devices(&self) -> Result<Vec<AndroidDevice>, AdbError> {
        let output = self.exec(&["devices"])?;
        Ok(Self::parse_devices(&output.output))
    }

    /// Serials of devices in the "device" state.
    pub fn online_serials(&self) -> Result<Vec<String>, AdbError> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(AndroidDevice::is_online)
            .map(|d| d.serial)
            .collect())
    }

    /// Restarts the adb server.
    pub fn restart(&self) -> Result<(), AdbError> {
        info!("restarting adb server");
        self.exec(&["kill-server"])?;
        self.exec(&["start-server"])?;
        self.devices()?;
        Ok(())
    }

    /// Force-stops `app` and waits for its process to go away.
    pub fn stop_application(&self, app: &str, device: &str) -> Result<(), AdbError> {
        self.shell(device, &["am", "force-stop", app])?;
        if !self.poll_state(app, device, false, self.stop_timeout, STOP_POLL_INTERVAL)? {
            return Err(AdbError::StillRunning { app: app.to_string(), device: device.to_string() });
        }
        info!(app, device, "application stopped");
        Ok(())
    }

    /// Returns whether a process named `app` is listed by `ps` on the device.
    pub fn is_running(&self, app: &str, device: &str) -> Result<bool, AdbError> {
        let output = self.shell(device, &["ps"])?;
        Ok(Self::ps_lists(&output, app))
    }

    /// Polls until `app` is running on `device`.
    pub fn wait_until_app_is_running(&self, app: &str, device: &str, timeout: Duration) -> Result<(), AdbError> {
        if self.poll_state(app, device, true, timeout, APP_POLL_INTERVAL)? {
            return Ok(());
        }
        Err(AdbError::AppNotRunning { app: app.to_string(), device: device.to_string(), timeout })
    }

    /// Polls `ps` until the app's running state equals `running`.
    ///
    /// Returns `false` if the state did not change within `timeout`. A final
    /// check always runs at the deadline.
    fn poll_state(
        &self,
        app: &str,
        device: &str,
        running: bool,
        timeout: Duration,
        interval: Duration,
    ) -> Result<bool, AdbError> {
        let start = Instant::now();
        loop {
            if self.is_running(app, device)? == running {
                debug!(app, device, running, elapsed = ?start.elapsed(), "app reached state");
                return Ok(true);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return Ok(false);
            }
            std::thread::sleep(std::cmp::min(interval, timeout - elapsed));
        }
    }

    pub fn clear_logcat(&self, device: &str) -> Result<(), AdbError> {
        self.exec(&["-s", device, "logcat", "-c"])?;
        Ok(())
    }

    /// Dumps the current logcat buffer.
    pub fn get_logcat(&self, device: &str) -> Result<String, AdbError> {
        Ok(self.exec(&["-s", device, "logcat", "-d"])?.output)
    }

    /// Reads a file from an app's private `files/` directory.
    pub fn read_app_file(&self, device: &str, app: &str, path: &str) -> Result<String, AdbError> {
        let file = format!("files/{}", path.trim_start_matches('/'));
        self.shell(device, &["run-as", app, "cat", file.as_str()])
    }

    /// Returns whether a file synced to the app contains `text`.
    pub fn file_contains(&self, device: &str, app: &str, path: &str, text: &str) -> Result<bool, AdbError> {
        Ok(self.read_app_file(device, app, path)?.contains(text))
    }

    /// Lists installed package names.
    pub fn packages(&self, device: &str) -> Result<Vec<String>, AdbError> {
        let output = self.shell(device, &["pm", "list", "packages"])?;
        Ok(Self::parse_packages(&output))
    }

    /// Uninstalls every package whose name starts with `prefix`. Returns the removed packages.
    pub fn uninstall_by_prefix(&self, device: &str, prefix: &str) -> Result<Vec<String>, AdbError> {
        let matching: Vec<String> = self
            .packages(device)?
            .into_iter()
            .filter(|p| p.starts_with(prefix))
            .collect();
        for package in &matching {
            info!(device, package = %package, "uninstalling");
            self.exec(&["-s", device, "uninstall", package.as_str()])?;
        }
        Ok(matching)
    }

    /// Parses `adb devices` output into a device list.
    ///
    /// Skips the header, blank lines, and daemon start-up chatter.
    pub fn parse_devices(output: &str) -> Vec<AndroidDevice> {
        output
            .lines()
            .filter(|line| !line.starts_with('*') && !line.starts_with("List of devices"))
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let serial = parts.next()?;
                let state = parts.next()?;
                Some(AndroidDevice { serial: serial.to_string(), state: state.to_string() })
            })
            .collect()
    }

    /// Parses `pm list packages` output.
    pub fn parse_packages(output: &str) -> Vec<String> {
        output
            .lines()
            .filter_map(|line| line.trim().strip_prefix("package:"))
            .map(String::from)
            .collect()
    }

    /// Returns whether `ps` output has a process whose name is exactly `app`.
    pub fn ps_lists(ps_output: &str, app: &str) -> bool {
        ps_output
            .lines()
            .any(|line| line.split_whitespace().last() == Some(app))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICES_OUTPUT: &str = "* daemon not running; starting now at tcp:5037\n\
* daemon started successfully\n\
List of devices attached\n\
emulator-5554\tdevice\n\
0123456789ABCDEF\tunauthorized\n\
emulator-5556\toffline\n\
\n";

    const PS_OUTPUT: &str = "USER      PID   PPID  VSZ     RSS   WCHAN            ADDR S NAME\n\
root          1     0   10632   2104 0                   0 S init\n\
u0_a85     4242  1734 1456780 98000 0                   0 S org.nativescript.TNSApp\n\
u0_a86     4300  1734 1456780 98000 0                   0 S org.nativescript.TNSApp:remote\n";

    #[test]
    fn test_parse_devices() {
        let devices = Adb::parse_devices(DEVICES_OUTPUT);
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].serial, "emulator-5554");
        assert!(devices[0].is_online());
        assert!(devices[0].is_emulator());
        assert_eq!(devices[1].state, "unauthorized");
        assert!(!devices[1].is_online());
        assert!(!devices[1].is_emulator());
    }

    #[test]
    fn test_parse_devices_empty() {
        assert!(Adb::parse_devices("List of devices attached\n\n").is_empty());
        assert!(Adb::parse_devices("").is_empty());
    }

    #[test]
    fn test_parse_packages() {
        let output = "package:com.android.settings\npackage:org.nativescript.TNSApp\n\ngarbage\n";
        assert_eq!(
            Adb::parse_packages(output),
            vec!["com.android.settings".to_string(), "org.nativescript.TNSApp".to_string()]
        );
    }

    #[test]
    fn test_ps_lists_exact_name() {
        assert!(Adb::ps_lists(PS_OUTPUT, "org.nativescript.TNSApp"));
        assert!(Adb::ps_lists(PS_OUTPUT, "init"));
        assert!(!Adb::ps_lists(PS_OUTPUT, "org.nativescript"));
        assert!(!Adb::ps_lists(PS_OUTPUT, "org.nativescript.Other"));
    }

    #[test]
    fn test_adb_error_display() {
        let err = AdbError::AppNotRunning {
            app: "org.nativescript.TNSApp".to_string(),
            device: "emulator-5554".to_string(),
            timeout: Duration::from_secs(60),
        };
        let msg = err.to_string();
        assert!(msg.contains("org.nativescript.TNSApp"));
        assert!(msg.contains("emulator-5554"));
    }

    #[test]
    fn test_missing_adb_binary() {
        let adb = Adb::new("/nonexistent/platform-tools/adb");
        match adb.devices() {
            Err(AdbError::Process(ProcessError::Spawn { .. })) => {}
            other => panic!("Expected spawn error, got: {:?}", other),
        }
    }

    /// Writes an executable `adb` stand-in that logs its arguments to
    /// `calls.log` next to itself and then runs `body`.
    #[cfg(unix)]
    fn fake_adb(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let fake = dir.join("adb");
        let script = format!(
            "#!/bin/sh\nhere=$(dirname \"$0\")\necho \"$*\" >> \"$here/calls.log\"\n{}\n",
            body
        );
        std::fs::write(&fake, script).unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        fake
    }

    #[cfg(unix)]
    fn calls(dir: &std::path::Path) -> String {
        std::fs::read_to_string(dir.join("calls.log")).unwrap_or_default()
    }

    /// `ps` lists the app until `am force-stop` drops a marker file.
    #[cfg(unix)]
    const DEVICE_SCRIPT: &str = r#"case "$*" in
  *"shell ps"*)
    echo "USER PID PPID VSZ RSS WCHAN ADDR S NAME"
    echo "root 1 0 10632 2104 0 0 S init"
    [ -f "$here/stopped" ] || [ -f "$here/never-started" ] || echo "u0_a85 4242 1734 1456780 98000 0 0 S org.nativescript.TNSApp"
    ;;
  *"am force-stop"*)
    [ -f "$here/stuck" ] || touch "$here/stopped"
    ;;
  *"run-as"*)
    echo "console.log('hello');"
    ;;
  *"pm list packages"*)
    printf 'package:com.android.settings\npackage:org.nativescript.TNSApp\npackage:org.nativescript.LiveSync\n'
    ;;
  *"devices"*)
    printf 'List of devices attached\nemulator-5554\tdevice\nemulator-5556\toffline\n'
    ;;
esac
exit 0"#;

    #[cfg(unix)]
    #[test]
    fn test_devices_with_fake_adb() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake_adb(dir.path(), DEVICE_SCRIPT);

        let serials = Adb::new(&fake).online_serials().unwrap();
        assert_eq!(serials, vec!["emulator-5554".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_adb_is_command_failed() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake_adb(dir.path(), "echo 'error: no devices/emulators found' >&2\nexit 1");

        match Adb::new(&fake).get_logcat("emulator-5554") {
            Err(AdbError::CommandFailed(msg)) => assert!(msg.contains("no devices")),
            other => panic!("Expected CommandFailed, got: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_until_app_is_running_first_poll() {
        let dir = tempfile::tempdir().unwrap();
        let adb = Adb::new(fake_adb(dir.path(), DEVICE_SCRIPT));

        let start = Instant::now();
        adb.wait_until_app_is_running("org.nativescript.TNSApp", "emulator-5554", Duration::from_secs(10))
            .unwrap();
        assert!(start.elapsed() < APP_POLL_INTERVAL);
        assert_eq!(calls(dir.path()).lines().count(), 1);
        assert!(calls(dir.path()).contains("-s emulator-5554 shell ps"));
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_until_app_is_running_times_out() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("never-started"), "").unwrap();
        let adb = Adb::new(fake_adb(dir.path(), DEVICE_SCRIPT));

        let start = Instant::now();
        let result = adb.wait_until_app_is_running("org.nativescript.TNSApp", "emulator-5554", Duration::from_secs(1));
        let elapsed = start.elapsed();

        match result {
            Err(AdbError::AppNotRunning { app, device, timeout }) => {
                assert_eq!(app, "org.nativescript.TNSApp");
                assert_eq!(device, "emulator-5554");
                assert_eq!(timeout, Duration::from_secs(1));
            }
            other => panic!("Expected AppNotRunning, got: {:?}", other),
        }
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(5));
        // One poll at the start and one at the deadline
        assert_eq!(calls(dir.path()).lines().count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_application() {
        let dir = tempfile::tempdir().unwrap();
        let adb = Adb::new(fake_adb(dir.path(), DEVICE_SCRIPT));

        assert!(adb.is_running("org.nativescript.TNSApp", "emulator-5554").unwrap());
        adb.stop_application("org.nativescript.TNSApp", "emulator-5554").unwrap();
        assert!(!adb.is_running("org.nativescript.TNSApp", "emulator-5554").unwrap());
        assert!(calls(dir.path()).contains("-s emulator-5554 shell am force-stop org.nativescript.TNSApp"));
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_application_still_running() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stuck"), "").unwrap();
        let adb = Adb::new(fake_adb(dir.path(), DEVICE_SCRIPT)).with_stop_timeout(Duration::from_millis(600));

        let start = Instant::now();
        match adb.stop_application("org.nativescript.TNSApp", "emulator-5554") {
            Err(AdbError::StillRunning { app, .. }) => assert_eq!(app, "org.nativescript.TNSApp"),
            other => panic!("Expected StillRunning, got: {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_millis(600));
        // The app was polled more than once before giving up
        assert!(calls(dir.path()).matches("shell ps").count() >= 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_read_app_file_uses_run_as() {
        let dir = tempfile::tempdir().unwrap();
        let adb = Adb::new(fake_adb(dir.path(), DEVICE_SCRIPT));

        let content = adb.read_app_file("emulator-5554", "org.nativescript.TNSApp", "/app/main.js").unwrap();
        assert_eq!(content.trim(), "console.log('hello');");
        assert!(calls(dir.path())
            .contains("-s emulator-5554 shell run-as org.nativescript.TNSApp cat files/app/main.js"));

        assert!(adb.file_contains("emulator-5554", "org.nativescript.TNSApp", "app/main.js", "hello").unwrap());
        assert!(!adb.file_contains("emulator-5554", "org.nativescript.TNSApp", "app/main.js", "bye").unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_uninstall_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let adb = Adb::new(fake_adb(dir.path(), DEVICE_SCRIPT));

        assert_eq!(adb.packages("emulator-5554").unwrap().len(), 3);
        let removed = adb.uninstall_by_prefix("emulator-5554", "org.nativescript").unwrap();
        assert_eq!(
            removed,
            vec!["org.nativescript.TNSApp".to_string(), "org.nativescript.LiveSync".to_string()]
        );

        let log = calls(dir.path());
        assert!(log.contains("-s emulator-5554 uninstall org.nativescript.TNSApp"));
        assert!(log.contains("-s emulator-5554 uninstall org.nativescript.LiveSync"));
        assert!(!log.contains("uninstall com.android.settings"));
    }

    #[cfg(unix)]
    #[test]
    fn test_restart_runs_kill_and_start_server() {
        let dir = tempfile::tempdir().unwrap();
        let adb = Adb::new(fake_adb(dir.path(), DEVICE_SCRIPT));

        adb.restart().unwrap();
        let log = calls(dir.path());
        let order: Vec<&str> = log.lines().collect();
        assert_eq!(order, vec!["kill-server", "start-server", "devices"]);
    }
}
