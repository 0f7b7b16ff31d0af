//! Running external commands and cleaning up stray processes.
//!
//! Commands are run synchronously with an optional timeout; the child is
//! killed once the timeout passes. Long-running commands such as
//! `tns run android` are started with [`ProcessHelper::spawn_logged`], which
//! redirects their output into the log file a
//! [`LogWatcher`](crate::log_watcher::LogWatcher) polls.
//!
//! Process lookup shells out to `lsof` / `pgrep` on Unix and `taskkill` on
//! Windows.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

const WAIT_STEP: Duration = Duration::from_millis(50);

/// How long to wait for output pipes to drain after the child exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can occur when running or signalling processes.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The program could not be started.
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Sending a signal to a process failed.
    #[error("Failed to kill process {pid}: {message}")]
    Kill { pid: u32, message: String },

    /// An I/O error occurred while talking to the child.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    /// Stdout followed by stderr.
    pub output: String,
    /// Whether the command was killed because it ran past its timeout.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0) && !self.timed_out
    }
}

/// Stateless wrapper for running and terminating processes.
pub struct ProcessHelper;

impl ProcessHelper {
    /// Runs `program` with `args` and waits for it to finish.
    ///
    /// When `timeout` is set and passes first, the child is killed and the
    /// output gathered so far is returned with `timed_out` set.
    ///
    /// # Errors
    ///
    /// - [`ProcessError::Spawn`] if the program cannot be started
    /// - [`ProcessError::Io`] if waiting on the child fails
    pub fn run<I, S>(program: &str, args: I, timeout: Option<Duration>) -> Result<CommandOutput, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut command = Command::new(program);
        command.args(args);
        Self::run_command(program, command, timeout)
    }

    /// Runs a full command line through the platform shell.
    pub fn run_shell(command_line: &str, timeout: Option<Duration>) -> Result<CommandOutput, ProcessError> {
        let mut command = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.args(["/C", command_line]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command_line]);
            c
        };
        command.stdin(Stdio::null());
        Self::run_command(command_line, command, timeout)
    }

    fn run_command(label: &str, mut command: Command, timeout: Option<Duration>) -> Result<CommandOutput, ProcessError> {
        debug!(command = label, ?timeout, "running command");
        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn { program: label.to_string(), source })?;

        let stdout = Self::drain(child.stdout.take());
        let stderr = Self::drain(child.stderr.take());

        let (status, timed_out) = Self::wait_child(&mut child, timeout)?;
        if timed_out {
            warn!(command = label, ?timeout, "command timed out and was killed");
        }

        let mut output = stdout.recv_timeout(DRAIN_TIMEOUT).unwrap_or_default();
        output.push_str(&stderr.recv_timeout(DRAIN_TIMEOUT).unwrap_or_default());

        Ok(CommandOutput {
            code: status.and_then(|s| s.code()),
            output,
            timed_out,
        })
    }

    fn wait_child(
        child: &mut Child,
        timeout: Option<Duration>,
    ) -> io::Result<(Option<std::process::ExitStatus>, bool)> {
        let Some(timeout) = timeout else {
            return child.wait().map(|s| (Some(s), false));
        };
        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok((Some(status), false));
            }
            if start.elapsed() >= timeout {
                let _ = child.kill();
                let status = child.wait().ok();
                return Ok((status, true));
            }
            std::thread::sleep(WAIT_STEP);
        }
    }

    /// Reads a pipe to the end on a separate thread.
    ///
    /// Grandchildren may keep the pipe open after the child is killed, so the
    /// caller collects the result with a bounded wait.
    fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut pipe) = pipe {
                let _ = pipe.read_to_end(&mut buf);
            }
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
        rx
    }

    /// Starts a long-running command with stdout and stderr written to `log_path`.
    ///
    /// The log is truncated first. The caller owns the returned child.
    pub fn spawn_logged<I, S>(program: &str, args: I, log_path: impl AsRef<Path>) -> Result<Child, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let log_path = log_path.as_ref();
        let log = File::create(log_path)?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log)
            .spawn()
            .map_err(|source| ProcessError::Spawn { program: program.to_string(), source })?;
        info!(program, pid = child.id(), log = %log_path.display(), "started logged process");
        Ok(child)
    }

    /// Returns the ids of other processes that have `path` open.
    ///
    /// Always empty on platforms without `lsof`.
    pub fn pids_by_handle(path: impl AsRef<Path>) -> Vec<u32> {
        if cfg!(windows) {
            return Vec::new();
        }
        let own = std::process::id();
        match Command::new("lsof").arg("-t").arg(path.as_ref()).output() {
            Ok(output) => parse_pids(&String::from_utf8_lossy(&output.stdout))
                .into_iter()
                .filter(|&pid| pid != own)
                .collect(),
            Err(e) => {
                debug!(error = %e, "lsof unavailable");
                Vec::new()
            }
        }
    }

    /// Kills every process holding `path` open. Returns how many were killed.
    pub fn kill_by_handle(path: impl AsRef<Path>) -> Result<usize, ProcessError> {
        let pids = Self::pids_by_handle(&path);
        for &pid in &pids {
            info!(pid, path = %path.as_ref().display(), "killing process holding file");
            Self::kill_pid(pid)?;
        }
        Ok(pids.len())
    }

    /// Returns the ids of processes whose name matches `name`, excluding this one.
    pub fn pids_by_name(name: &str) -> Vec<u32> {
        if cfg!(windows) {
            return Vec::new();
        }
        let own = std::process::id();
        match Command::new("pgrep").arg(name).output() {
            Ok(output) => parse_pids(&String::from_utf8_lossy(&output.stdout))
                .into_iter()
                .filter(|&pid| pid != own)
                .collect(),
            Err(e) => {
                debug!(error = %e, "pgrep unavailable");
                Vec::new()
            }
        }
    }

    pub fn is_running(name: &str) -> bool {
        !Self::pids_by_name(name).is_empty()
    }

    /// Kills every process whose name matches `name`. Returns how many were signalled.
    pub fn kill(name: &str) -> Result<usize, ProcessError> {
        if cfg!(windows) {
            let image = if name.ends_with(".exe") { name.to_string() } else { format!("{}.exe", name) };
            let output = Self::run("taskkill", ["/F", "/IM", image.as_str()], Some(Duration::from_secs(30)))?;
            return Ok(usize::from(output.success()));
        }
        let pids = Self::pids_by_name(name);
        for &pid in &pids {
            debug!(pid, name, "killing process");
            Self::kill_pid(pid)?;
        }
        if !pids.is_empty() {
            info!(name, count = pids.len(), "killed processes");
        }
        Ok(pids.len())
    }

    /// Forcefully terminates a single process. A process that already exited is not an error.
    pub fn kill_pid(pid: u32) -> Result<(), ProcessError> {
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(e) => Err(ProcessError::Kill { pid, message: e.to_string() }),
            }
        }

        #[cfg(not(unix))]
        {
            let output = Self::run("taskkill", ["/F", "/PID", pid.to_string().as_str()], Some(Duration::from_secs(30)))?;
            if output.success() {
                Ok(())
            } else {
                Err(ProcessError::Kill { pid, message: output.output })
            }
        }
    }
}

/// Parses one pid per line, ignoring anything that is not a number.
pub fn parse_pids(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}
