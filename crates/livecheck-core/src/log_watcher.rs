//! Waiting for expected text to show up in a growing log file.
//!
//! Test scenarios start the CLI under test with its output redirected into a
//! log file, then block on a [`LogWatcher`] until every expected string has
//! appeared. The watcher re-reads the whole file on every poll, so a log must
//! be truncated between waits or stale lines will satisfy the next one. That
//! is why [`WaitOptions::clean_after`] is on by default.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use livecheck_core::log_watcher::{LogWatcher, WaitOptions};
//!
//! let report = LogWatcher::new(
//!     "run_android.log",
//!     ["Successfully synced application", "emulator-5554"],
//! )
//! .reject(["Unable to apply changes"])
//! .options(
//!     WaitOptions::default()
//!         .with_timeout(Duration::from_secs(30))
//!         .with_interval(Duration::from_secs(5)),
//! )
//! .wait()
//! .expect("app was not synced");
//!
//! println!("synced after {} polls", report.polls);
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, debug_span, info, warn, Instrument};

/// Smallest interval between polls; a zero interval would spin on the file.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// How much of the log tail is kept in a timeout error.
const TAIL_CHARS: usize = 2000;

/// Errors returned by a log wait.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The timeout elapsed before every expected string appeared.
    #[error("Timed out after {elapsed:?} waiting for {missing:?} in {}", path.display())]
    Timeout {
        path: PathBuf,
        /// Expected strings still absent at the last poll.
        missing: Vec<String>,
        elapsed: Duration,
        /// The end of the log content at the last poll.
        tail: String,
    },

    /// A string that must never appear was found in the log.
    #[error("Unexpected {found:?} found in {}", path.display())]
    Rejected { path: PathBuf, found: Vec<String> },

    /// Truncating the log failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Timing and cleanup settings for a single wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Upper bound on the whole wait (default: 45s).
    pub timeout: Duration,
    /// Sleep between two polls (default: 3s).
    pub check_interval: Duration,
    /// Truncate the log before the first poll.
    pub clean_before: bool,
    /// Truncate the log once every expected string was found.
    pub clean_after: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
            check_interval: Duration::from_secs(3),
            clean_before: false,
            clean_after: true,
        }
    }
}

impl WaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Leave the log untouched after a successful wait.
    pub fn keep_log(mut self) -> Self {
        self.clean_after = false;
        self
    }

    /// Start from an empty log.
    pub fn clean_first(mut self) -> Self {
        self.clean_before = true;
        self
    }
}

/// Result of a single poll of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Every expected string is present and no rejected string is.
    Satisfied,
    /// Some expected strings are still missing.
    Pending { missing: Vec<String> },
    /// At least one rejected string is present.
    Rejected { found: Vec<String> },
}

/// Summary of a successful wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    /// Number of times the log was read.
    pub polls: u32,
    /// Time from the first poll to the satisfying one.
    pub elapsed: Duration,
}

enum Step {
    Done(Result<WaitReport, WatchError>),
    Sleep(Duration),
}

/// Polls a log file until a set of expected strings is present.
#[derive(Debug, Clone)]
pub struct LogWatcher {
    path: PathBuf,
    expected: Vec<String>,
    rejected: Vec<String>,
    options: WaitOptions,
}

impl LogWatcher {
    /// Creates a watcher for `path` expecting every string in `expected`.
    pub fn new<P, I, S>(path: P, expected: I) -> Self
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            expected: expected.into_iter().map(Into::into).collect(),
            rejected: Vec::new(),
            options: WaitOptions::default(),
        }
    }

    /// Strings whose presence fails the wait immediately.
    pub fn reject<I, S>(mut self, rejected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rejected.extend(rejected.into_iter().map(Into::into));
        self
    }

    pub fn options(mut self, options: WaitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the log once and classifies its current content.
    ///
    /// A missing file counts as empty. Rejections take precedence over
    /// missing expectations.
    pub fn check(&self) -> PollOutcome {
        let content = read_content(&self.path);
        Self::classify(&content, &self.expected, &self.rejected)
    }

    fn classify(content: &str, expected: &[String], rejected: &[String]) -> PollOutcome {
        let found: Vec<String> = rejected
            .iter()
            .filter(|s| content.contains(s.as_str()))
            .cloned()
            .collect();
        if !found.is_empty() {
            return PollOutcome::Rejected { found };
        }

        let missing: Vec<String> = expected
            .iter()
            .filter(|s| !content.contains(s.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            PollOutcome::Satisfied
        } else {
            PollOutcome::Pending { missing }
        }
    }

    /// Blocks the calling thread until the log satisfies the watcher or the
    /// timeout elapses.
    ///
    /// # Errors
    ///
    /// - [`WatchError::Timeout`] if an expected string is still missing at the deadline
    /// - [`WatchError::Rejected`] as soon as a rejected string is seen
    /// - [`WatchError::Io`] if the log cannot be truncated
    pub fn wait(&self) -> Result<WaitReport, WatchError> {
        let span = debug_span!("wait_for_log", path = %self.path.display());
        let _guard = span.enter();

        if let Some(done) = self.prepare()? {
            return Ok(done);
        }

        let start = Instant::now();
        let mut polls = 0u32;
        loop {
            polls += 1;
            match self.step(polls, start.elapsed()) {
                Step::Done(result) => return result,
                Step::Sleep(d) => std::thread::sleep(d),
            }
        }
    }

    /// Same as [`Self::wait`], sleeping on the tokio timer instead of the thread.
    ///
    /// Log reads stay synchronous; they are small and local.
    pub async fn wait_async(&self) -> Result<WaitReport, WatchError> {
        let span = debug_span!("wait_for_log", path = %self.path.display());
        self.poll_async().instrument(span).await
    }

    async fn poll_async(&self) -> Result<WaitReport, WatchError> {
        if let Some(done) = self.prepare()? {
            return Ok(done);
        }

        let start = tokio::time::Instant::now();
        let mut polls = 0u32;
        loop {
            polls += 1;
            match self.step(polls, start.elapsed()) {
                Step::Done(result) => return result,
                Step::Sleep(d) => tokio::time::sleep(d).await,
            }
        }
    }

    /// Applies `clean_before` and short-circuits an empty expectation list.
    fn prepare(&self) -> Result<Option<WaitReport>, WatchError> {
        if self.options.clean_before {
            clean_log(&self.path)?;
        }
        if self.expected.is_empty() && self.rejected.is_empty() {
            debug!("nothing to wait for");
            return Ok(Some(WaitReport { polls: 0, elapsed: Duration::ZERO }));
        }
        Ok(None)
    }

    fn step(&self, polls: u32, elapsed: Duration) -> Step {
        let content = read_content(&self.path);
        match Self::classify(&content, &self.expected, &self.rejected) {
            PollOutcome::Satisfied => {
                info!(polls, ?elapsed, "all expected strings found");
                if self.options.clean_after {
                    if let Err(e) = clean_log(&self.path) {
                        return Step::Done(Err(e.into()));
                    }
                }
                Step::Done(Ok(WaitReport { polls, elapsed }))
            }
            PollOutcome::Rejected { found } => {
                warn!(?found, "rejected strings found in log");
                Step::Done(Err(WatchError::Rejected { path: self.path.clone(), found }))
            }
            PollOutcome::Pending { missing } => {
                match next_sleep(elapsed, self.options.timeout, self.options.check_interval) {
                    Some(d) => {
                        debug!(polls, ?missing, ?d, "expected strings still missing");
                        Step::Sleep(d)
                    }
                    None => Step::Done(Err(WatchError::Timeout {
                        path: self.path.clone(),
                        missing,
                        elapsed,
                        tail: tail(&content, TAIL_CHARS).to_string(),
                    })),
                }
            }
        }
    }
}

/// Waits until every string in `expected` is present in the log at `path`.
///
/// Shorthand for [`LogWatcher`] with default cleanup (log truncated on success).
pub fn wait_for_log(
    path: impl AsRef<Path>,
    expected: &[&str],
    timeout: Duration,
    check_interval: Duration,
) -> Result<WaitReport, WatchError> {
    LogWatcher::new(path.as_ref(), expected.iter().copied())
        .options(
            WaitOptions::default()
                .with_timeout(timeout)
                .with_interval(check_interval),
        )
        .wait()
}

/// Truncates the log to zero length, creating it if missing.
pub fn clean_log(path: impl AsRef<Path>) -> std::io::Result<()> {
    File::create(path.as_ref())?;
    debug!(path = %path.as_ref().display(), "log truncated");
    Ok(())
}

/// Computes the sleep before the next poll, or `None` once the deadline is reached.
///
/// The last sleep is shortened so that a final poll lands on the deadline.
fn next_sleep(elapsed: Duration, timeout: Duration, interval: Duration) -> Option<Duration> {
    if elapsed >= timeout {
        return None;
    }
    let interval = interval.max(MIN_INTERVAL);
    Some(std::cmp::min(interval, timeout - elapsed))
}

fn read_content(path: &Path) -> String {
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read log, treating as empty");
            String::new()
        }
    }
}

/// Returns at most the last `max_chars` characters of `content`.
fn tail(content: &str, max_chars: usize) -> &str {
    match content.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((idx, _)) if max_chars > 0 => &content[idx..],
        Some(_) => "",
        None => content,
    }
}
