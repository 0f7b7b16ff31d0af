//! # livecheck-core
//!
//! Support library for integration tests of a mobile-app CLI (build, run,
//! deploy and livesync for Android and iOS).
//!
//! Test scenarios run the CLI under test with its output redirected to a log
//! file, wait for expected lines to appear in that log, and inspect files and
//! devices afterwards.
//!
//! ## Modules
//!
//! - [`log_watcher`] - Polls a growing log file until expected strings appear
//! - [`file`] - Forgiving filesystem helpers for staging fixtures
//! - [`process`] - Running commands with timeouts and killing stray processes
//! - [`adb`] - Wrapper around the Android Debug Bridge
//! - [`config`] - Harness paths and default wait settings
//!
//! ## External Dependencies
//!
//! - **Android SDK** (for `adb`) - device and emulator control
//! - **lsof** / **pgrep** on Unix - locating processes to clean up
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use livecheck_core::log_watcher::wait_for_log;
//! use livecheck_core::process::ProcessHelper;
//!
//! let log = "run_android.log";
//! let _cli = ProcessHelper::spawn_logged(
//!     "tns",
//!     ["run", "android", "--path", "TNS_App", "--device", "emulator-5554"],
//!     log,
//! )
//! .expect("Failed to start tns");
//!
//! wait_for_log(
//!     log,
//!     &["Project successfully built", "Successfully installed on device with identifier", "emulator-5554"],
//!     Duration::from_secs(240),
//!     Duration::from_secs(10),
//! )
//! .expect("App was not deployed");
//! ```

pub mod adb;
pub mod config;
pub mod file;
pub mod log_watcher;
pub mod process;
