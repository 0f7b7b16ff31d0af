//! Harness configuration.
//!
//! Settings live in `~/.livecheck/config.json`. Paths that test machines
//! usually export as environment variables (`ANDROID_HOME`, `TNS_PATH`,
//! `TEST_RUN_HOME`) override the file when loaded with
//! [`HarnessConfig::from_env`].
//!
//! # Example
//!
//! ```no_run
//! use livecheck_core::adb::Adb;
//! use livecheck_core::config::HarnessConfig;
//!
//! let config = HarnessConfig::from_env();
//! let adb = Adb::new(config.adb_path());
//! println!("waiting up to {:?} per log", config.wait.to_options().timeout);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::log_watcher::WaitOptions;

const CONFIG_DIR: &str = ".livecheck";
const CONFIG_FILENAME: &str = "config.json";

/// Returns `~/.livecheck`, creating it if needed.
///
/// Falls back to the system temp directory when there is no home directory.
pub fn livecheck_dir() -> PathBuf {
    let dir = dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CONFIG_DIR);
    std::fs::create_dir_all(&dir).ok();
    dir
}

/// Default log wait settings, stored in whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    pub timeout_secs: u64,
    pub check_interval_secs: u64,
    pub clean_after: bool,
}

impl Default for WaitSettings {
    fn default() -> Self {
        let options = WaitOptions::default();
        Self {
            timeout_secs: options.timeout.as_secs(),
            check_interval_secs: options.check_interval.as_secs(),
            clean_after: options.clean_after,
        }
    }
}

impl WaitSettings {
    pub fn to_options(&self) -> WaitOptions {
        WaitOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            check_interval: Duration::from_secs(self.check_interval_secs),
            clean_after: self.clean_after,
            ..WaitOptions::default()
        }
    }
}

/// Paths and defaults shared by every test scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Android SDK root; `adb` is looked up in `platform-tools` below it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub android_home: Option<PathBuf>,

    /// The CLI under test (default: `tns` from `PATH`).
    #[serde(default = "default_cli_path")]
    pub cli_path: PathBuf,

    /// Working directory for test apps and fixtures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_run_home: Option<PathBuf>,

    #[serde(default)]
    pub wait: WaitSettings,
}

fn default_cli_path() -> PathBuf {
    PathBuf::from("tns")
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            android_home: None,
            cli_path: default_cli_path(),
            test_run_home: None,
            wait: WaitSettings::default(),
        }
    }
}

impl HarnessConfig {
    /// Load config from `~/.livecheck/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::load_from(livecheck_dir().join(CONFIG_FILENAME))
    }

    pub fn load_from(path: impl AsRef<Path>) -> Self {
        std::fs::read_to_string(path.as_ref())
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Load config and apply environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::load();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Overrides paths with values from `lookup` (`ANDROID_HOME`, `TNS_PATH`, `TEST_RUN_HOME`).
    ///
    /// Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        if let Some(home) = get("ANDROID_HOME") {
            self.android_home = Some(home);
        }
        if let Some(cli) = get("TNS_PATH") {
            self.cli_path = cli;
        }
        if let Some(run_home) = get("TEST_RUN_HOME") {
            self.test_run_home = Some(run_home);
        }
    }

    /// Save config to `~/.livecheck/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(livecheck_dir().join(CONFIG_FILENAME))
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    /// Path of the `adb` binary: inside `android_home` when set, otherwise from `PATH`.
    pub fn adb_path(&self) -> PathBuf {
        match &self.android_home {
            Some(home) => home.join("platform-tools").join(adb_binary()),
            None => PathBuf::from(adb_binary()),
        }
    }

    /// Resolves `relative` against `test_run_home`, or the current directory.
    pub fn run_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        match &self.test_run_home {
            Some(home) => home.join(relative),
            None => relative.as_ref().to_path_buf(),
        }
    }
}

fn adb_binary() -> &'static str {
    if cfg!(windows) {
        "adb.exe"
    } else {
        "adb"
    }
}
