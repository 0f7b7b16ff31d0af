//! Shared test helpers for livecheck-core integration tests.
//!
//! Provides a fake "CLI under test" that appends lines to a log file on a
//! schedule, standing in for `tns run` writing its output.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

/// A line the fake CLI writes after `delay` from the previous one.
pub struct Emit {
    pub delay: Duration,
    pub line: &'static str,
}

pub fn emit(delay_ms: u64, line: &'static str) -> Emit {
    Emit { delay: Duration::from_millis(delay_ms), line }
}

/// Spawns a thread appending `script` lines to `log`, one per step.
pub fn fake_cli(log: &Path, script: Vec<Emit>) -> JoinHandle<()> {
    let log: PathBuf = log.to_path_buf();
    std::thread::spawn(move || {
        for step in script {
            std::thread::sleep(step.delay);
            let mut f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log)
                .unwrap();
            writeln!(f, "{}", step.line).unwrap();
        }
    })
}

/// Creates a minimal app fixture tree and returns its root.
pub fn app_fixture(root: &Path) -> PathBuf {
    let app = root.join("TNS_App").join("app");
    std::fs::create_dir_all(&app).unwrap();
    std::fs::write(app.join("main-page.xml"), "<Page>\n  <Label text=\"TEST\" />\n</Page>\n").unwrap();
    std::fs::write(app.join("main-view-model.js"), "var message = counter + \" taps left\";\n").unwrap();
    std::fs::write(app.join("app.css"), ".title {\n  color: #284848;\n}\n").unwrap();
    root.join("TNS_App")
}
