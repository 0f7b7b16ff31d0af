//! Filesystem helpers used to stage fixtures and inspect CLI output.
//!
//! Reads are forgiving: a missing or unreadable file reads as an empty
//! string, and deleting a missing file is a no-op. Archive extraction is
//! best-effort and only logs failures.
//!
//! # Example
//!
//! ```no_run
//! use livecheck_core::file::FileHelper;
//!
//! FileHelper::replace("TNS_App/app/app.css", "#284848", "green").unwrap();
//! assert!(FileHelper::read("TNS_App/app/app.css").contains("green"));
//! ```

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::process::ProcessHelper;

/// Errors from file operations that do not swallow failures.
#[derive(Error, Debug)]
pub enum FileError {
    /// The file an operation needs to modify does not exist.
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),

    /// The glob pattern given to a search is malformed.
    #[error("Invalid pattern '{0}': {1}")]
    Pattern(String, glob::PatternError),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Stateless wrapper over filesystem primitives.
pub struct FileHelper;

impl FileHelper {
    /// Rewrites both `\` and `/` to the platform separator.
    pub fn normalize(path: impl AsRef<Path>) -> PathBuf {
        let raw = path.as_ref().to_string_lossy();
        PathBuf::from(raw.replace(['\\', '/'], &MAIN_SEPARATOR.to_string()))
    }

    /// Returns the file content, or an empty string if it cannot be read.
    pub fn read(path: impl AsRef<Path>) -> String {
        let path = Self::normalize(path);
        match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "read failed, returning empty content");
                String::new()
            }
        }
    }

    /// Replaces the file content with `text`.
    pub fn write(path: impl AsRef<Path>, text: &str) -> Result<(), FileError> {
        fs::write(Self::normalize(path), text)?;
        Ok(())
    }

    /// Appends `text` followed by a newline, creating the file if needed.
    pub fn append(path: impl AsRef<Path>, text: &str) -> Result<(), FileError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(Self::normalize(path))?;
        writeln!(file, "{}", text)?;
        Ok(())
    }

    pub fn exists(path: impl AsRef<Path>) -> bool {
        Self::normalize(path).exists()
    }

    /// Recursively finds files whose name matches `name`.
    ///
    /// Matches are sorted by path length and the `index`-th one is returned,
    /// so `0` is the match closest to `base`. With `exact` the whole file
    /// name must equal `name`, otherwise it only has to contain it.
    pub fn find(base: impl AsRef<Path>, name: &str, exact: bool, index: usize) -> Option<PathBuf> {
        let mut matches: Vec<PathBuf> = Self::files(base.as_ref())
            .filter(|p| {
                let file_name = p.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                if exact {
                    file_name == name
                } else {
                    file_name.contains(name)
                }
            })
            .collect();
        matches.sort_by_key(|p| p.as_os_str().len());
        matches.into_iter().nth(index)
    }

    /// Recursively lists files with extension `ext` (leading dot optional).
    pub fn find_by_extension(base: impl AsRef<Path>, ext: &str) -> Vec<PathBuf> {
        let suffix = Self::dotted(ext);
        let matches: Vec<PathBuf> = Self::files(base.as_ref())
            .filter(|p| p.to_string_lossy().ends_with(&suffix))
            .collect();
        debug!(ext = %suffix, count = matches.len(), "files found by extension");
        matches
    }

    /// Returns whether any file below `base` matches a shell glob such as `*.aar`.
    pub fn pattern_exists(base: impl AsRef<Path>, pattern: &str) -> Result<bool, FileError> {
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| FileError::Pattern(pattern.to_string(), e))?;
        let found = Self::files(base.as_ref()).find(|p| {
            p.file_name()
                .map(|n| pattern.matches(&n.to_string_lossy()))
                .unwrap_or(false)
        });
        if let Some(ref path) = found {
            debug!(%pattern, path = %path.display(), "pattern exists");
        }
        Ok(found.is_some())
    }

    /// Returns whether `dir` itself (not its subdirectories) holds a file ending in `ext`.
    pub fn extension_exists(dir: impl AsRef<Path>, ext: &str) -> Result<bool, FileError> {
        for entry in fs::read_dir(dir.as_ref())? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().ends_with(ext) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns whether any line of the file contains `text`.
    pub fn contains_text(path: impl AsRef<Path>, text: &str) -> Result<bool, FileError> {
        let content = fs::read_to_string(Self::normalize(path))?;
        Ok(content.lines().any(|line| line.contains(text)))
    }

    pub fn size(path: impl AsRef<Path>) -> Result<u64, FileError> {
        let path = Self::normalize(path);
        if !path.exists() {
            return Err(FileError::NotFound(path.to_path_buf()));
        }
        Ok(fs::metadata(&path)?.len())
    }

    /// Deletes a file or a directory tree; missing paths are ignored.
    ///
    /// When the delete fails and `force` is set, processes holding the file
    /// open are killed (plus `node` and `adb` on Windows) and the delete is
    /// retried once. The retry's error is returned.
    pub fn remove(path: impl AsRef<Path>, force: bool) -> Result<(), FileError> {
        let path = Self::normalize(path);
        let path = path.as_path();
        if !path.exists() {
            return Ok(());
        }
        match Self::delete(path) {
            Ok(()) => Ok(()),
            Err(e) if !force => Err(e.into()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "delete failed, killing processes holding the file");
                if let Err(kill_err) = ProcessHelper::kill_by_handle(path) {
                    warn!(error = %kill_err, "failed to kill file handle owners");
                }
                if cfg!(windows) {
                    for name in ["node", "adb"] {
                        if let Err(kill_err) = ProcessHelper::kill(name) {
                            warn!(name, error = %kill_err, "failed to kill process");
                        }
                    }
                }
                Self::delete(path)?;
                Ok(())
            }
        }
    }

    /// Replaces every occurrence of `old` with `new` in the file.
    pub fn replace(path: impl AsRef<Path>, old: &str, new: &str) -> Result<(), FileError> {
        let path = Self::normalize(path);
        let path = path.as_path();
        if !path.exists() {
            return Err(FileError::NotFound(path.to_path_buf()));
        }
        let content = Self::read(path);
        Self::write(path, &content.replace(old, new))?;
        info!(path = %path.display(), old, new, "replaced file content");
        Ok(())
    }

    /// Copies a file. If `dest` is a directory the file keeps its name inside it.
    pub fn copy(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<(), FileError> {
        let src = Self::normalize(src);
        let dest = Self::resolve_dest(&src, &Self::normalize(dest))?;
        fs::copy(&src, dest)?;
        Ok(())
    }

    /// Moves a file, falling back to copy and delete across filesystems.
    pub fn move_path(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<(), FileError> {
        let src = Self::normalize(src);
        let dest = Self::resolve_dest(&src, &Self::normalize(dest))?;
        if fs::rename(&src, &dest).is_err() {
            fs::copy(&src, &dest)?;
            fs::remove_file(&src)?;
        }
        Ok(())
    }

    /// Extracts a `.tar.gz` archive into `dest`. Failures are logged, not returned.
    pub fn unpack_tar(archive: impl AsRef<Path>, dest: impl AsRef<Path>) -> bool {
        let archive = archive.as_ref();
        let result = fs::File::open(archive).and_then(|f| {
            let decoder = flate2::read::GzDecoder::new(f);
            tar::Archive::new(decoder).unpack(dest.as_ref())
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(archive = %archive.display(), error = %e, "failed to unpack tar file");
                false
            }
        }
    }

    /// Extracts a `.zip` archive into `dest`. Failures are logged, not returned.
    pub fn unzip(archive: impl AsRef<Path>, dest: impl AsRef<Path>) -> bool {
        let archive = archive.as_ref();
        let result = fs::File::open(archive)
            .map_err(zip::result::ZipError::Io)
            .and_then(zip::ZipArchive::new)
            .and_then(|mut zip| zip.extract(dest.as_ref()));
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(archive = %archive.display(), error = %e, "failed to unzip file");
                false
            }
        }
    }

    fn resolve_dest(src: &Path, dest: &Path) -> Result<PathBuf, FileError> {
        if dest.is_dir() {
            let name = src
                .file_name()
                .ok_or_else(|| FileError::NotFound(src.to_path_buf()))?;
            Ok(dest.join(name))
        } else {
            Ok(dest.to_path_buf())
        }
    }

    fn delete(path: &Path) -> io::Result<()> {
        if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn dotted(ext: &str) -> String {
        if ext.starts_with('.') {
            ext.to_string()
        } else {
            format!(".{}", ext)
        }
    }

    fn files(base: &Path) -> impl Iterator<Item = PathBuf> {
        WalkDir::new(base)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
    }
}
