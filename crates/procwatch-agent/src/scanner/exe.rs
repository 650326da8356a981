//! Executable lookup through `PATH`
//!
//! Lets a target name a program the way a shell would (`redis-server`)
//! instead of spelling out the absolute path the kernel reports as argv[0].

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors from executable lookup
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExeError {
    #[error("PATH is not set")]
    NoPath,

    #[error("Executable not found: {0}")]
    NotFound(String),

    #[error("Not an executable: {}", .0.display())]
    NotExecutable(PathBuf),
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.is_file() && meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(meta: &fs::Metadata) -> bool {
    meta.is_file()
}

/// Locate `name` in a `PATH`-style directory list
///
/// Absolute names are checked as they are. Otherwise the first directory
/// holding an entry called `name` wins, and that entry must be executable.
pub fn find_exe(name: &str, path_list: &OsStr) -> Result<PathBuf, ExeError> {
    let candidate = if Path::new(name).is_absolute() {
        let path = PathBuf::from(name);
        fs::metadata(&path).ok().map(|meta| (path, meta))
    } else {
        env::split_paths(path_list)
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.join(name))
            .find_map(|path| fs::metadata(&path).ok().map(|meta| (path, meta)))
    };

    match candidate {
        Some((path, meta)) if is_executable(&meta) => Ok(path),
        Some((path, _)) => Err(ExeError::NotExecutable(path)),
        None => Err(ExeError::NotFound(name.to_string())),
    }
}

/// Locate `name` using the `PATH` from `env`
pub fn which(name: &str, env: impl Fn(&str) -> Option<String>) -> Result<PathBuf, ExeError> {
    if Path::new(name).is_absolute() {
        return find_exe(name, OsStr::new(""));
    }
    let path_list = env("PATH").ok_or(ExeError::NoPath)?;
    find_exe(name, OsStr::new(&path_list))
}
