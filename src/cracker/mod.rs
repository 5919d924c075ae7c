//! Cracker process integration: invocation parameters, session lifecycle,
//! output parsing, and classification of stderr lines and exit codes.

mod exit;
mod params;
mod session;
mod status;
mod stderr;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub use exit::classify_exit_code;
pub use params::SessionParams;
pub use session::{CrackerSession, SessionError};
pub use status::{CrackResult, HashcatDevice, HashcatGuess, HashcatStatus};
pub use stderr::{Classification, ErrorCategory, classify_stderr};

use crate::settings::Settings;
use crate::state::DataPaths;

/// Candidate binary names probed during auto-discovery.
const BINARY_CANDIDATES: &[&str] = &["hashcat", "hashcat.bin"];

/// Errors raised while locating the cracker binary.
#[derive(Debug, Error)]
pub enum CrackerResolveError {
    /// The explicitly configured path does not exist.
    #[error("configured cracker binary not found: {path}")]
    ConfiguredMissing {
        /// The configured path.
        path: PathBuf,
    },
    /// No binary was found in the crackers directory or on `PATH`.
    #[error("no cracker binary found; install hashcat or set an explicit path")]
    NotFound,
}

/// Resolves the cracker binary to invoke.
///
/// Order: the explicitly configured path, then coordinator-distributed
/// builds under `crackers/`, then `PATH`. When `prefer_native` is set the
/// `crackers/` probe is skipped.
///
/// # Errors
///
/// Returns [`CrackerResolveError`] when nothing usable is found.
pub fn resolve_cracker_binary(
    settings: &Settings,
    paths: &DataPaths,
    prefer_native: bool,
) -> Result<PathBuf, CrackerResolveError> {
    if let Some(configured) = &settings.hashcat_path {
        if configured.is_file() {
            return Ok(configured.clone());
        }
        return Err(CrackerResolveError::ConfiguredMissing {
            path: configured.clone(),
        });
    }

    if !prefer_native {
        for name in BINARY_CANDIDATES {
            let candidate = paths.crackers.join(name);
            if candidate.is_file() {
                debug!(binary = %candidate.display(), "using distributed cracker build");
                return Ok(candidate);
            }
            let nested = paths.crackers.join("hashcat").join(name);
            if nested.is_file() {
                debug!(binary = %nested.display(), "using distributed cracker build");
                return Ok(nested);
            }
        }
    }

    if let Some(found) = find_in_path(BINARY_CANDIDATES) {
        debug!(binary = %found.display(), "using native cracker from PATH");
        return Ok(found);
    }

    Err(CrackerResolveError::NotFound)
}

/// Searches `PATH` for the first matching candidate name.
fn find_in_path(candidates: &[&str]) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        for name in candidates {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Writes the running cracker's PID file; best effort.
pub fn write_cracker_pid(path: &Path, pid: u32) {
    if let Err(err) = std::fs::write(path, pid.to_string()) {
        tracing::warn!(path = %path.display(), error = %err, "failed to write cracker pid file");
    } else {
        let _ = crate::state::restrict_file_permissions(path);
    }
}

/// Removes the cracker PID file; best effort.
pub fn clear_cracker_pid(path: &Path) {
    let _ = std::fs::remove_file(path);
}
