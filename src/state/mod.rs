//! Process-wide runtime state.
//!
//! [`Runtime`] is the explicit value threaded through every component
//! constructor. It carries the immutable identity and tuning data plus
//! exactly four synchronized fields shared across tasks: three atomic
//! booleans and the current-activity enum behind a reader-writer lock.

mod paths;

use std::fmt;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, warn};

pub use paths::DataPaths;
pub(crate) use paths::restrict_file_permissions;

use crate::settings::Settings;

/// What the agent is currently doing, as reported to logs and consulted by
/// the heartbeat state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Startup sequence in progress.
    Starting,
    /// Running the cracker in benchmark mode.
    Benchmarking,
    /// Updating the cracker binary or configuration.
    Updating,
    /// Idle between loop iterations.
    Waiting,
    /// A task supervisor is active.
    Cracking,
    /// Fetching hash lists or resource files.
    Downloading,
    /// Shutdown requested.
    Stopping,
}

impl Activity {
    /// Log-friendly name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Benchmarking => "benchmarking",
            Self::Updating => "updating",
            Self::Waiting => "waiting",
            Self::Cracking => "cracking",
            Self::Downloading => "downloading",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors raised while establishing runtime state.
#[derive(Debug, Error)]
pub enum StateError {
    /// Another agent instance appears to own this data directory.
    #[error("lock file already present at {path}: remove it if no other agent is running")]
    LockHeld {
        /// The offending lock-file path.
        path: PathBuf,
    },
    /// I/O failure while creating state.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Process-wide runtime state.
///
/// Identity fields become immutable once [`Runtime::set_agent_id`] has been
/// called at the end of authentication. The four synchronized fields are
/// only ever touched through the typed accessors below.
#[derive(Debug)]
pub struct Runtime {
    settings: Settings,
    paths: DataPaths,
    agent_version: String,
    platform: String,
    agent_id: AtomicI64,
    reload: AtomicBool,
    job_checking_stopped: AtomicBool,
    benchmarks_submitted: AtomicBool,
    current_activity: RwLock<Activity>,
}

impl Runtime {
    /// Builds the runtime from resolved settings. Paths are derived but not
    /// yet created; call [`DataPaths::init`] via [`Runtime::paths`] during
    /// startup.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        let paths = DataPaths::new(
            &settings.data_path,
            settings.files_path.as_deref(),
            settings.zap_path.as_deref(),
        );
        Self {
            paths,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            platform: platform_string().to_string(),
            agent_id: AtomicI64::new(0),
            reload: AtomicBool::new(false),
            job_checking_stopped: AtomicBool::new(false),
            benchmarks_submitted: AtomicBool::new(false),
            current_activity: RwLock::new(Activity::Starting),
            settings,
        }
    }

    /// Resolved settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// On-disk layout.
    #[must_use]
    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    /// Agent version string sent in metadata and update checks.
    #[must_use]
    pub fn agent_version(&self) -> &str {
        &self.agent_version
    }

    /// Operating-system string sent in metadata and update checks.
    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Coordinator-assigned agent id; zero until authentication completes.
    #[must_use]
    pub fn agent_id(&self) -> i64 {
        self.agent_id.load(Ordering::SeqCst)
    }

    /// Records the coordinator-assigned agent id. Later calls are ignored
    /// with a warning; identity is immutable after authentication.
    pub fn set_agent_id(&self, id: i64) {
        if self
            .agent_id
            .compare_exchange(0, id, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(
                current = self.agent_id(),
                attempted = id,
                "ignoring repeated agent id assignment"
            );
        }
    }

    /// Whether a configuration reload has been requested.
    #[must_use]
    pub fn reload_requested(&self) -> bool {
        self.reload.load(Ordering::SeqCst)
    }

    /// Requests or clears a configuration reload.
    pub fn set_reload(&self, value: bool) {
        self.reload.store(value, Ordering::SeqCst);
    }

    /// Whether the coordinator has asked this agent to stop taking jobs.
    #[must_use]
    pub fn job_checking_stopped(&self) -> bool {
        self.job_checking_stopped.load(Ordering::SeqCst)
    }

    /// Marks job checking as stopped or resumed.
    pub fn set_job_checking_stopped(&self, value: bool) {
        self.job_checking_stopped.store(value, Ordering::SeqCst);
    }

    /// Whether every known benchmark result has reached the coordinator.
    #[must_use]
    pub fn benchmarks_submitted(&self) -> bool {
        self.benchmarks_submitted.load(Ordering::SeqCst)
    }

    /// Records benchmark submission progress.
    pub fn set_benchmarks_submitted(&self, value: bool) {
        self.benchmarks_submitted.store(value, Ordering::SeqCst);
    }

    /// Current activity.
    ///
    /// # Panics
    ///
    /// Panics if the activity lock is poisoned, which requires a prior panic
    /// while holding the write lock.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn current_activity(&self) -> Activity {
        *self.current_activity.read().unwrap()
    }

    /// Updates the current activity.
    ///
    /// # Panics
    ///
    /// Panics if the activity lock is poisoned.
    #[allow(clippy::unwrap_used)]
    pub fn set_current_activity(&self, activity: Activity) {
        let mut guard = self.current_activity.write().unwrap();
        if *guard != activity {
            debug!(from = %*guard, to = %activity, "activity change");
        }
        *guard = activity;
    }
}

/// Coordinator-facing operating-system identifier.
#[must_use]
pub fn platform_string() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Startup lock file; removed on drop so every exit path releases it.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Claims the lock file, refusing when one is already present.
    ///
    /// # Errors
    ///
    /// [`StateError::LockHeld`] when a lock file exists, or
    /// [`StateError::Io`] when the file cannot be created.
    pub fn acquire(path: &std::path::Path) -> Result<Self, StateError> {
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(StateError::LockHeld { path: path.to_path_buf() });
            }
            Err(err) => {
                return Err(StateError::Io {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };
        write!(file, "{}", std::process::id()).map_err(|err| StateError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
        restrict_file_permissions(path).map_err(|err| StateError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
        debug!(path = %path.display(), pid = std::process::id(), "lock file created");
        Ok(Self { path: path.to_path_buf() })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to remove lock file");
        }
    }
}
