//! On-disk layout rooted at the configured data path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Name of the startup lock file.
const LOCK_FILE_NAME: &str = "lock.pid";

/// Name of the file recording the running cracker's PID.
const CRACKER_PID_FILE_NAME: &str = "hashcat.pid";

/// Name of the benchmark cache file.
const BENCHMARK_CACHE_FILE_NAME: &str = "benchmark_cache.json";

/// All agent-managed paths, derived once from the data root.
#[derive(Debug, Clone)]
pub struct DataPaths {
    /// Data root; everything else lives beneath it unless overridden.
    pub root: PathBuf,
    /// Coordinator-distributed cracker builds.
    pub crackers: PathBuf,
    /// Downloaded hash lists (`<attack_id>.hsh`).
    pub hashlists: PathBuf,
    /// Zap files (`<task_id>.zap`, `<task_id>_clientout.zap`).
    pub zaps: PathBuf,
    /// Candidate preprocessors.
    pub preprocessors: PathBuf,
    /// Auxiliary tools.
    pub tools: PathBuf,
    /// Transient cracker output files.
    pub output: PathBuf,
    /// Shared resource files (word lists, rule lists, mask lists).
    pub files: PathBuf,
    /// Cracker-managed restore checkpoints (`<attack_id>.restore`).
    pub restore: PathBuf,
    /// Benchmark cache file.
    pub benchmark_cache: PathBuf,
    /// Startup lock file.
    pub lock_file: PathBuf,
    /// PID of the currently running cracker process.
    pub cracker_pid_file: PathBuf,
}

impl DataPaths {
    /// Derives the full layout from `root`, honoring the optional overrides
    /// for the shared-files and zap directories.
    #[must_use]
    pub fn new(root: &Path, files_override: Option<&Path>, zap_override: Option<&Path>) -> Self {
        Self {
            root: root.to_path_buf(),
            crackers: root.join("crackers"),
            hashlists: root.join("hashlists"),
            zaps: zap_override.map_or_else(|| root.join("zaps"), Path::to_path_buf),
            preprocessors: root.join("preprocessors"),
            tools: root.join("tools"),
            output: root.join("output"),
            files: files_override.map_or_else(|| root.join("files"), Path::to_path_buf),
            restore: root.join("restore"),
            benchmark_cache: root.join(BENCHMARK_CACHE_FILE_NAME),
            lock_file: root.join(LOCK_FILE_NAME),
            cracker_pid_file: root.join(CRACKER_PID_FILE_NAME),
        }
    }

    /// Creates every directory in the layout.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when a directory cannot be created.
    pub fn init(&self) -> io::Result<()> {
        for dir in [
            &self.root,
            &self.crackers,
            &self.hashlists,
            &self.zaps,
            &self.preprocessors,
            &self.tools,
            &self.output,
            &self.files,
            &self.restore,
        ] {
            fs::create_dir_all(dir)?;
            restrict_dir_permissions(dir)?;
        }
        debug!(root = %self.root.display(), "data directories ready");
        Ok(())
    }

    /// Hash list destination for an attack.
    #[must_use]
    pub fn hash_list_file(&self, attack_id: i64) -> PathBuf {
        self.hashlists.join(format!("{attack_id}.hsh"))
    }

    /// Restore checkpoint path for an attack.
    #[must_use]
    pub fn restore_file(&self, attack_id: i64) -> PathBuf {
        self.restore.join(format!("{attack_id}.restore"))
    }

    /// Coordinator-supplied zap file for a task.
    #[must_use]
    pub fn zap_file(&self, task_id: i64) -> PathBuf {
        self.zaps.join(format!("{task_id}.zap"))
    }

    /// Locally written mirror of submitted cracks for a task.
    #[must_use]
    pub fn client_out_zap_file(&self, task_id: i64) -> PathBuf {
        self.zaps.join(format!("{task_id}_clientout.zap"))
    }

    /// Transient cracker outfile for a task.
    #[must_use]
    pub fn outfile(&self, task_id: i64) -> PathBuf {
        self.output.join(format!("{task_id}.out"))
    }

    /// Resource-file destination under the shared files directory.
    #[must_use]
    pub fn resource_file(&self, file_name: &str) -> PathBuf {
        self.files.join(file_name)
    }
}

/// Restricts a directory to the owning user on Unix; no-op elsewhere.
fn restrict_dir_permissions(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

/// Restricts a file to owner read/write on Unix; no-op elsewhere.
pub(crate) fn restrict_file_permissions(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
