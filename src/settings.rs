//! Resolved agent configuration.
//!
//! Flags and environment variables map 1:1 onto the fields here; the
//! resolution step clamps invalid numeric values back to their defaults with
//! a warning instead of refusing to start.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// Default heartbeat base interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default cap on the heartbeat backoff exponent (64x the base).
pub const DEFAULT_MAX_HEARTBEAT_BACKOFF: u32 = 6;

/// Default cracker status-update cadence.
pub const DEFAULT_STATUS_TIMER: Duration = Duration::from_secs(10);

/// Default per-task wall-clock timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Default pause after a failed task acquisition or run.
pub const DEFAULT_SLEEP_ON_FAILURE: Duration = Duration::from_secs(60);

/// Default download attempt budget.
pub const DEFAULT_DOWNLOAD_MAX_RETRIES: u32 = 3;

/// Default base delay for download retry backoff.
pub const DEFAULT_DOWNLOAD_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default GPU temperature warning threshold in degrees Celsius.
pub const DEFAULT_GPU_TEMP_THRESHOLD: u32 = 80;

/// Fully resolved agent settings.
///
/// Identity fields (`api_url`, `api_token`) are validated at startup;
/// everything else carries a safe default.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct Settings {
    /// Coordinator base URL.
    pub api_url: String,
    /// Bearer token presented on every request.
    pub api_token: String,
    /// Root for all agent-managed files.
    pub data_path: PathBuf,
    /// Override for the shared resource-file directory.
    pub files_path: Option<PathBuf>,
    /// Override for the zap-file directory.
    pub zap_path: Option<PathBuf>,
    /// Heartbeat base interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat backoff exponent cap.
    pub max_heartbeat_backoff: u32,
    /// Cracker status-update cadence.
    pub status_timer: Duration,
    /// Per-task wall-clock timeout.
    pub task_timeout: Duration,
    /// Pause after a failed task step.
    pub sleep_on_failure: Duration,
    /// Download attempt budget (>= 1).
    pub download_max_retries: u32,
    /// Base delay for download retry backoff.
    pub download_retry_delay: Duration,
    /// Disable TLS verification for file downloads.
    pub insecure_downloads: bool,
    /// Skip re-download of existing files without a checksum.
    pub always_trust_files: bool,
    /// Prefer the host-installed cracker over coordinator-distributed builds.
    pub always_use_native_hashcat: bool,
    /// Mirror submitted cracks into a local zap file.
    pub write_zaps_to_file: bool,
    /// Keep task zap files after terminal task transitions.
    pub retain_zaps_on_completion: bool,
    /// Benchmark with `--benchmark-all` instead of the default hash set.
    pub enable_additional_hash_types: bool,
    /// Use the legacy device-identification technique.
    pub use_legacy_device_technique: bool,
    /// Ignore the benchmark cache and always re-run benchmarks.
    pub force_benchmark_run: bool,
    /// Verbose diagnostics.
    pub debug: bool,
    /// Very verbose diagnostics (implies `debug`).
    pub extra_debugging: bool,
    /// GPU temperature warning threshold in degrees Celsius.
    pub gpu_temp_threshold: u32,
    /// Explicit cracker binary path; empty means auto-discover.
    pub hashcat_path: Option<PathBuf>,
}

impl Settings {
    /// Clamps a duration given in whole seconds, falling back to `default`
    /// when the value is zero.
    fn clamp_secs(name: &str, secs: u64, default: Duration) -> Duration {
        if secs == 0 {
            warn!(
                setting = name,
                value = secs,
                default_secs = default.as_secs(),
                "invalid value, using default"
            );
            default
        } else {
            Duration::from_secs(secs)
        }
    }

    /// Builds settings from raw values, clamping invalid numerics to
    /// defaults with a warning.
    #[must_use]
    pub fn resolve(raw: RawSettings) -> Self {
        let download_max_retries = if raw.download_max_retries == 0 {
            warn!(
                setting = "download_max_retries",
                value = raw.download_max_retries,
                default = DEFAULT_DOWNLOAD_MAX_RETRIES,
                "invalid value, using default"
            );
            DEFAULT_DOWNLOAD_MAX_RETRIES
        } else {
            raw.download_max_retries
        };

        let gpu_temp_threshold = if raw.gpu_temp_threshold == 0 {
            warn!(
                setting = "gpu_temp_threshold",
                value = raw.gpu_temp_threshold,
                default = DEFAULT_GPU_TEMP_THRESHOLD,
                "invalid value, using default"
            );
            DEFAULT_GPU_TEMP_THRESHOLD
        } else {
            raw.gpu_temp_threshold
        };

        Self {
            api_url: raw.api_url,
            api_token: raw.api_token,
            data_path: raw.data_path,
            files_path: raw.files_path,
            zap_path: raw.zap_path,
            heartbeat_interval: Self::clamp_secs(
                "heartbeat_interval",
                raw.heartbeat_interval_secs,
                DEFAULT_HEARTBEAT_INTERVAL,
            ),
            max_heartbeat_backoff: raw.max_heartbeat_backoff,
            status_timer: Self::clamp_secs(
                "status_timer",
                raw.status_timer_secs,
                DEFAULT_STATUS_TIMER,
            ),
            task_timeout: Self::clamp_secs(
                "task_timeout",
                raw.task_timeout_secs,
                DEFAULT_TASK_TIMEOUT,
            ),
            sleep_on_failure: Self::clamp_secs(
                "sleep_on_failure",
                raw.sleep_on_failure_secs,
                DEFAULT_SLEEP_ON_FAILURE,
            ),
            download_max_retries,
            download_retry_delay: Self::clamp_secs(
                "download_retry_delay",
                raw.download_retry_delay_secs,
                DEFAULT_DOWNLOAD_RETRY_DELAY,
            ),
            insecure_downloads: raw.insecure_downloads,
            always_trust_files: raw.always_trust_files,
            always_use_native_hashcat: raw.always_use_native_hashcat,
            write_zaps_to_file: raw.write_zaps_to_file,
            retain_zaps_on_completion: raw.retain_zaps_on_completion,
            enable_additional_hash_types: raw.enable_additional_hash_types,
            use_legacy_device_technique: raw.use_legacy_device_technique,
            force_benchmark_run: raw.force_benchmark_run,
            debug: raw.debug || raw.extra_debugging,
            extra_debugging: raw.extra_debugging,
            gpu_temp_threshold,
            hashcat_path: raw.hashcat_path.filter(|p| !p.as_os_str().is_empty()),
        }
    }
}

/// Unvalidated settings as parsed from the CLI, before clamping.
#[derive(Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct RawSettings {
    pub api_url: String,
    pub api_token: String,
    pub data_path: PathBuf,
    pub files_path: Option<PathBuf>,
    pub zap_path: Option<PathBuf>,
    pub heartbeat_interval_secs: u64,
    pub max_heartbeat_backoff: u32,
    pub status_timer_secs: u64,
    pub task_timeout_secs: u64,
    pub sleep_on_failure_secs: u64,
    pub download_max_retries: u32,
    pub download_retry_delay_secs: u64,
    pub insecure_downloads: bool,
    pub always_trust_files: bool,
    pub always_use_native_hashcat: bool,
    pub write_zaps_to_file: bool,
    pub retain_zaps_on_completion: bool,
    pub enable_additional_hash_types: bool,
    pub use_legacy_device_technique: bool,
    pub force_benchmark_run: bool,
    pub debug: bool,
    pub extra_debugging: bool,
    pub gpu_temp_threshold: u32,
    pub hashcat_path: Option<PathBuf>,
}

impl RawSettings {
    /// Raw settings carrying every default, for tests and programmatic use.
    #[must_use]
    pub fn with_defaults(api_url: &str, api_token: &str, data_path: PathBuf) -> Self {
        Self {
            api_url: api_url.to_string(),
            api_token: api_token.to_string(),
            data_path,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
            max_heartbeat_backoff: DEFAULT_MAX_HEARTBEAT_BACKOFF,
            status_timer_secs: DEFAULT_STATUS_TIMER.as_secs(),
            task_timeout_secs: DEFAULT_TASK_TIMEOUT.as_secs(),
            sleep_on_failure_secs: DEFAULT_SLEEP_ON_FAILURE.as_secs(),
            download_max_retries: DEFAULT_DOWNLOAD_MAX_RETRIES,
            download_retry_delay_secs: DEFAULT_DOWNLOAD_RETRY_DELAY.as_secs(),
            gpu_temp_threshold: DEFAULT_GPU_TEMP_THRESHOLD,
            ..Self::default()
        }
    }
}
