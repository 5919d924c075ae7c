//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use cipherswarm_agent::settings::{
    DEFAULT_DOWNLOAD_MAX_RETRIES, DEFAULT_DOWNLOAD_RETRY_DELAY, DEFAULT_GPU_TEMP_THRESHOLD,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_HEARTBEAT_BACKOFF, DEFAULT_SLEEP_ON_FAILURE,
    DEFAULT_STATUS_TIMER, DEFAULT_TASK_TIMEOUT, RawSettings,
};

/// CipherSwarm distributed password-cracking worker.
#[derive(Parser, Debug)]
#[command(name = "cipherswarm-agent")]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the agent and run until interrupted.
    Start(StartArgs),
}

/// Flags map 1:1 onto configuration keys; every one can also be supplied
/// through the matching `CIPHERSWARM_*` environment variable.
#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct StartArgs {
    /// Coordinator base URL
    #[arg(long, env = "CIPHERSWARM_API_URL")]
    pub api_url: String,

    /// Bearer token for the coordinator
    #[arg(long, env = "CIPHERSWARM_API_TOKEN", hide_env_values = true)]
    pub api_token: String,

    /// Root directory for agent-managed files
    #[arg(long, env = "CIPHERSWARM_DATA_PATH", default_value = "data")]
    pub data_path: PathBuf,

    /// Override for the shared resource-file directory
    #[arg(long, env = "CIPHERSWARM_FILES_PATH")]
    pub files_path: Option<PathBuf>,

    /// Override for the zap-file directory
    #[arg(long, env = "CIPHERSWARM_ZAP_PATH")]
    pub zap_path: Option<PathBuf>,

    /// Heartbeat base interval in seconds
    #[arg(long, env = "CIPHERSWARM_HEARTBEAT_INTERVAL", default_value_t = DEFAULT_HEARTBEAT_INTERVAL.as_secs())]
    pub heartbeat_interval: u64,

    /// Heartbeat backoff multiplier cap (delay tops out at base * 2^cap)
    #[arg(long, env = "CIPHERSWARM_MAX_HEARTBEAT_BACKOFF", default_value_t = DEFAULT_MAX_HEARTBEAT_BACKOFF)]
    pub max_heartbeat_backoff: u32,

    /// Cracker status-update cadence in seconds
    #[arg(long, env = "CIPHERSWARM_STATUS_TIMER", default_value_t = DEFAULT_STATUS_TIMER.as_secs())]
    pub status_timer: u64,

    /// Per-task wall-clock timeout in seconds
    #[arg(long, env = "CIPHERSWARM_TASK_TIMEOUT", default_value_t = DEFAULT_TASK_TIMEOUT.as_secs())]
    pub task_timeout: u64,

    /// Pause after a failed task step, in seconds
    #[arg(long, env = "CIPHERSWARM_SLEEP_ON_FAILURE", default_value_t = DEFAULT_SLEEP_ON_FAILURE.as_secs())]
    pub sleep_on_failure: u64,

    /// Download attempt budget (minimum 1)
    #[arg(long, env = "CIPHERSWARM_DOWNLOAD_MAX_RETRIES", default_value_t = DEFAULT_DOWNLOAD_MAX_RETRIES)]
    pub download_max_retries: u32,

    /// Base delay for download retry backoff, in seconds
    #[arg(long, env = "CIPHERSWARM_DOWNLOAD_RETRY_DELAY", default_value_t = DEFAULT_DOWNLOAD_RETRY_DELAY.as_secs())]
    pub download_retry_delay: u64,

    /// Disable TLS verification for file downloads
    #[arg(long, env = "CIPHERSWARM_INSECURE_DOWNLOADS")]
    pub insecure_downloads: bool,

    /// Keep existing files that have no checksum to verify
    #[arg(long, env = "CIPHERSWARM_ALWAYS_TRUST_FILES")]
    pub always_trust_files: bool,

    /// Always use the host-installed hashcat
    #[arg(long, env = "CIPHERSWARM_ALWAYS_USE_NATIVE_HASHCAT")]
    pub always_use_native_hashcat: bool,

    /// Mirror submitted cracks into a local zap file
    #[arg(long, env = "CIPHERSWARM_WRITE_ZAPS_TO_FILE")]
    pub write_zaps_to_file: bool,

    /// Keep task zap files after terminal task transitions
    #[arg(long, env = "CIPHERSWARM_RETAIN_ZAPS_ON_COMPLETION")]
    pub retain_zaps_on_completion: bool,

    /// Benchmark every hash type instead of the default set
    #[arg(long, env = "CIPHERSWARM_ENABLE_ADDITIONAL_HASH_TYPES")]
    pub enable_additional_hash_types: bool,

    /// Use the legacy device-identification technique
    #[arg(long, env = "CIPHERSWARM_USE_LEGACY_DEVICE_TECHNIQUE")]
    pub use_legacy_device_technique: bool,

    /// Ignore the benchmark cache and always re-run benchmarks
    #[arg(long, env = "CIPHERSWARM_FORCE_BENCHMARK_RUN")]
    pub force_benchmark_run: bool,

    /// Verbose diagnostics
    #[arg(long, env = "CIPHERSWARM_DEBUG")]
    pub debug: bool,

    /// Very verbose diagnostics (implies --debug)
    #[arg(long, env = "CIPHERSWARM_EXTRA_DEBUGGING")]
    pub extra_debugging: bool,

    /// GPU temperature warning threshold in degrees Celsius
    #[arg(long, env = "CIPHERSWARM_GPU_TEMP_THRESHOLD", default_value_t = DEFAULT_GPU_TEMP_THRESHOLD)]
    pub gpu_temp_threshold: u32,

    /// Explicit cracker binary path (empty means auto-discover)
    #[arg(long, env = "CIPHERSWARM_HASHCAT_PATH")]
    pub hashcat_path: Option<PathBuf>,
}

impl StartArgs {
    /// Raw settings for [`cipherswarm_agent::Settings::resolve`].
    #[must_use]
    pub fn into_raw_settings(self) -> RawSettings {
        RawSettings {
            api_url: self.api_url,
            api_token: self.api_token,
            data_path: self.data_path,
            files_path: self.files_path,
            zap_path: self.zap_path,
            heartbeat_interval_secs: self.heartbeat_interval,
            max_heartbeat_backoff: self.max_heartbeat_backoff,
            status_timer_secs: self.status_timer,
            task_timeout_secs: self.task_timeout,
            sleep_on_failure_secs: self.sleep_on_failure,
            download_max_retries: self.download_max_retries,
            download_retry_delay_secs: self.download_retry_delay,
            insecure_downloads: self.insecure_downloads,
            always_trust_files: self.always_trust_files,
            always_use_native_hashcat: self.always_use_native_hashcat,
            write_zaps_to_file: self.write_zaps_to_file,
            retain_zaps_on_completion: self.retain_zaps_on_completion,
            enable_additional_hash_types: self.enable_additional_hash_types,
            use_legacy_device_technique: self.use_legacy_device_technique,
            force_benchmark_run: self.force_benchmark_run,
            debug: self.debug,
            extra_debugging: self.extra_debugging,
            gpu_temp_threshold: self.gpu_temp_threshold,
            hashcat_path: self.hashcat_path,
        }
    }
}
