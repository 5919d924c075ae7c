//! Wire types exchanged with the coordinator.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity attached to shipped errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Fatal,
    Major,
    Minor,
    Warning,
    Info,
}

impl Severity {
    /// Wire string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Fatal => "fatal",
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of the authentication probe.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResult {
    pub authenticated: bool,
    pub agent_id: i64,
}

/// Agent configuration as served by the coordinator.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfiguration {
    pub api_version: i64,
    pub config: AdvancedAgentConfiguration,
}

/// The tunable portion of the agent configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdvancedAgentConfiguration {
    /// Prefer the host-installed cracker; skip coordinator-driven updates.
    #[serde(default)]
    pub use_native_hashcat: bool,
    /// Main-loop and heartbeat base interval in seconds.
    #[serde(default)]
    pub agent_update_interval: Option<u64>,
    /// Backend device selector passed through to the cracker (`-d`).
    #[serde(default)]
    pub backend_devices: Option<String>,
}

/// Control-channel state returned by a heartbeat.
///
/// `Active` is documented by the protocol but the coordinator does not
/// currently emit it; it is kept for wire parity and handled as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatState {
    Pending,
    Stopped,
    Error,
    Active,
}

/// Envelope of a 200 heartbeat response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HeartbeatResponse {
    pub state: HeartbeatState,
}

/// Metadata pushed to the coordinator at startup and on reload.
#[derive(Debug, Clone, Serialize)]
pub struct AgentUpdate {
    pub id: i64,
    pub host_name: String,
    pub client_signature: String,
    pub operating_system: String,
    pub devices: Vec<String>,
}

/// One cracking assignment scoped to a keyspace slice.
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    pub id: i64,
    pub attack_id: i64,
    #[serde(default)]
    pub skip: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
}

/// A downloadable resource file attached to an attack.
#[derive(Debug, Clone, Deserialize)]
pub struct AttackResourceFile {
    pub id: i64,
    pub download_url: String,
    pub checksum: String,
    pub file_name: String,
}

/// A parameterized cracking configuration issued by the coordinator.
#[derive(Debug, Clone, Deserialize)]
pub struct Attack {
    pub id: i64,
    pub attack_mode: u32,
    pub hash_mode: u32,
    pub hash_list_id: i64,
    pub hash_list_url: String,
    pub hash_list_checksum: String,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub increment_mode: bool,
    #[serde(default)]
    pub increment_minimum: Option<u32>,
    #[serde(default)]
    pub increment_maximum: Option<u32>,
    #[serde(default)]
    pub custom_charset_1: Option<String>,
    #[serde(default)]
    pub custom_charset_2: Option<String>,
    #[serde(default)]
    pub custom_charset_3: Option<String>,
    #[serde(default)]
    pub custom_charset_4: Option<String>,
    #[serde(default)]
    pub word_list: Option<AttackResourceFile>,
    #[serde(default)]
    pub rule_list: Option<AttackResourceFile>,
    #[serde(default)]
    pub mask_list: Option<AttackResourceFile>,
    #[serde(default)]
    pub optimized_kernels: bool,
    #[serde(default)]
    pub slow_candidate_generators: bool,
}

impl Attack {
    /// The up-to-four custom charsets in positional order, gaps removed.
    #[must_use]
    pub fn custom_charsets(&self) -> Vec<(usize, &str)> {
        [
            &self.custom_charset_1,
            &self.custom_charset_2,
            &self.custom_charset_3,
            &self.custom_charset_4,
        ]
        .iter()
        .enumerate()
        .filter_map(|(i, cs)| cs.as_deref().map(|s| (i + 1, s)))
        .filter(|(_, s)| !s.is_empty())
        .collect()
    }

    /// All resource files attached to the attack.
    #[must_use]
    pub fn resource_files(&self) -> Vec<&AttackResourceFile> {
        [&self.word_list, &self.rule_list, &self.mask_list]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// One benchmark measurement in wire form.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSubmission {
    pub hash_type: u32,
    pub runtime: i64,
    pub hash_speed: f64,
    pub device: u32,
}

/// Envelope for a benchmark submission.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct BenchmarkSubmissionEnvelope {
    pub hashcat_benchmarks: Vec<BenchmarkSubmission>,
}

/// Metadata block attached to a shipped error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMetadata {
    pub error_date: DateTime<Utc>,
    pub other: Value,
}

/// An error shipped to the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSubmission {
    pub message: String,
    pub severity: Severity,
    pub agent_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    pub metadata: ErrorMetadata,
}

/// Device status block inside a task status update.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device_id: i32,
    pub device_name: String,
    pub device_type: DeviceType,
    pub speed: i64,
    pub utilization: i32,
    pub temperature: i32,
}

/// Device classification; unknown strings default to CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceType {
    #[serde(rename = "CPU")]
    Cpu,
    #[serde(rename = "GPU")]
    Gpu,
}

impl DeviceType {
    /// Parses the cracker's device-type string.
    #[must_use]
    pub fn from_wire(value: &str) -> Self {
        match value {
            "GPU" => Self::Gpu,
            _ => Self::Cpu,
        }
    }
}

/// Guess descriptor inside a task status update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskGuess {
    pub guess_base: Option<String>,
    pub guess_base_count: i64,
    pub guess_base_offset: i64,
    pub guess_base_percentage: f64,
    pub guess_mod: Option<String>,
    pub guess_mod_count: i64,
    pub guess_mod_offset: i64,
    pub guess_mod_percentage: f64,
    pub guess_mode: i32,
}

/// A task status update in wire form.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub original_line: String,
    pub time: DateTime<Utc>,
    pub session: String,
    pub hashcat_guess: TaskGuess,
    pub status: i32,
    pub target: String,
    pub progress: Vec<i64>,
    pub restore_point: i64,
    pub recovered_hashes: Vec<i32>,
    pub recovered_salts: Vec<i32>,
    pub rejected: i64,
    pub device_statuses: Vec<DeviceStatus>,
    pub time_start: DateTime<Utc>,
    pub estimated_stop: DateTime<Utc>,
}

/// A cracked hash in wire form.
#[derive(Debug, Clone, Serialize)]
pub struct CrackSubmission {
    pub timestamp: DateTime<Utc>,
    pub hash: String,
    pub plain_text: String,
}

/// Coordinator acknowledgment of a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAck {
    /// 204: accepted, nothing further to do.
    Accepted,
    /// 202: accepted but stale; missed cracks should be replayed.
    Stale,
    /// Any other 2xx: treated like stale out of caution.
    AcceptedOther,
}

/// Coordinator acknowledgment of a crack submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrackAck {
    /// 200: recorded.
    Accepted,
    /// 204: recorded and the hash list is now fully cracked.
    HashListComplete,
}

/// Available cracker update descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct CrackerUpdate {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub exec_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
