//! Typed coordinator operations.
//!
//! The [`CoordinatorApi`] trait is the capability boundary between the agent
//! core and the coordinator's HTTP JSON API. Production code talks to
//! [`HttpApiClient`]; tests implement the trait directly with per-test
//! doubles.

mod error;
mod http;
mod types;

use async_trait::async_trait;

pub use error::{AbandonTaskDetails, ApiError, ApiResult};
pub use http::HttpApiClient;
pub use types::{
    AdvancedAgentConfiguration, AgentConfiguration, AgentUpdate, Attack, AttackResourceFile,
    AuthResult, BenchmarkSubmission, CrackAck, CrackSubmission, CrackerUpdate, DeviceStatus,
    DeviceType, ErrorMetadata, ErrorSubmission, HeartbeatState, Severity, StatusAck, Task,
    TaskGuess, TaskStatus,
};

/// Operations against the coordinator, grouped by capability.
///
/// All methods map HTTP statuses >= 400 into [`ApiError`]; the "no content"
/// cases (`204`) that carry meaning are surfaced as `None` or a dedicated
/// acknowledgment variant rather than an error.
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    // --- auth ---

    /// Verifies the bearer token and learns this agent's id.
    async fn authenticate(&self) -> ApiResult<AuthResult>;

    // --- agents ---

    /// Fetches the agent configuration.
    async fn get_configuration(&self) -> ApiResult<AgentConfiguration>;

    /// Sends a heartbeat; `None` means 204 (no state change requested).
    async fn send_heartbeat(&self, agent_id: i64) -> ApiResult<Option<HeartbeatState>>;

    /// Pushes agent metadata.
    async fn update_agent(&self, agent_id: i64, update: &AgentUpdate) -> ApiResult<()>;

    /// Submits a batch of benchmark results.
    async fn submit_benchmarks(
        &self,
        agent_id: i64,
        benchmarks: &[BenchmarkSubmission],
    ) -> ApiResult<()>;

    /// Ships an error report.
    async fn submit_error(&self, agent_id: i64, report: &ErrorSubmission) -> ApiResult<()>;

    /// Notifies the coordinator of an orderly shutdown.
    async fn send_shutdown(&self, agent_id: i64) -> ApiResult<()>;

    // --- tasks ---

    /// Fetches the next task; `None` means 204 (nothing available).
    async fn get_new_task(&self) -> ApiResult<Option<Task>>;

    /// Accepts a task.
    async fn accept_task(&self, task_id: i64) -> ApiResult<()>;

    /// Marks a task's keyspace as fully searched.
    async fn set_task_exhausted(&self, task_id: i64) -> ApiResult<()>;

    /// Abandons a task; a structured 422 surfaces as [`ApiError::Abandoned`].
    async fn set_task_abandoned(&self, task_id: i64) -> ApiResult<()>;

    /// Submits a status update.
    async fn submit_status(&self, task_id: i64, status: &TaskStatus) -> ApiResult<StatusAck>;

    /// Submits a cracked hash.
    async fn submit_crack(&self, task_id: i64, crack: &CrackSubmission) -> ApiResult<CrackAck>;

    /// Fetches the zap stream for a task; `None` when the coordinator has
    /// nothing recorded.
    async fn get_zaps(&self, task_id: i64) -> ApiResult<Option<Vec<u8>>>;

    // --- attacks ---

    /// Fetches attack parameters.
    async fn get_attack(&self, attack_id: i64) -> ApiResult<Attack>;

    // --- crackers ---

    /// Asks whether a newer cracker build is available; `None` means 204.
    async fn check_for_cracker_update(
        &self,
        operating_system: &str,
        version: &str,
    ) -> ApiResult<Option<CrackerUpdate>>;
}
