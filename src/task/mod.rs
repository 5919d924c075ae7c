//! Single-task lifecycle: fetch, accept, supervised run, terminal
//! transition.
//!
//! The supervisor multiplexes the session's output channels against the
//! caller's cancellation token and the per-task timeout. Status responses
//! drive the stale-status zap replay and the server-side delete/pause
//! handling; cracked hashes are shipped as they appear.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{
    ApiError, Attack, CoordinatorApi, CrackAck, CrackSubmission, DeviceStatus, DeviceType,
    Severity, StatusAck, Task, TaskGuess, TaskStatus,
};
use crate::cracker::{
    CrackResult, CrackerResolveError, CrackerSession, HashcatStatus, SessionError, SessionParams,
    classify_exit_code, classify_stderr, clear_cracker_pid, resolve_cracker_binary,
    write_cracker_pid,
};
use crate::download::DownloadError;
use crate::reporter::{ErrorReporter, ReportContext};
use crate::state::{Activity, Runtime};
use crate::zap::ZapProcessor;

/// Errors raised by task operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Sentinel: the coordinator has no work (204). Not a failure.
    #[error("no task available")]
    NoTaskAvailable,

    /// Task acquisition is gated until benchmarks are submitted.
    #[error("benchmarks not yet submitted")]
    BenchmarksPending,

    /// A coordinator operation failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A required download failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// No cracker binary could be located.
    #[error(transparent)]
    Resolve(#[from] CrackerResolveError),

    /// The cracker session could not be started.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// What a status-response handler decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusOutcome {
    /// Keep supervising.
    Continue,
    /// The task is gone server-side (deleted or paused); stop the session.
    Terminate,
}

/// Drives the lifecycle of one task at a time.
pub struct TaskManager {
    api: Arc<dyn CoordinatorApi>,
    runtime: Arc<Runtime>,
    reporter: Arc<ErrorReporter>,
    zap: ZapProcessor,
    backend_devices: Option<String>,
    prefer_native_cracker: bool,
}

impl TaskManager {
    #[must_use]
    pub fn new(
        api: Arc<dyn CoordinatorApi>,
        runtime: Arc<Runtime>,
        reporter: Arc<ErrorReporter>,
        backend_devices: Option<String>,
        prefer_native_cracker: bool,
    ) -> Self {
        let zap = ZapProcessor::new(Arc::clone(&api), runtime.paths().clone());
        Self {
            api,
            runtime,
            reporter,
            zap,
            backend_devices,
            prefer_native_cracker,
        }
    }

    /// Fetches the next task.
    ///
    /// # Errors
    ///
    /// [`TaskError::BenchmarksPending`] until benchmark submission is
    /// complete, [`TaskError::NoTaskAvailable`] on 204, and
    /// [`TaskError::Api`] for transport or coordinator failures.
    pub async fn get_new_task(&self) -> Result<Task, TaskError> {
        if !self.runtime.benchmarks_submitted() {
            return Err(TaskError::BenchmarksPending);
        }
        match self.api.get_new_task().await? {
            Some(task) => Ok(task),
            None => Err(TaskError::NoTaskAvailable),
        }
    }

    /// Fetches the attack parameters behind a task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Api`] on failure.
    pub async fn get_attack_parameters(&self, attack_id: i64) -> Result<Attack, TaskError> {
        Ok(self.api.get_attack(attack_id).await?)
    }

    /// Accepts a task. Best effort: failures are logged (4xx demoted to
    /// info, since they usually mean the task raced away) and reported as
    /// `false`.
    pub async fn accept_task(&self, task: &Task) -> bool {
        match self.api.accept_task(task.id).await {
            Ok(()) => {
                info!(task_id = task.id, "task accepted");
                true
            }
            Err(err) if err.is_client_error() => {
                info!(task_id = task.id, error = %err, "task could not be accepted");
                false
            }
            Err(err) => {
                warn!(task_id = task.id, error = %err, "accept_task failed");
                false
            }
        }
    }

    /// Marks a task exhausted. Best effort.
    pub async fn mark_task_exhausted(&self, task: &Task) {
        if let Err(err) = self.api.set_task_exhausted(task.id).await {
            warn!(task_id = task.id, error = %err, "set_task_exhausted failed");
        } else {
            info!(task_id = task.id, "task marked exhausted");
        }
    }

    /// Abandons a task. Best effort; the structured 422 variant is surfaced
    /// as a warning with its details.
    pub async fn abandon_task(&self, task: &Task) {
        match self.api.set_task_abandoned(task.id).await {
            Ok(()) => info!(task_id = task.id, "task abandoned"),
            Err(ApiError::Abandoned(details)) => {
                warn!(
                    task_id = task.id,
                    error = %details.error,
                    details = ?details.details,
                    "task abandonment rejected"
                );
            }
            Err(err) => warn!(task_id = task.id, error = %err, "set_task_abandoned failed"),
        }
    }

    /// Runs a task under supervision until the cracker terminates, the task
    /// timeout fires, the caller cancels, or the coordinator drops the task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] when the session cannot be built; failures
    /// after the session is running are handled and reported in-line.
    pub async fn run_task(
        &self,
        cancel: &CancellationToken,
        task: &Task,
        attack: &Attack,
    ) -> Result<(), TaskError> {
        let binary = resolve_cracker_binary(
            self.runtime.settings(),
            self.runtime.paths(),
            self.prefer_native_cracker,
        )?;
        let params = SessionParams::for_attack(
            &binary,
            task,
            attack,
            self.runtime.paths(),
            self.runtime.settings().status_timer,
            self.backend_devices.clone(),
        );
        let mut session = CrackerSession::spawn(&params)?;
        if let Some(pid) = session.pid() {
            write_cracker_pid(&self.runtime.paths().cracker_pid_file, pid);
        }
        self.runtime.set_current_activity(Activity::Cracking);
        info!(task_id = task.id, attack_id = attack.id, "task started");

        let timeout = tokio::time::sleep(self.runtime.settings().task_timeout);
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    // Expected shutdown: not reported to the coordinator.
                    if let Err(err) = session.kill().await {
                        self.reporter
                            .report(
                                Severity::Fatal,
                                &format!("failed to kill cracker on cancellation: {err}"),
                                ReportContext::for_task(task.id),
                            )
                            .await;
                    }
                    session.cleanup().await;
                    break;
                }
                () = &mut timeout => {
                    if let Err(err) = session.kill().await {
                        self.reporter
                            .report(
                                Severity::Fatal,
                                &format!("failed to kill cracker on task timeout: {err}"),
                                ReportContext::for_task(task.id),
                            )
                            .await;
                    }
                    self.reporter
                        .report(
                            Severity::Warning,
                            &format!(
                                "task timed out after {}s",
                                self.runtime.settings().task_timeout.as_secs()
                            ),
                            ReportContext::for_task(task.id),
                        )
                        .await;
                    session.cleanup().await;
                    break;
                }
                Some(line) = session.stdout_lines.recv() => {
                    self.handle_stdout_line(task, &line).await;
                }
                Some(line) = session.stderr_messages.recv() => {
                    self.handle_stderr_line(task, &line).await;
                }
                Some(status) = session.status_updates.recv() => {
                    if self.handle_status(task, &status).await == StatusOutcome::Terminate {
                        if let Err(err) = session.kill().await {
                            self.reporter
                                .report(
                                    Severity::Fatal,
                                    &format!("failed to kill cracker for dropped task: {err}"),
                                    ReportContext::for_task(task.id),
                                )
                                .await;
                        }
                        session.cleanup().await;
                        break;
                    }
                }
                Some(crack) = session.cracked_hashes.recv() => {
                    self.handle_crack(task, &crack).await;
                }
                done = session.done.recv() => {
                    let outcome = done.flatten();
                    // The outfile tailer finishes its final pass after the
                    // exit signal; drain so no crack is lost.
                    while let Some(crack) = session.cracked_hashes.recv().await {
                        self.handle_crack(task, &crack).await;
                    }
                    while let Some(line) = session.stderr_messages.recv().await {
                        self.handle_stderr_line(task, &line).await;
                    }
                    self.handle_done(task, attack, outcome).await;
                    session.cleanup().await;
                    break;
                }
            }
        }

        clear_cracker_pid(&self.runtime.paths().cracker_pid_file);
        self.remove_task_zaps(task);
        Ok(())
    }

    /// Raw stdout line: the session already routed valid status blobs, so a
    /// JSON-looking line landing here unparsed is a parse failure worth a
    /// warning.
    async fn handle_stdout_line(&self, task: &Task, line: &str) {
        let trimmed = line.trim_start();
        if trimmed.starts_with('{') && HashcatStatus::parse_line(line).is_none() {
            self.reporter
                .report(
                    Severity::Warning,
                    &format!("failed to parse status JSON from cracker: {line}"),
                    ReportContext {
                        task_id: Some(task.id),
                        category: None,
                        retryable: Some(true),
                    },
                )
                .await;
        } else {
            debug!(task_id = task.id, line, "cracker stdout");
        }
    }

    /// Classifies and forwards one stderr line.
    async fn handle_stderr_line(&self, task: &Task, line: &str) {
        let class = classify_stderr(line);
        self.reporter
            .report(
                class.severity,
                line,
                ReportContext {
                    task_id: Some(task.id),
                    category: Some(class.category.as_str()),
                    retryable: Some(class.retryable),
                },
            )
            .await;
    }

    /// Validates, displays, converts, and sends one status update, then
    /// interprets the coordinator's acknowledgment.
    async fn handle_status(&self, task: &Task, status: &HashcatStatus) -> StatusOutcome {
        if status.progress.len() < 2 || status.recovered_hashes.len() < 2 {
            warn!(
                task_id = task.id,
                progress_len = status.progress.len(),
                recovered_len = status.recovered_hashes.len(),
                "dropping malformed status update"
            );
            return StatusOutcome::Continue;
        }

        self.display_status(task, status);
        let converted = convert_status(status);

        match self.api.submit_status(task.id, &converted).await {
            Ok(StatusAck::Accepted) => StatusOutcome::Continue,
            Ok(StatusAck::Stale | StatusAck::AcceptedOther) => {
                debug!(task_id = task.id, "stale status; replaying zaps");
                self.replay_zaps(task).await;
                StatusOutcome::Continue
            }
            Err(err) if err.status_code() == Some(404) => {
                warn!(task_id = task.id, "task deleted server-side; stopping");
                StatusOutcome::Terminate
            }
            Err(err) if err.status_code() == Some(410) => {
                warn!(task_id = task.id, "task paused server-side; stopping");
                StatusOutcome::Terminate
            }
            Err(err) => {
                warn!(task_id = task.id, error = %err, "submit_status failed");
                StatusOutcome::Continue
            }
        }
    }

    /// Logs a human-readable view of a status update. The agent is
    /// headless, so tracing is the display surface.
    fn display_status(&self, task: &Task, status: &HashcatStatus) {
        let total_speed: i64 = status.devices.iter().map(|d| d.speed).sum();
        info!(
            task_id = task.id,
            session = %status.session,
            progress = ?status.progress,
            percent = status.progress_percent().unwrap_or(0.0),
            recovered = ?status.recovered_hashes,
            speed_hs = total_speed,
            "cracker status"
        );
        let threshold = i64::from(self.runtime.settings().gpu_temp_threshold);
        for device in &status.devices {
            if device.device_type == "GPU" && device.temp >= threshold {
                warn!(
                    task_id = task.id,
                    device = %device.device_name,
                    temperature = device.temp,
                    threshold,
                    "GPU temperature above threshold"
                );
            }
        }
    }

    /// Ships one crack and optionally mirrors it into the local zap file.
    async fn handle_crack(&self, task: &Task, crack: &CrackResult) {
        let submission = CrackSubmission {
            timestamp: crack.timestamp,
            hash: crack.hash.clone(),
            plain_text: crack.plain_text.clone(),
        };
        match self.api.submit_crack(task.id, &submission).await {
            Ok(CrackAck::HashListComplete) => {
                info!(task_id = task.id, "hash list fully cracked");
            }
            Ok(CrackAck::Accepted) => {
                debug!(task_id = task.id, hash = %crack.hash, "crack submitted");
            }
            Err(err) if err.is_client_error() => {
                self.reporter
                    .report(
                        Severity::Major,
                        &format!("crack rejected, task not found: {err}"),
                        ReportContext::for_task(task.id),
                    )
                    .await;
            }
            Err(err) => {
                self.reporter
                    .report(
                        Severity::Critical,
                        &format!("failed to submit crack: {err}"),
                        ReportContext::for_task(task.id),
                    )
                    .await;
            }
        }

        if self.runtime.settings().write_zaps_to_file {
            let path = self.runtime.paths().client_out_zap_file(task.id);
            let line = format!("{}:{}\n", crack.hash, crack.plain_text);
            if let Err(err) = append_line(&path, &line) {
                warn!(path = %path.display(), error = %err, "failed to append client zap line");
            }
        }
    }

    /// Replays coordinator-recorded cracks through the crack handler.
    async fn replay_zaps(&self, task: &Task) {
        let api = Arc::clone(&self.api);
        let task_id = task.id;
        let result = self
            .zap
            .get_zaps(task, move |timestamp, hash, plain_text| {
                let api = Arc::clone(&api);
                async move {
                    let submission = CrackSubmission {
                        timestamp,
                        hash,
                        plain_text,
                    };
                    if let Err(err) = api.submit_crack(task_id, &submission).await {
                        warn!(task_id, error = %err, "zap replay submission failed");
                    }
                }
            })
            .await;
        if let Err(err) = result {
            warn!(task_id = task.id, error = %err, "zap replay failed");
        }
    }

    /// Interprets the cracker's terminal state.
    async fn handle_done(&self, task: &Task, attack: &Attack, outcome: Option<SessionError>) {
        let Some(err) = outcome else {
            info!(task_id = task.id, "cracker finished successfully");
            return;
        };

        let code = err.exit_code();
        if code == 1 {
            info!(task_id = task.id, "keyspace exhausted");
            self.mark_task_exhausted(task).await;
            return;
        }

        let class = classify_exit_code(code);
        let message = err.to_string();
        self.reporter
            .report(
                class.severity,
                &format!("cracker failed: {message}"),
                ReportContext {
                    task_id: Some(task.id),
                    category: Some(class.category.as_str()),
                    retryable: Some(class.retryable),
                },
            )
            .await;

        // A restore file implicated in the failure would wedge every retry;
        // drop it so the next run starts from scratch.
        let restore_path = self.runtime.paths().restore_file(attack.id);
        if message.contains(&restore_path.display().to_string()) {
            match std::fs::remove_file(&restore_path) {
                Ok(()) => info!(path = %restore_path.display(), "removed implicated restore file"),
                Err(remove_err) if remove_err.kind() == std::io::ErrorKind::NotFound => {}
                Err(remove_err) => {
                    warn!(path = %restore_path.display(), error = %remove_err, "failed to remove restore file");
                }
            }
        }
    }

    /// Deletes the task's zap files on terminal transition unless retention
    /// is configured.
    fn remove_task_zaps(&self, task: &Task) {
        if self.runtime.settings().retain_zaps_on_completion {
            return;
        }
        for path in [
            self.runtime.paths().zap_file(task.id),
            self.runtime.paths().client_out_zap_file(task.id),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed task zap file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %path.display(), error = %err, "failed to remove zap file"),
            }
        }
    }
}

/// Appends one line to a file, creating it with restricted permissions.
fn append_line(path: &std::path::Path, line: &str) -> std::io::Result<()> {
    use std::io::Write;
    let created = !path.exists();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;
    if created {
        crate::state::restrict_file_permissions(path)?;
    }
    Ok(())
}

/// Converts a counter to the wire's int width; out-of-range values become
/// zero and bump the clamp counter.
fn int64_to_int(value: i64, clamped: &mut u32) -> i32 {
    i32::try_from(value).unwrap_or_else(|_| {
        *clamped += 1;
        0
    })
}

/// Converts a parsed status blob into wire form, clamping counters that do
/// not fit the wire's int width.
fn convert_status(status: &HashcatStatus) -> TaskStatus {
    let mut clamped = 0u32;
    let guess = status.guess.clone().unwrap_or_default();
    let converted = TaskStatus {
        original_line: status.original_line.clone(),
        time: status.received_at,
        session: status.session.clone(),
        hashcat_guess: TaskGuess {
            guess_base: guess.guess_base,
            guess_base_count: guess.guess_base_count,
            guess_base_offset: guess.guess_base_offset,
            guess_base_percentage: guess.guess_base_percent,
            guess_mod: guess.guess_mod,
            guess_mod_count: guess.guess_mod_count,
            guess_mod_offset: guess.guess_mod_offset,
            guess_mod_percentage: guess.guess_mod_percent,
            guess_mode: int64_to_int(guess.guess_mode, &mut clamped),
        },
        status: int64_to_int(status.status, &mut clamped),
        target: status.target.clone(),
        progress: status.progress.clone(),
        restore_point: status.restore_point,
        recovered_hashes: status
            .recovered_hashes
            .iter()
            .map(|&v| int64_to_int(v, &mut clamped))
            .collect(),
        recovered_salts: status
            .recovered_salts
            .iter()
            .map(|&v| int64_to_int(v, &mut clamped))
            .collect(),
        rejected: status.rejected,
        device_statuses: status
            .devices
            .iter()
            .map(|d| DeviceStatus {
                device_id: int64_to_int(d.device_id, &mut clamped),
                device_name: d.device_name.clone(),
                device_type: DeviceType::from_wire(&d.device_type),
                speed: d.speed,
                utilization: int64_to_int(d.util, &mut clamped),
                temperature: int64_to_int(d.temp, &mut clamped),
            })
            .collect(),
        time_start: chrono::DateTime::from_timestamp(status.time_start, 0)
            .unwrap_or(chrono::DateTime::UNIX_EPOCH),
        estimated_stop: chrono::DateTime::from_timestamp(status.estimated_stop, 0)
            .unwrap_or(chrono::DateTime::UNIX_EPOCH),
    };
    if clamped > 0 {
        warn!(clamped, "clamped out-of-range status counters to zero");
    }
    converted
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::api::{
        AgentConfiguration, AgentUpdate, ApiResult, AuthResult, BenchmarkSubmission, CrackerUpdate,
        ErrorSubmission, HeartbeatState,
    };
    use crate::settings::{RawSettings, Settings};

    /// API double with per-call behavior switches and full recording.
    #[derive(Default)]
    struct TaskApi {
        new_task: Mutex<Option<Task>>,
        accepted: Mutex<Vec<i64>>,
        exhausted: Mutex<Vec<i64>>,
        abandoned: Mutex<Vec<i64>>,
        cracks: Mutex<Vec<CrackSubmission>>,
        errors: Mutex<Vec<ErrorSubmission>>,
        statuses: Mutex<Vec<TaskStatus>>,
        status_response: AtomicU16,
        zap_payload: Mutex<Option<Vec<u8>>>,
        abandon_422: bool,
    }

    impl TaskApi {
        fn status_ack(code: u16) -> Self {
            let api = Self::default();
            api.status_response.store(code, Ordering::SeqCst);
            api
        }
    }

    #[async_trait]
    impl CoordinatorApi for TaskApi {
        async fn authenticate(&self) -> ApiResult<AuthResult> {
            unimplemented!()
        }
        async fn get_configuration(&self) -> ApiResult<AgentConfiguration> {
            unimplemented!()
        }
        async fn send_heartbeat(&self, _: i64) -> ApiResult<Option<HeartbeatState>> {
            unimplemented!()
        }
        async fn update_agent(&self, _: i64, _: &AgentUpdate) -> ApiResult<()> {
            unimplemented!()
        }
        async fn submit_benchmarks(&self, _: i64, _: &[BenchmarkSubmission]) -> ApiResult<()> {
            unimplemented!()
        }
        async fn submit_error(&self, _: i64, report: &ErrorSubmission) -> ApiResult<()> {
            self.errors.lock().unwrap().push(report.clone());
            Ok(())
        }
        async fn send_shutdown(&self, _: i64) -> ApiResult<()> {
            unimplemented!()
        }
        async fn get_new_task(&self) -> ApiResult<Option<Task>> {
            Ok(self.new_task.lock().unwrap().clone())
        }
        async fn accept_task(&self, task_id: i64) -> ApiResult<()> {
            self.accepted.lock().unwrap().push(task_id);
            Ok(())
        }
        async fn set_task_exhausted(&self, task_id: i64) -> ApiResult<()> {
            self.exhausted.lock().unwrap().push(task_id);
            Ok(())
        }
        async fn set_task_abandoned(&self, task_id: i64) -> ApiResult<()> {
            if self.abandon_422 {
                return Err(ApiError::Abandoned(crate::api::AbandonTaskDetails {
                    error: "already completed".to_string(),
                    details: vec!["state: must be running".to_string()],
                }));
            }
            self.abandoned.lock().unwrap().push(task_id);
            Ok(())
        }
        async fn submit_status(&self, _: i64, status: &TaskStatus) -> ApiResult<StatusAck> {
            self.statuses.lock().unwrap().push(status.clone());
            match self.status_response.load(Ordering::SeqCst) {
                202 => Ok(StatusAck::Stale),
                404 => Err(ApiError::Status {
                    operation: "submit_status",
                    status_code: 404,
                    message: "Not Found".to_string(),
                    body: String::new(),
                }),
                410 => Err(ApiError::Status {
                    operation: "submit_status",
                    status_code: 410,
                    message: "Gone".to_string(),
                    body: String::new(),
                }),
                _ => Ok(StatusAck::Accepted),
            }
        }
        async fn submit_crack(&self, _: i64, crack: &CrackSubmission) -> ApiResult<CrackAck> {
            self.cracks.lock().unwrap().push(crack.clone());
            Ok(CrackAck::Accepted)
        }
        async fn get_zaps(&self, _: i64) -> ApiResult<Option<Vec<u8>>> {
            Ok(self.zap_payload.lock().unwrap().clone())
        }
        async fn get_attack(&self, _: i64) -> ApiResult<Attack> {
            unimplemented!()
        }
        async fn check_for_cracker_update(
            &self,
            _: &str,
            _: &str,
        ) -> ApiResult<Option<CrackerUpdate>> {
            unimplemented!()
        }
    }

    struct Fixture {
        _tmp: TempDir,
        api: Arc<TaskApi>,
        runtime: Arc<Runtime>,
        manager: TaskManager,
    }

    fn fixture_with(api: TaskApi, tweak: impl FnOnce(&mut RawSettings)) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let fake_cracker = tmp.path().join("fake-hashcat");
        let mut raw = RawSettings::with_defaults("http://c.test", "t", tmp.path().join("data"));
        raw.hashcat_path = Some(fake_cracker);
        tweak(&mut raw);
        let runtime = Arc::new(Runtime::new(Settings::resolve(raw)));
        runtime.paths().init().unwrap();
        runtime.set_agent_id(7);
        runtime.set_benchmarks_submitted(true);
        let api = Arc::new(api);
        let reporter = Arc::new(ErrorReporter::new(
            Arc::clone(&api) as Arc<dyn CoordinatorApi>,
            Arc::clone(&runtime),
        ));
        let manager = TaskManager::new(
            Arc::clone(&api) as Arc<dyn CoordinatorApi>,
            Arc::clone(&runtime),
            reporter,
            None,
            false,
        );
        Fixture {
            _tmp: tmp,
            api,
            runtime,
            manager,
        }
    }

    fn fixture(api: TaskApi) -> Fixture {
        fixture_with(api, |_| {})
    }

    /// Installs an executable fake cracker script for the fixture.
    #[cfg(unix)]
    fn install_fake_cracker(fx: &Fixture, script: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = fx.runtime.settings().hashcat_path.clone().unwrap();
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn task() -> Task {
        serde_json::from_str(r#"{"id": 3, "attack_id": 9}"#).unwrap()
    }

    fn attack() -> Attack {
        serde_json::from_str(
            r#"{"id": 9, "attack_mode": 3, "hash_mode": 0, "mask": "?d?d?d?d",
                "hash_list_id": 2, "hash_list_url": "http://c.test/h", "hash_list_checksum": "ab"}"#,
        )
        .unwrap()
    }

    fn status_blob(progress: &str, recovered: &str) -> HashcatStatus {
        HashcatStatus::parse_line(&format!(
            r#"{{"session":"s","status":3,"progress":{progress},"recovered_hashes":{recovered},"recovered_salts":[0,1]}}"#
        ))
        .unwrap()
    }

    // ───── fetch gating ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_get_new_task_gated_on_benchmarks() {
        let fx = fixture(TaskApi::default());
        fx.runtime.set_benchmarks_submitted(false);
        assert!(matches!(
            fx.manager.get_new_task().await,
            Err(TaskError::BenchmarksPending)
        ));
    }

    #[tokio::test]
    async fn test_get_new_task_no_content_is_sentinel() {
        let fx = fixture(TaskApi::default());
        assert!(matches!(
            fx.manager.get_new_task().await,
            Err(TaskError::NoTaskAvailable)
        ));
    }

    #[tokio::test]
    async fn test_get_new_task_returns_task() {
        let api = TaskApi::default();
        *api.new_task.lock().unwrap() = Some(task());
        let fx = fixture(api);
        let fetched = fx.manager.get_new_task().await.unwrap();
        assert_eq!(fetched.id, 3);
    }

    // ───── best-effort transitions ──────────────────────────────────────────

    #[tokio::test]
    async fn test_accept_task_records_id() {
        let fx = fixture(TaskApi::default());
        assert!(fx.manager.accept_task(&task()).await);
        assert_eq!(*fx.api.accepted.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_abandon_task_handles_structured_422() {
        let fx = fixture(TaskApi {
            abandon_422: true,
            ..TaskApi::default()
        });
        // Must not panic or propagate; the details are logged as a warning.
        fx.manager.abandon_task(&task()).await;
        assert!(fx.api.abandoned.lock().unwrap().is_empty());
    }

    // ───── int conversion ───────────────────────────────────────────────────

    #[test]
    fn test_int64_to_int_preserves_in_range_values() {
        let mut clamped = 0;
        assert_eq!(int64_to_int(0, &mut clamped), 0);
        assert_eq!(int64_to_int(42, &mut clamped), 42);
        assert_eq!(int64_to_int(-42, &mut clamped), -42);
        assert_eq!(int64_to_int(i64::from(i32::MAX), &mut clamped), i32::MAX);
        assert_eq!(int64_to_int(i64::from(i32::MIN), &mut clamped), i32::MIN);
        assert_eq!(clamped, 0);
    }

    #[test]
    fn test_int64_to_int_clamps_out_of_range_to_zero() {
        let mut clamped = 0;
        assert_eq!(int64_to_int(i64::from(i32::MAX) + 1, &mut clamped), 0);
        assert_eq!(int64_to_int(i64::MIN, &mut clamped), 0);
        assert_eq!(clamped, 2);
    }

    #[test]
    fn test_convert_status_maps_devices_and_clamps() {
        let status = HashcatStatus::parse_line(
            r#"{"session":"s","status":3,"progress":[10,100],"recovered_hashes":[99999999999,10],"recovered_salts":[0,1],
                "devices":[{"device_id":1,"device_name":"RTX","device_type":"GPU","speed":500,"temp":70,"util":95},
                           {"device_id":2,"device_name":"Mystery","device_type":"FPGA","speed":10,"temp":40,"util":20}]}"#,
        )
        .unwrap();
        let converted = convert_status(&status);
        assert_eq!(converted.progress, vec![10, 100]);
        // 99999999999 exceeds i32 and clamps to zero.
        assert_eq!(converted.recovered_hashes, vec![0, 10]);
        assert_eq!(converted.device_statuses.len(), 2);
        assert_eq!(converted.device_statuses[0].device_type, DeviceType::Gpu);
        // Unknown device types default to CPU.
        assert_eq!(converted.device_statuses[1].device_type, DeviceType::Cpu);
    }

    // ───── status handling ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_malformed_status_is_dropped_not_sent() {
        let fx = fixture(TaskApi::default());
        let short = status_blob("[10]", "[1, 2]");
        assert_eq!(
            fx.manager.handle_status(&task(), &short).await,
            StatusOutcome::Continue
        );
        assert!(fx.api.statuses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_accepted_status_continues() {
        let fx = fixture(TaskApi::default());
        let status = status_blob("[10, 100]", "[1, 2]");
        assert_eq!(
            fx.manager.handle_status(&task(), &status).await,
            StatusOutcome::Continue
        );
        assert_eq!(fx.api.statuses.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_status_triggers_zap_replay() {
        let api = TaskApi::status_ack(202);
        *api.zap_payload.lock().unwrap() = Some(
            b"5d41402abc4b2a76b9719d911017c592:hello\ninvalid\n098f6bcd4621d373cade4e832627b4f6:test\n"
                .to_vec(),
        );
        let fx = fixture(api);

        let status = status_blob("[10, 100]", "[1, 2]");
        assert_eq!(
            fx.manager.handle_status(&task(), &status).await,
            StatusOutcome::Continue
        );

        // Exactly the two well-formed zap lines were replayed as cracks.
        let cracks = fx.api.cracks.lock().unwrap();
        assert_eq!(cracks.len(), 2);
        assert_eq!(cracks[0].hash, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(cracks[0].plain_text, "hello");
        assert_eq!(cracks[1].hash, "098f6bcd4621d373cade4e832627b4f6");
        assert_eq!(cracks[1].plain_text, "test");
    }

    #[tokio::test]
    async fn test_status_404_and_410_terminate() {
        for code in [404u16, 410] {
            let fx = fixture(TaskApi::status_ack(code));
            let status = status_blob("[10, 100]", "[1, 2]");
            assert_eq!(
                fx.manager.handle_status(&task(), &status).await,
                StatusOutcome::Terminate,
                "code {code}"
            );
        }
    }

    // ───── crack handling ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_crack_written_to_client_zap_when_enabled() {
        let fx = fixture_with(TaskApi::default(), |raw| raw.write_zaps_to_file = true);
        let crack = CrackResult::parse_line("aa:secret").unwrap();
        fx.manager.handle_crack(&task(), &crack).await;

        assert_eq!(fx.api.cracks.lock().unwrap().len(), 1);
        let zap_path = fx.runtime.paths().client_out_zap_file(3);
        assert_eq!(std::fs::read_to_string(zap_path).unwrap(), "aa:secret\n");
    }

    // ───── supervised runs ──────────────────────────────────────────────────

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_task_exit_one_marks_exhausted_without_error_report() {
        let fx = fixture(TaskApi::default());
        install_fake_cracker(&fx, "exit 1");

        fx.manager
            .run_task(&CancellationToken::new(), &task(), &attack())
            .await
            .unwrap();

        assert_eq!(*fx.api.exhausted.lock().unwrap(), vec![3]);
        assert!(
            fx.api.errors.lock().unwrap().is_empty(),
            "exit 1 must not report a cracking error"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_task_clean_exit_reports_nothing() {
        let fx = fixture(TaskApi::default());
        install_fake_cracker(&fx, "exit 0");

        fx.manager
            .run_task(&CancellationToken::new(), &task(), &attack())
            .await
            .unwrap();

        assert!(fx.api.exhausted.lock().unwrap().is_empty());
        assert!(fx.api.errors.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_task_nonzero_exit_reports_classified_error() {
        let fx = fixture(TaskApi::default());
        install_fake_cracker(&fx, "exit 2");

        fx.manager
            .run_task(&CancellationToken::new(), &task(), &attack())
            .await
            .unwrap();

        let errors = fx.api.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("exit status 2"));
        assert_eq!(errors[0].severity, Severity::Warning);
        assert_eq!(errors[0].metadata.other["category"], "aborted");
        assert_eq!(errors[0].metadata.other["retryable"], true);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_task_ships_cracks_from_outfile() {
        let fx = fixture(TaskApi::default());
        // The fake cracker writes its outfile exactly where the params say.
        let outfile = fx.runtime.paths().outfile(3);
        install_fake_cracker(
            &fx,
            &format!("printf 'aa:one\\nbb:two\\n' > {}", outfile.display()),
        );

        fx.manager
            .run_task(&CancellationToken::new(), &task(), &attack())
            .await
            .unwrap();

        let cracks = fx.api.cracks.lock().unwrap();
        assert_eq!(cracks.len(), 2);
        assert_eq!(cracks[0].hash, "aa");
        assert_eq!(cracks[1].plain_text, "two");
        assert!(!outfile.exists(), "outfile is removed by cleanup");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_task_timeout_kills_and_warns() {
        let fx = fixture_with(TaskApi::default(), |raw| raw.task_timeout_secs = 1);
        install_fake_cracker(&fx, "sleep 30");

        let started = std::time::Instant::now();
        fx.manager
            .run_task(&CancellationToken::new(), &task(), &attack())
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));

        let errors = fx.api.errors.lock().unwrap();
        assert!(
            errors
                .iter()
                .any(|e| e.severity == Severity::Warning && e.message.contains("timed out")),
            "timeout warning missing: {:?}",
            errors.iter().map(|e| &e.message).collect::<Vec<_>>()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_task_cancellation_is_silent() {
        let fx = fixture(TaskApi::default());
        install_fake_cracker(&fx, "sleep 30");

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                cancel.cancel();
            })
        };
        fx.manager
            .run_task(&cancel, &task(), &attack())
            .await
            .unwrap();
        handle.await.unwrap();

        // Cancellation is expected shutdown: nothing reported.
        assert!(fx.api.errors.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_task_removes_zaps_unless_retained() {
        let fx = fixture(TaskApi::default());
        install_fake_cracker(&fx, "exit 0");
        let zap_path = fx.runtime.paths().zap_file(3);
        std::fs::write(&zap_path, "aa:bb\n").unwrap();

        fx.manager
            .run_task(&CancellationToken::new(), &task(), &attack())
            .await
            .unwrap();
        assert!(!zap_path.exists());

        // With retention enabled the file stays.
        let fx = fixture_with(TaskApi::default(), |raw| raw.retain_zaps_on_completion = true);
        install_fake_cracker(&fx, "exit 0");
        let zap_path = fx.runtime.paths().zap_file(3);
        std::fs::write(&zap_path, "aa:bb\n").unwrap();
        fx.manager
            .run_task(&CancellationToken::new(), &task(), &attack())
            .await
            .unwrap();
        assert!(zap_path.exists());
    }
}
