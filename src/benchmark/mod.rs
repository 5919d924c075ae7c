//! Device benchmarking with at-least-once submission semantics.
//!
//! Fresh results stream out of a `--benchmark` cracker run and are submitted
//! in batches as they accumulate. Every acknowledgment is recorded in the
//! on-disk cache before the next network call, so a crash or restart never
//! re-sends acknowledged results and never drops unacknowledged ones.

mod cache;

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{BenchmarkSubmission, CoordinatorApi, Severity};
use crate::cracker::{
    CrackerResolveError, CrackerSession, SessionError, SessionParams, clear_cracker_pid,
    resolve_cracker_binary, write_cracker_pid,
};
use crate::reporter::{ErrorReporter, ReportContext};
use crate::state::{Activity, Runtime};

pub use cache::{
    BenchmarkResult, all_submitted, load_cache, parse_benchmark_line, save_cache,
    unsubmitted_indices, unsubmitted_results,
};

/// Submit whenever this many new unsubmitted results have accumulated.
const SUBMIT_BATCH_SIZE: usize = 10;

/// Errors raised by benchmark runs.
#[derive(Debug, Error)]
pub enum BenchmarkError {
    /// No cracker binary could be located.
    #[error(transparent)]
    Resolve(#[from] CrackerResolveError),

    /// The benchmark session could not be started.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The benchmark run was cancelled.
    #[error("benchmark run cancelled")]
    Cancelled,

    /// The cracker exited abnormally during the benchmark.
    #[error("benchmark session failed: {detail}")]
    SessionFailed {
        /// Exit description.
        detail: String,
    },
}

/// Runs benchmarks and keeps the submission cache consistent.
pub struct BenchmarkManager {
    api: Arc<dyn CoordinatorApi>,
    runtime: Arc<Runtime>,
    reporter: Arc<ErrorReporter>,
    backend_devices: Option<String>,
}

impl BenchmarkManager {
    #[must_use]
    pub fn new(
        api: Arc<dyn CoordinatorApi>,
        runtime: Arc<Runtime>,
        reporter: Arc<ErrorReporter>,
        backend_devices: Option<String>,
    ) -> Self {
        Self {
            api,
            runtime,
            reporter,
            backend_devices,
        }
    }

    /// Brings benchmark submission up to date.
    ///
    /// With a usable cache this submits only what is still unacknowledged
    /// and never runs the cracker; cache submission failures are non-fatal
    /// so the next loop iteration can retry. Without a cache (or with
    /// `force_benchmark_run`) a fresh benchmark session runs with
    /// incremental batched submission.
    ///
    /// # Errors
    ///
    /// Returns [`BenchmarkError`] only for fresh-run failures: a missing
    /// binary, a failed spawn, an abnormal exit, or cancellation.
    pub async fn update_benchmarks(&self, cancel: &CancellationToken) -> Result<(), BenchmarkError> {
        self.runtime.set_benchmarks_submitted(false);

        if !self.runtime.settings().force_benchmark_run {
            if let Some(mut cached) = load_cache(&self.runtime.paths().benchmark_cache) {
                if all_submitted(&cached) {
                    debug!(count = cached.len(), "benchmark cache fully submitted");
                    self.runtime.set_benchmarks_submitted(true);
                    return Ok(());
                }
                if self.submit_pending(&mut cached).await {
                    self.runtime.set_benchmarks_submitted(true);
                } else {
                    // Non-fatal: retried on the next loop iteration.
                    warn!("cached benchmark submission failed; will retry");
                }
                return Ok(());
            }
        }

        self.run_fresh_benchmarks(cancel).await
    }

    /// Standalone retry path for a cache with unacknowledged entries.
    ///
    /// Mirrors the cached half of [`BenchmarkManager::update_benchmarks`]
    /// but never runs the cracker. Returns whether every cached result is
    /// now acknowledged.
    pub async fn try_submit_cached(&self) -> bool {
        let Some(mut cached) = load_cache(&self.runtime.paths().benchmark_cache) else {
            return false;
        };
        if all_submitted(&cached) {
            self.runtime.set_benchmarks_submitted(true);
            return true;
        }
        if self.submit_pending(&mut cached).await {
            self.runtime.set_benchmarks_submitted(true);
            return true;
        }
        false
    }

    /// Runs the cracker in benchmark mode, submitting in batches.
    async fn run_fresh_benchmarks(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), BenchmarkError> {
        self.runtime.set_current_activity(Activity::Benchmarking);
        let binary = resolve_cracker_binary(
            self.runtime.settings(),
            self.runtime.paths(),
            self.runtime.settings().always_use_native_hashcat,
        )?;
        let params = SessionParams::for_benchmark(
            &binary,
            self.runtime.paths(),
            self.runtime.settings().enable_additional_hash_types,
            self.backend_devices.clone(),
        );
        let mut session = CrackerSession::spawn(&params)?;
        if let Some(pid) = session.pid() {
            write_cracker_pid(&self.runtime.paths().cracker_pid_file, pid);
        }
        info!(binary = %binary.display(), "benchmark session started");

        let mut results: Vec<BenchmarkResult> = Vec::new();
        let mut pending_since_submit = 0usize;
        let outcome = loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    if let Err(err) = session.kill().await {
                        warn!(error = %err, "failed to kill benchmark session on cancellation");
                    }
                    session.cleanup().await;
                    clear_cracker_pid(&self.runtime.paths().cracker_pid_file);
                    return Err(BenchmarkError::Cancelled);
                }
                Some(line) = session.stdout_lines.recv() => {
                    if self.ingest_line(&line, &mut results) {
                        pending_since_submit += 1;
                        if pending_since_submit >= SUBMIT_BATCH_SIZE {
                            self.submit_pending(&mut results).await;
                            pending_since_submit = 0;
                        }
                    }
                }
                Some(line) = session.stderr_messages.recv() => {
                    self.reporter
                        .report(
                            Severity::Warning,
                            &format!("benchmark stderr: {line}"),
                            ReportContext::default(),
                        )
                        .await;
                }
                done = session.done.recv() => {
                    break done.flatten();
                }
            }
        };

        // Drain whatever the stdout pump buffered before the exit signal;
        // the pump closes the channel at EOF, which the process exit
        // guarantees.
        while let Some(line) = session.stdout_lines.recv().await {
            self.ingest_line(&line, &mut results);
        }
        self.submit_pending(&mut results).await;
        if let Err(err) = save_cache(&self.runtime.paths().benchmark_cache, &results) {
            warn!(error = %err, "failed to persist benchmark cache");
        }
        self.runtime
            .set_benchmarks_submitted(all_submitted(&results));

        session.cleanup().await;
        clear_cracker_pid(&self.runtime.paths().cracker_pid_file);

        match outcome {
            None => {
                info!(count = results.len(), "benchmark run complete");
                Ok(())
            }
            Some(err) => {
                let detail = err.to_string();
                self.reporter
                    .report(
                        Severity::Fatal,
                        &format!("benchmark run failed: {detail}"),
                        ReportContext::default(),
                    )
                    .await;
                Err(BenchmarkError::SessionFailed { detail })
            }
        }
    }

    /// Parses one stdout line into the result buffer. Returns whether a
    /// result was appended; unparseable lines are logged and skipped.
    fn ingest_line(&self, line: &str, results: &mut Vec<BenchmarkResult>) -> bool {
        match parse_benchmark_line(line) {
            Some(result) => {
                debug!(
                    device = result.device,
                    hash_type = result.hash_type,
                    speed_hs = result.speed_hs,
                    "benchmark result"
                );
                results.push(result);
                true
            }
            None => {
                debug!(line, "skipping non-benchmark output line");
                false
            }
        }
    }

    /// Submits every unacknowledged result in `results`.
    ///
    /// On acknowledgment the entries are marked submitted in memory and the
    /// cache is persisted immediately, before any further network call.
    /// Returns whether all results are now acknowledged.
    async fn submit_pending(&self, results: &mut [BenchmarkResult]) -> bool {
        let pending = unsubmitted_indices(results);
        if pending.is_empty() {
            return true;
        }
        let submissions: Vec<BenchmarkSubmission> = pending
            .iter()
            .map(|&i| BenchmarkSubmission {
                hash_type: results[i].hash_type,
                runtime: results[i].runtime_ms,
                hash_speed: results[i].speed_hs,
                device: results[i].device,
            })
            .collect();

        match self
            .api
            .submit_benchmarks(self.runtime.agent_id(), &submissions)
            .await
        {
            Ok(()) => {
                for &i in &pending {
                    results[i].submitted = true;
                }
                if let Err(err) = save_cache(&self.runtime.paths().benchmark_cache, results) {
                    // The submission stands; a lost cache only risks a
                    // redundant re-benchmark after restart.
                    warn!(error = %err, "failed to persist benchmark cache after submission");
                }
                debug!(count = pending.len(), "benchmark batch acknowledged");
                true
            }
            Err(err) => {
                warn!(error = %err, count = pending.len(), "benchmark submission failed");
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::api::{
        AgentConfiguration, AgentUpdate, ApiError, ApiResult, Attack, AuthResult, CrackAck,
        CrackSubmission, CrackerUpdate, ErrorSubmission, HeartbeatState, StatusAck, Task,
        TaskStatus,
    };
    use crate::settings::{RawSettings, Settings};

    /// API double recording benchmark submissions.
    #[derive(Default)]
    struct BenchApi {
        submissions: Mutex<Vec<Vec<BenchmarkSubmission>>>,
        fail_submit: AtomicBool,
        errors: Mutex<Vec<ErrorSubmission>>,
    }

    #[async_trait]
    impl CoordinatorApi for BenchApi {
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
        async fn submit_benchmarks(&self, _: i64, b: &[BenchmarkSubmission]) -> ApiResult<()> {
            if self.fail_submit.load(Ordering::SeqCst) {
                return Err(ApiError::Status {
                    operation: "submit_benchmarks",
                    status_code: 500,
                    message: "induced".to_string(),
                    body: String::new(),
                });
            }
            self.submissions.lock().unwrap().push(b.to_vec());
            Ok(())
        }
        async fn submit_error(&self, _: i64, report: &ErrorSubmission) -> ApiResult<()> {
            self.errors.lock().unwrap().push(report.clone());
            Ok(())
        }
        async fn send_shutdown(&self, _: i64) -> ApiResult<()> {
            unimplemented!()
        }
        async fn get_new_task(&self) -> ApiResult<Option<Task>> {
            unimplemented!()
        }
        async fn accept_task(&self, _: i64) -> ApiResult<()> {
            unimplemented!()
        }
        async fn set_task_exhausted(&self, _: i64) -> ApiResult<()> {
            unimplemented!()
        }
        async fn set_task_abandoned(&self, _: i64) -> ApiResult<()> {
            unimplemented!()
        }
        async fn submit_status(&self, _: i64, _: &TaskStatus) -> ApiResult<StatusAck> {
            unimplemented!()
        }
        async fn submit_crack(&self, _: i64, _: &CrackSubmission) -> ApiResult<CrackAck> {
            unimplemented!()
        }
        async fn get_zaps(&self, _: i64) -> ApiResult<Option<Vec<u8>>> {
            unimplemented!()
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
        api: Arc<BenchApi>,
        runtime: Arc<Runtime>,
        manager: BenchmarkManager,
    }

    fn fixture(force: bool) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let mut raw =
            RawSettings::with_defaults("http://c.test", "t", tmp.path().to_path_buf());
        raw.force_benchmark_run = force;
        let runtime = Arc::new(Runtime::new(Settings::resolve(raw)));
        runtime.paths().init().unwrap();
        runtime.set_agent_id(7);
        let api = Arc::new(BenchApi::default());
        let reporter = Arc::new(ErrorReporter::new(
            Arc::clone(&api) as Arc<dyn CoordinatorApi>,
            Arc::clone(&runtime),
        ));
        let manager = BenchmarkManager::new(
            Arc::clone(&api) as Arc<dyn CoordinatorApi>,
            Arc::clone(&runtime),
            reporter,
            None,
        );
        Fixture {
            _tmp: tmp,
            api,
            runtime,
            manager,
        }
    }

    fn cached(device: u32, submitted: bool) -> BenchmarkResult {
        BenchmarkResult {
            device,
            hash_type: 1000,
            runtime_ms: 100,
            hash_time_ms: 50.0,
            speed_hs: 12345.67,
            submitted,
        }
    }

    #[tokio::test]
    async fn test_fully_submitted_cache_short_circuits() {
        let fx = fixture(false);
        save_cache(
            &fx.runtime.paths().benchmark_cache,
            &[cached(1, true), cached(2, true)],
        )
        .unwrap();

        fx.manager
            .update_benchmarks(&CancellationToken::new())
            .await
            .unwrap();

        assert!(fx.runtime.benchmarks_submitted());
        assert!(fx.api.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_cache_submits_only_unsubmitted_and_persists() {
        let fx = fixture(false);
        let cache_path = fx.runtime.paths().benchmark_cache.clone();
        save_cache(&cache_path, &[cached(1, true), cached(2, false)]).unwrap();

        fx.manager
            .update_benchmarks(&CancellationToken::new())
            .await
            .unwrap();

        assert!(fx.runtime.benchmarks_submitted());
        let submissions = fx.api.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].len(), 1);
        assert_eq!(submissions[0][0].device, 2);

        // Both cache entries are now durably submitted.
        let reloaded = load_cache(&cache_path).unwrap();
        assert!(all_submitted(&reloaded));
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn test_cache_submission_failure_is_non_fatal() {
        let fx = fixture(false);
        let cache_path = fx.runtime.paths().benchmark_cache.clone();
        save_cache(&cache_path, &[cached(1, false)]).unwrap();
        fx.api.fail_submit.store(true, Ordering::SeqCst);

        // No error: the next loop iteration retries.
        fx.manager
            .update_benchmarks(&CancellationToken::new())
            .await
            .unwrap();

        assert!(!fx.runtime.benchmarks_submitted());
        let reloaded = load_cache(&cache_path).unwrap();
        assert!(!reloaded[0].submitted);
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_undo_submission() {
        let fx = fixture(false);
        // Make the cache path unwritable by occupying it with a directory.
        let cache_path = fx.runtime.paths().benchmark_cache.clone();
        std::fs::create_dir_all(&cache_path).unwrap();

        let mut results = vec![cached(1, false)];
        // The coordinator acknowledged, so the batch counts as submitted
        // even though the cache write fails.
        assert!(fx.manager.submit_pending(&mut results).await);
        assert!(all_submitted(&results));
        assert_eq!(fx.api.submissions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_try_submit_cached_without_cache_is_false() {
        let fx = fixture(false);
        assert!(!fx.manager.try_submit_cached().await);
        assert!(!fx.runtime.benchmarks_submitted());
    }

    #[tokio::test]
    async fn test_try_submit_cached_retries_pending_entries() {
        let fx = fixture(false);
        let cache_path = fx.runtime.paths().benchmark_cache.clone();
        save_cache(&cache_path, &[cached(1, false), cached(2, false)]).unwrap();

        assert!(fx.manager.try_submit_cached().await);
        assert!(fx.runtime.benchmarks_submitted());
        assert!(all_submitted(&load_cache(&cache_path).unwrap()));
    }

    #[tokio::test]
    async fn test_submit_pending_marks_and_persists_before_returning() {
        let fx = fixture(false);
        let mut results = vec![cached(1, false), cached(2, true), cached(3, false)];

        assert!(fx.manager.submit_pending(&mut results).await);
        assert!(all_submitted(&results));

        // The persisted cache reflects the in-memory marks.
        let reloaded = load_cache(&fx.runtime.paths().benchmark_cache).unwrap();
        assert!(all_submitted(&reloaded));

        // Only the two unsubmitted entries went over the wire.
        let submissions = fx.api.submissions.lock().unwrap();
        assert_eq!(submissions[0].len(), 2);
        let devices: Vec<u32> = submissions[0].iter().map(|s| s.device).collect();
        assert_eq!(devices, vec![1, 3]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fresh_run_parses_lines_and_sets_flag() {
        let fx = fixture(true);
        // A fake cracker emitting two machine-readable benchmark lines plus
        // noise.
        let script = "echo '1:0:CPU Device:100:50:12345.67'; \
                      echo 'not a benchmark line'; \
                      echo '1:1000:CPU Device:90:40:99999.5'";
        let fake = fx.runtime.paths().root.join("fake-hashcat");
        std::fs::write(&fake, format!("#!/bin/sh\n{script}\n")).unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        // Point resolution at the fake via the explicit setting.
        let mut raw = RawSettings::with_defaults(
            "http://c.test",
            "t",
            fx.runtime.paths().root.clone(),
        );
        raw.force_benchmark_run = true;
        raw.hashcat_path = Some(fake);
        let runtime = Arc::new(Runtime::new(Settings::resolve(raw)));
        runtime.paths().init().unwrap();
        runtime.set_agent_id(7);
        let reporter = Arc::new(ErrorReporter::new(
            Arc::clone(&fx.api) as Arc<dyn CoordinatorApi>,
            Arc::clone(&runtime),
        ));
        let manager = BenchmarkManager::new(
            Arc::clone(&fx.api) as Arc<dyn CoordinatorApi>,
            Arc::clone(&runtime),
            reporter,
            None,
        );

        manager
            .update_benchmarks(&CancellationToken::new())
            .await
            .unwrap();

        assert!(runtime.benchmarks_submitted());
        let reloaded = load_cache(&runtime.paths().benchmark_cache).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(all_submitted(&reloaded));
        assert_eq!(reloaded[0].hash_type, 0);
        assert_eq!(reloaded[1].hash_type, 1000);
    }
}
