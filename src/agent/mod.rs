//! Top-level agent reconciliation loop.
//!
//! Startup: validate identity, claim the data directory, authenticate,
//! configure, announce metadata, start the heartbeat, submit initial
//! benchmarks. Then, once per update interval: honor reload requests, keep
//! the cracker current, and pull-and-run one task at a time until shutdown.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{AgentUpdate, ApiError, CoordinatorApi, HttpApiClient, Severity};
use crate::benchmark::{BenchmarkError, BenchmarkManager};
use crate::download::{DownloadError, Downloader};
use crate::heartbeat::HeartbeatLoop;
use crate::reporter::{ErrorReporter, ReportContext};
use crate::settings::Settings;
use crate::state::{Activity, LockFile, Runtime, StateError};
use crate::task::{TaskError, TaskManager};

/// Fatal startup failures; everything after startup is handled in-loop.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Missing or malformed identity configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The data directory could not be prepared.
    #[error("failed to prepare data directory: {0}")]
    DataDir(#[source] std::io::Error),

    /// Lock file or other state acquisition failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// The HTTP client could not be constructed.
    #[error("failed to build coordinator client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// A startup coordinator call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The coordinator rejected the token.
    #[error("coordinator rejected authentication")]
    AuthRejected,

    /// The initial benchmark pass failed.
    #[error(transparent)]
    Benchmark(#[from] BenchmarkError),
}

/// Validates the identity settings before any I/O happens.
///
/// # Errors
///
/// Returns [`AgentError::InvalidConfig`] for a missing token or an
/// unparseable coordinator URL.
pub fn validate_settings(settings: &Settings) -> Result<(), AgentError> {
    if settings.api_url.trim().is_empty() {
        return Err(AgentError::InvalidConfig(
            "api_url must be set".to_string(),
        ));
    }
    let url = Url::parse(&settings.api_url)
        .map_err(|err| AgentError::InvalidConfig(format!("api_url is not a valid URL: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AgentError::InvalidConfig(format!(
            "api_url must be http(s), got {}",
            url.scheme()
        )));
    }
    if settings.api_token.trim().is_empty() {
        return Err(AgentError::InvalidConfig(
            "api_token must be set".to_string(),
        ));
    }
    Ok(())
}

/// Runs the agent until shutdown. Returns `Ok(())` on graceful shutdown.
///
/// # Errors
///
/// Returns [`AgentError`] for fatal startup failures; after startup the
/// loop absorbs failures and keeps running.
pub async fn run(settings: Settings) -> Result<(), AgentError> {
    validate_settings(&settings)?;
    let runtime = Arc::new(Runtime::new(settings));
    runtime.paths().init().map_err(AgentError::DataDir)?;

    // Refuse to start next to another live agent; released on all exit
    // paths by the guard's drop.
    let _lock = LockFile::acquire(&runtime.paths().lock_file)?;

    let api: Arc<dyn CoordinatorApi> = Arc::new(
        HttpApiClient::new(
            &runtime.settings().api_url,
            &runtime.settings().api_token,
        )
        .map_err(AgentError::ClientBuild)?,
    );
    let reporter = Arc::new(ErrorReporter::new(Arc::clone(&api), Arc::clone(&runtime)));

    // Authenticate and learn our identity.
    let auth = match api.authenticate().await {
        Ok(auth) => auth,
        Err(err) => {
            reporter
                .report_auth_failure(&format!("authentication failed: {err}"))
                .await;
            return Err(err.into());
        }
    };
    if !auth.authenticated {
        reporter
            .report_auth_failure("coordinator rejected the agent token")
            .await;
        return Err(AgentError::AuthRejected);
    }
    runtime.set_agent_id(auth.agent_id);
    info!(agent_id = auth.agent_id, "authenticated");

    // Fetch configuration; the coordinator-provided interval drives both
    // the heartbeat base and the main loop cadence.
    let configuration = api.get_configuration().await?;
    let update_interval = configuration
        .config
        .agent_update_interval
        .filter(|&secs| secs > 0)
        .map_or(runtime.settings().heartbeat_interval, Duration::from_secs);
    debug!(
        api_version = configuration.api_version,
        interval_secs = update_interval.as_secs(),
        "configuration loaded"
    );

    let prefer_native = runtime.settings().always_use_native_hashcat
        || configuration.config.use_native_hashcat;

    // Metadata send precedes loop start; failure is logged, not fatal.
    let devices = detect_devices(&runtime, prefer_native).await;
    if let Err(err) = api
        .update_agent(runtime.agent_id(), &agent_metadata(&runtime, devices))
        .await
    {
        warn!(error = %err, "failed to send agent metadata");
    }

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    // Heartbeat runs for the life of the agent; its own cancellation is
    // separate from the shutdown request so a final heartbeat cannot race
    // the shutdown notification.
    let heartbeat_cancel = CancellationToken::new();
    let heartbeat = HeartbeatLoop::new(
        Arc::clone(&api),
        Arc::clone(&runtime),
        update_interval,
        shutdown.clone(),
    );
    let heartbeat_handle = tokio::spawn(heartbeat.run(heartbeat_cancel.clone()));

    let downloader = Downloader::new(runtime.settings())
        .map_err(|err| AgentError::InvalidConfig(err.to_string()))?;
    let benchmarks = BenchmarkManager::new(
        Arc::clone(&api),
        Arc::clone(&runtime),
        Arc::clone(&reporter),
        configuration.config.backend_devices.clone(),
    );

    // Initial benchmark submission precedes the first task fetch and is a
    // fatal startup failure when it cannot complete.
    match benchmarks.update_benchmarks(&shutdown).await {
        Ok(()) | Err(BenchmarkError::Cancelled) => {}
        Err(err) => return Err(err.into()),
    }
    runtime.set_current_activity(Activity::Waiting);

    let tasks = TaskManager::new(
        Arc::clone(&api),
        Arc::clone(&runtime),
        Arc::clone(&reporter),
        configuration.config.backend_devices.clone(),
        prefer_native,
    );

    info!("agent loop started");
    main_loop(MainLoop {
        api: Arc::clone(&api),
        runtime: Arc::clone(&runtime),
        reporter: Arc::clone(&reporter),
        benchmarks,
        tasks,
        downloader,
        update_interval,
        use_native_cracker: prefer_native,
        shutdown: shutdown.clone(),
    })
    .await;

    // Orderly shutdown: stop the heartbeat, then notify the coordinator.
    runtime.set_current_activity(Activity::Stopping);
    heartbeat_cancel.cancel();
    let _ = heartbeat_handle.await;
    if let Err(err) = api.send_shutdown(runtime.agent_id()).await {
        warn!(error = %err, "failed to send shutdown notification");
    }
    info!("agent stopped");
    Ok(())
}

/// Everything the main loop needs, bundled to keep the signature flat.
struct MainLoop {
    api: Arc<dyn CoordinatorApi>,
    runtime: Arc<Runtime>,
    reporter: Arc<ErrorReporter>,
    benchmarks: BenchmarkManager,
    tasks: TaskManager,
    downloader: Downloader,
    update_interval: Duration,
    use_native_cracker: bool,
    shutdown: CancellationToken,
}

/// One reconciliation pass per update interval until shutdown.
async fn main_loop(ctx: MainLoop) {
    loop {
        if ctx.shutdown.is_cancelled() {
            return;
        }

        if ctx.runtime.reload_requested() {
            reload(&ctx).await;
        }

        if !ctx.use_native_cracker {
            update_cracker(&ctx).await;
        }

        if !ctx.runtime.job_checking_stopped() && ctx.runtime.benchmarks_submitted() {
            run_one_task(&ctx).await;
        } else if !ctx.runtime.benchmarks_submitted() {
            // Standalone retry path for a cache with unacknowledged entries.
            if ctx.benchmarks.try_submit_cached().await {
                debug!("cached benchmarks submitted on retry");
            }
        }

        tokio::select! {
            () = ctx.shutdown.cancelled() => return,
            () = tokio::time::sleep(ctx.update_interval) => {}
        }
    }
}

/// Coordinator-requested reload: re-fetch configuration, re-run benchmarks,
/// clear the flag.
async fn reload(ctx: &MainLoop) {
    info!("reload requested");
    ctx.runtime.set_current_activity(Activity::Updating);

    match ctx.api.get_configuration().await {
        Ok(configuration) => {
            debug!(api_version = configuration.api_version, "configuration refreshed");
        }
        Err(err) => warn!(error = %err, "failed to refresh configuration"),
    }

    match ctx.benchmarks.update_benchmarks(&ctx.shutdown).await {
        Ok(()) => {}
        Err(BenchmarkError::Cancelled) => return,
        Err(err) => {
            ctx.reporter
                .report(
                    Severity::Fatal,
                    &format!("benchmark refresh failed: {err}"),
                    ReportContext::default(),
                )
                .await;
        }
    }

    ctx.runtime.set_reload(false);
    ctx.runtime.set_current_activity(Activity::Waiting);
}

/// Checks for and installs a coordinator-distributed cracker build.
async fn update_cracker(ctx: &MainLoop) {
    let version = installed_cracker_version(&ctx.runtime).await;
    match ctx
        .api
        .check_for_cracker_update(ctx.runtime.platform(), &version)
        .await
    {
        Ok(None) => debug!("no cracker update offered"),
        Ok(Some(update)) if update.available => {
            let Some(url) = update.download_url.as_deref() else {
                warn!("cracker update offered without a download URL");
                return;
            };
            ctx.runtime.set_current_activity(Activity::Updating);
            info!(
                latest = update.latest_version.as_deref().unwrap_or("unknown"),
                "downloading cracker update"
            );
            if let Err(err) = install_cracker_update(ctx, url, update.exec_name.as_deref()).await {
                ctx.reporter
                    .report(
                        Severity::Major,
                        &format!("cracker update failed: {err}"),
                        ReportContext::default(),
                    )
                    .await;
            }
            ctx.runtime.set_current_activity(Activity::Waiting);
        }
        Ok(Some(update)) => {
            debug!(message = ?update.message, "cracker is current");
        }
        Err(err) => warn!(error = %err, "cracker update check failed"),
    }
}

/// Downloads an update artifact and installs plain executables atomically.
/// Archives are left in `crackers/` for the operator; the agent does not
/// embed an extractor.
async fn install_cracker_update(
    ctx: &MainLoop,
    url: &str,
    exec_name: Option<&str>,
) -> Result<(), DownloadError> {
    let file_name = url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("cracker-update");
    let staging = ctx.runtime.paths().crackers.join(file_name);
    ctx.downloader.download_file(url, &staging, None).await?;

    let is_archive = ["7z", "zip", "gz", "xz"]
        .iter()
        .any(|ext| staging.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext)));
    if is_archive {
        warn!(
            path = %staging.display(),
            "cracker update is an archive; operator installation required"
        );
        return Ok(());
    }

    let target = ctx
        .runtime
        .paths()
        .crackers
        .join(exec_name.unwrap_or("hashcat"));
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(err) =
            std::fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o755))
        {
            warn!(error = %err, "failed to mark cracker update executable");
        }
    }
    tokio::fs::rename(&staging, &target)
        .await
        .map_err(|source| DownloadError::Io {
            path: target.clone(),
            source,
        })?;
    info!(binary = %target.display(), "cracker update installed");
    Ok(())
}

/// Asks the installed cracker for its version; best effort.
async fn installed_cracker_version(runtime: &Runtime) -> String {
    let Ok(binary) = crate::cracker::resolve_cracker_binary(
        runtime.settings(),
        runtime.paths(),
        runtime.settings().always_use_native_hashcat,
    ) else {
        return "unknown".to_string();
    };
    match tokio::process::Command::new(&binary)
        .arg("--version")
        .output()
        .await
    {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("unknown")
            .trim()
            .to_string(),
        _ => "unknown".to_string(),
    }
}

/// Fetch → attack → accept → download → run, absorbing failures with an
/// abandon-and-sleep.
async fn run_one_task(ctx: &MainLoop) {
    let task = match ctx.tasks.get_new_task().await {
        Ok(task) => task,
        Err(TaskError::NoTaskAvailable) => {
            debug!("no task available");
            return;
        }
        Err(TaskError::BenchmarksPending) => return,
        Err(err) => {
            warn!(error = %err, "task fetch failed");
            return;
        }
    };

    let attack = match ctx.tasks.get_attack_parameters(task.attack_id).await {
        Ok(attack) => attack,
        Err(err) => {
            ctx.reporter
                .report(
                    Severity::Critical,
                    &format!("failed to fetch attack parameters: {err}"),
                    ReportContext::for_task(task.id),
                )
                .await;
            ctx.tasks.abandon_task(&task).await;
            sleep_on_failure(ctx).await;
            return;
        }
    };

    if !ctx.tasks.accept_task(&task).await {
        // Someone else won the task; nothing to abandon.
        return;
    }

    ctx.runtime.set_current_activity(Activity::Downloading);
    let downloads = download_task_inputs(ctx, &attack).await;
    if let Err(err) = downloads {
        ctx.reporter
            .report(
                Severity::Fatal,
                &format!("failed to download task inputs: {err}"),
                ReportContext::for_task(task.id),
            )
            .await;
        ctx.tasks.abandon_task(&task).await;
        sleep_on_failure(ctx).await;
        return;
    }

    if let Err(err) = ctx.tasks.run_task(&ctx.shutdown, &task, &attack).await {
        ctx.reporter
            .report(
                Severity::Critical,
                &format!("task run failed: {err}"),
                ReportContext::for_task(task.id),
            )
            .await;
        ctx.tasks.abandon_task(&task).await;
        sleep_on_failure(ctx).await;
        return;
    }

    ctx.runtime.set_current_activity(Activity::Waiting);
}

/// Hash list plus every attack resource file.
async fn download_task_inputs(
    ctx: &MainLoop,
    attack: &crate::api::Attack,
) -> Result<(), DownloadError> {
    ctx.downloader
        .download_hash_list(attack, ctx.runtime.paths())
        .await?;
    ctx.downloader
        .download_attack_resources(attack, ctx.runtime.paths())
        .await?;
    Ok(())
}

async fn sleep_on_failure(ctx: &MainLoop) {
    let delay = ctx.runtime.settings().sleep_on_failure;
    debug!(secs = delay.as_secs(), "sleeping after failure");
    tokio::select! {
        () = ctx.shutdown.cancelled() => {}
        () = tokio::time::sleep(delay) => {}
    }
}

/// Metadata block pushed to the coordinator.
fn agent_metadata(runtime: &Runtime, devices: Vec<String>) -> AgentUpdate {
    AgentUpdate {
        id: runtime.agent_id(),
        host_name: hostname(),
        client_signature: format!("CipherSwarm Agent/{}", runtime.agent_version()),
        operating_system: runtime.platform().to_string(),
        devices,
    }
}

/// Asks the cracker for its compute devices; best effort.
///
/// The default technique uses `--backend-info`; the legacy flag falls back
/// to `-I`, which older builds answer more reliably.
async fn detect_devices(runtime: &Runtime, prefer_native: bool) -> Vec<String> {
    let Ok(binary) =
        crate::cracker::resolve_cracker_binary(runtime.settings(), runtime.paths(), prefer_native)
    else {
        warn!("no cracker binary found; sending metadata without devices");
        return Vec::new();
    };
    let probe_flag = if runtime.settings().use_legacy_device_technique {
        "-I"
    } else {
        "--backend-info"
    };
    let output = match tokio::process::Command::new(&binary)
        .args([probe_flag, "--quiet"])
        .output()
        .await
    {
        Ok(output) if output.status.success() => output.stdout,
        Ok(output) => {
            debug!(status = ?output.status, "device probe exited non-zero");
            return Vec::new();
        }
        Err(err) => {
            debug!(error = %err, "device probe failed to run");
            return Vec::new();
        }
    };
    parse_device_names(&String::from_utf8_lossy(&output))
}

/// Pulls device names out of `-I` / `--backend-info` output.
fn parse_device_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            if !trimmed.starts_with("Name") {
                return None;
            }
            let (_, value) = trimmed.split_once(':')?;
            let name = value.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

/// Best-effort hostname lookup without extra dependencies.
fn hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    if let Ok(name) = std::fs::read_to_string("/etc/hostname") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    "unknown".to_string()
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        shutdown.cancel();
                    }
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("interrupt received"),
                _ = term.recv() => info!("termination signal received"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received");
        }
        shutdown.cancel();
    });
}
