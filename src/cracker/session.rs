//! Cracker process lifecycle and output multiplexing.
//!
//! A session spawns the cracker binary and exposes its output as five
//! unbounded channels: raw stdout lines, raw stderr lines, parsed status
//! blobs, cracked hashes tailed from the outfile, and a `done` channel that
//! carries exactly one message when the process terminates.
//!
//! The `Child` is owned by a dedicated wait task that also serves kill
//! requests, which makes [`CrackerSession::kill`] idempotent and safe to
//! call concurrently with normal completion.

use std::fmt;
use std::io::{self, ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::params::SessionParams;
use super::status::{CrackResult, HashcatStatus};

/// Poll cadence of the outfile tailer.
const OUTFILE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors produced by a cracker session.
#[derive(Debug)]
pub enum SessionError {
    /// The binary could not be started.
    Spawn {
        /// Binary that failed to start.
        binary: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Waiting on the process failed.
    Wait {
        /// Underlying error.
        source: io::Error,
    },
    /// The process exited with a non-zero code.
    Exit {
        /// Raw exit code.
        code: i32,
    },
    /// The process was terminated by a signal.
    Signal {
        /// Signal description.
        description: String,
    },
    /// A kill request could not be delivered.
    KillFailed {
        /// Failure detail.
        message: String,
    },
}

impl SessionError {
    /// Exit code when the process produced one; signal traps and other
    /// failures map to -1.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exit { code } => *code,
            _ => -1,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { binary, source } => {
                write!(f, "failed to spawn cracker {}: {source}", binary.display())
            }
            Self::Wait { source } => write!(f, "failed to wait on cracker: {source}"),
            // Downstream handling parses the "exit status N" text.
            Self::Exit { code } => write!(f, "cracker exited: exit status {code}"),
            Self::Signal { description } => {
                write!(f, "cracker terminated by signal: {description}")
            }
            Self::KillFailed { message } => write!(f, "failed to kill cracker: {message}"),
        }
    }
}

impl std::error::Error for SessionError {}

type KillRequest = oneshot::Sender<Result<(), String>>;

/// A running (or finished) cracker invocation.
///
/// State machine: unstarted → running → exited/killed → cleaned. Every exit
/// path must call [`CrackerSession::cleanup`], which is idempotent.
pub struct CrackerSession {
    /// Raw stdout lines, including the ones also parsed as status blobs.
    pub stdout_lines: mpsc::UnboundedReceiver<String>,
    /// Raw stderr lines.
    pub stderr_messages: mpsc::UnboundedReceiver<String>,
    /// Parsed status blobs.
    pub status_updates: mpsc::UnboundedReceiver<HashcatStatus>,
    /// Cracked hashes tailed from the outfile.
    pub cracked_hashes: mpsc::UnboundedReceiver<CrackResult>,
    /// Exactly one message: `None` for a clean exit, the error otherwise.
    pub done: mpsc::UnboundedReceiver<Option<SessionError>>,
    kill_tx: mpsc::UnboundedSender<KillRequest>,
    outfile: PathBuf,
    pid: Option<u32>,
    cleaned: bool,
}

impl CrackerSession {
    /// Spawns the cracker described by `params`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Spawn`] when the binary cannot be started.
    pub fn spawn(params: &SessionParams) -> Result<Self, SessionError> {
        Self::spawn_raw(&params.binary, params.to_args(), params.outfile.clone())
    }

    /// Spawns an arbitrary command with the session plumbing attached.
    pub(crate) fn spawn_raw(
        binary: &Path,
        args: Vec<String>,
        outfile: PathBuf,
    ) -> Result<Self, SessionError> {
        debug!(binary = %binary.display(), ?args, "spawning cracker");
        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                binary: binary.to_path_buf(),
                source,
            })?;
        let pid = child.id();

        let (stdout_tx, stdout_lines) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_messages) = mpsc::unbounded_channel();
        let (status_tx, status_updates) = mpsc::unbounded_channel();
        let (crack_tx, cracked_hashes) = mpsc::unbounded_channel();
        let (done_tx, done) = mpsc::unbounded_channel();
        let (kill_tx, mut kill_rx) = mpsc::unbounded_channel::<KillRequest>();
        let tail_cancel = CancellationToken::new();

        // Stdout pump: every line goes to stdout_lines; valid status blobs
        // are additionally routed to status_updates.
        if let Some(stdout) = child.stdout.take() {
            let stdout_tx = stdout_tx.clone();
            let status_tx = status_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(status) = HashcatStatus::parse_line(&line) {
                        let _ = status_tx.send(status);
                    }
                    let _ = stdout_tx.send(line);
                }
            });
        }

        // Stderr pump.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = stderr_tx.send(line);
                }
            });
        }

        // Outfile tailer: polls for appended complete lines and does one
        // final pass when the wait task cancels it.
        {
            let outfile = outfile.clone();
            let tail_cancel = tail_cancel.clone();
            tokio::spawn(async move {
                let mut offset: u64 = 0;
                let mut interval = tokio::time::interval(OUTFILE_POLL_INTERVAL);
                loop {
                    tokio::select! {
                        () = tail_cancel.cancelled() => {
                            tail_outfile(&outfile, &mut offset, &crack_tx).await;
                            break;
                        }
                        _ = interval.tick() => {
                            tail_outfile(&outfile, &mut offset, &crack_tx).await;
                        }
                    }
                }
            });
        }

        // Wait task: owns the child, serves kill requests, emits `done`.
        tokio::spawn(async move {
            let mut killed = false;
            loop {
                tokio::select! {
                    status = child.wait() => {
                        tail_cancel.cancel();
                        let _ = done_tx.send(exit_to_error(status));
                        break;
                    }
                    Some(ack) = kill_rx.recv() => {
                        let result = if killed {
                            Ok(())
                        } else {
                            match child.start_kill() {
                                Ok(()) => {
                                    killed = true;
                                    Ok(())
                                }
                                // Already exited between the request and the kill.
                                Err(e) if e.kind() == ErrorKind::InvalidInput => Ok(()),
                                Err(e) => Err(e.to_string()),
                            }
                        };
                        let _ = ack.send(result);
                    }
                }
            }
        });

        Ok(Self {
            stdout_lines,
            stderr_messages,
            status_updates,
            cracked_hashes,
            done,
            kill_tx,
            outfile,
            pid,
            cleaned: false,
        })
    }

    /// OS process id, when the process started successfully.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Path of the transient outfile.
    #[must_use]
    pub fn outfile(&self) -> &Path {
        &self.outfile
    }

    /// Requests termination of the cracker process.
    ///
    /// Idempotent: killing an already-finished session succeeds, and
    /// concurrent calls are serialized by the wait task.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::KillFailed`] when the OS refuses the kill.
    pub async fn kill(&self) -> Result<(), SessionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.kill_tx.send(ack_tx).is_err() {
            // Wait task already finished: the process is gone.
            return Ok(());
        }
        match ack_rx.await {
            Ok(Ok(())) | Err(_) => Ok(()),
            Ok(Err(message)) => Err(SessionError::KillFailed { message }),
        }
    }

    /// Releases OS resources and removes the transient outfile. Idempotent.
    pub async fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        if let Err(err) = self.kill().await {
            warn!(error = %err, "kill during cleanup failed");
        }
        match tokio::fs::remove_file(&self.outfile).await {
            Ok(()) => debug!(outfile = %self.outfile.display(), "outfile removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(outfile = %self.outfile.display(), error = %err, "failed to remove outfile");
            }
        }
    }
}

/// Reads newly appended complete lines from the outfile and forwards the
/// well-formed ones as cracks.
async fn tail_outfile(
    outfile: &Path,
    offset: &mut u64,
    crack_tx: &mpsc::UnboundedSender<CrackResult>,
) {
    let Ok(mut file) = tokio::fs::File::open(outfile).await else {
        return;
    };
    if file.seek(SeekFrom::Start(*offset)).await.is_err() {
        return;
    }
    let mut buf = String::new();
    if file.read_to_string(&mut buf).await.is_err() {
        return;
    }
    // Only consume complete lines; a partial trailing write is picked up on
    // the next poll.
    let consumed = match buf.rfind('\n') {
        Some(last_newline) => last_newline + 1,
        None => return,
    };
    for line in buf[..consumed].lines() {
        if line.is_empty() {
            continue;
        }
        match CrackResult::parse_line(line) {
            Some(crack) => {
                let _ = crack_tx.send(crack);
            }
            None => warn!(line, "skipping malformed outfile line"),
        }
    }
    *offset += consumed as u64;
}

/// Maps a process exit status onto the `done` payload.
fn exit_to_error(status: io::Result<ExitStatus>) -> Option<SessionError> {
    let status = match status {
        Ok(status) => status,
        Err(source) => return Some(SessionError::Wait { source }),
    };
    match status.code() {
        Some(0) => None,
        Some(code) => Some(SessionError::Exit { code }),
        None => Some(SessionError::Signal {
            description: signal_description(&status),
        }),
    }
}

#[cfg(unix)]
fn signal_description(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    status
        .signal()
        .map_or_else(|| "unknown signal".to_string(), |sig| format!("signal {sig}"))
}

#[cfg(not(unix))]
fn signal_description(_status: &ExitStatus) -> String {
    "unknown signal".to_string()
}
