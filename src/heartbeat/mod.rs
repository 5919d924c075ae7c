//! Heartbeat control channel with a capped exponential-backoff circuit
//! breaker.
//!
//! Each tick sends a heartbeat. Successes reset the consecutive-failure
//! counter and apply any coordinator-requested state change; failures grow
//! the delay until the multiplier cap is reached, so a dead coordinator is
//! probed at a bounded rate instead of hammered.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{CoordinatorApi, HeartbeatState};
use crate::state::{Activity, Runtime};

/// Delay before the next heartbeat tick.
///
/// `base * 2^min(failures, max_multiplier)`; negative inputs clamp to zero,
/// so they collapse to the base interval.
#[must_use]
pub fn heartbeat_delay(base: Duration, failures: i64, max_multiplier: i64) -> Duration {
    // Exponents past 63 already saturate the duration math, so the extra
    // clamp preserves the formula while keeping the cast lossless.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let exponent = failures.max(0).min(max_multiplier.max(0)).min(63) as u32;
    base.saturating_mul(2u32.saturating_pow(exponent))
}

/// The periodic control-channel probe.
pub struct HeartbeatLoop {
    api: Arc<dyn CoordinatorApi>,
    runtime: Arc<Runtime>,
    base_interval: Duration,
    max_multiplier: i64,
    shutdown: CancellationToken,
}

impl HeartbeatLoop {
    /// `base_interval` is the coordinator-provided update interval;
    /// `shutdown` is cancelled when the coordinator demands termination.
    #[must_use]
    pub fn new(
        api: Arc<dyn CoordinatorApi>,
        runtime: Arc<Runtime>,
        base_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let max_multiplier = i64::from(runtime.settings().max_heartbeat_backoff);
        Self {
            api,
            runtime,
            base_interval,
            max_multiplier,
            shutdown,
        }
    }

    /// Runs until `cancel` fires. Never returns an error: heartbeat
    /// failures only grow the probe delay.
    pub async fn run(self, cancel: CancellationToken) {
        let mut failures: i64 = 0;
        let mut stop_warned = false;
        loop {
            let delay = heartbeat_delay(self.base_interval, failures, self.max_multiplier);
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("heartbeat loop cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            match self.api.send_heartbeat(self.runtime.agent_id()).await {
                Ok(state) => {
                    failures = 0;
                    self.apply_state(state, &mut stop_warned);
                }
                Err(err) => {
                    failures += 1;
                    warn!(
                        error = %err,
                        consecutive_failures = failures,
                        next_delay_secs = heartbeat_delay(
                            self.base_interval,
                            failures,
                            self.max_multiplier
                        )
                        .as_secs(),
                        "heartbeat failed"
                    );
                }
            }
        }
    }

    /// Applies a coordinator-requested state change, consulting the current
    /// activity so a running benchmark or crack is never disturbed.
    fn apply_state(&self, state: Option<HeartbeatState>, stop_warned: &mut bool) {
        let activity = self.runtime.current_activity();
        match state {
            Some(HeartbeatState::Pending) => {
                if activity == Activity::Benchmarking {
                    debug!("pending state ignored while benchmarking");
                } else {
                    debug!("coordinator requested reload");
                    self.runtime.set_reload(true);
                }
                *stop_warned = false;
            }
            Some(HeartbeatState::Stopped) => {
                if activity == Activity::Cracking {
                    debug!("stopped state ignored while cracking");
                } else {
                    self.runtime.set_current_activity(Activity::Stopping);
                    self.runtime.set_job_checking_stopped(true);
                    if !*stop_warned {
                        warn!("coordinator stopped job checking for this agent");
                        *stop_warned = true;
                    }
                }
            }
            Some(HeartbeatState::Error) => {
                info!("coordinator reported error state, shutting down");
                self.shutdown.cancel();
                *stop_warned = false;
            }
            // Documented but unused by current coordinators.
            Some(HeartbeatState::Active) | None => {
                *stop_warned = false;
            }
        }
    }
}
