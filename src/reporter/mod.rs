//! Error reporting: classify, log, and ship to the coordinator.
//!
//! Every component funnels failures through [`ErrorReporter::report`]. The
//! reporter logs with structured fields, then ships the error when an agent
//! id is known. Errors raised while shipping are logged only; the recursion
//! guard keeps a reporting failure from amplifying itself.
//!
//! Reporting deliberately ignores the shutdown cancellation token so that
//! diagnostics raised during shutdown still reach the coordinator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::api::{CoordinatorApi, ErrorMetadata, ErrorSubmission, Severity};
use crate::state::Runtime;

/// Optional classification attached to a shipped error.
#[derive(Debug, Clone, Default)]
pub struct ReportContext {
    /// Task the error belongs to, when any.
    pub task_id: Option<i64>,
    /// Classified category (stderr/exit classification), when available.
    pub category: Option<&'static str>,
    /// Whether the underlying condition is retryable, when classified.
    pub retryable: Option<bool>,
}

impl ReportContext {
    /// Context scoped to a task with no classification.
    #[must_use]
    pub fn for_task(task_id: i64) -> Self {
        Self {
            task_id: Some(task_id),
            ..Self::default()
        }
    }
}

/// Ships classified errors to the coordinator.
pub struct ErrorReporter {
    api: Arc<dyn CoordinatorApi>,
    runtime: Arc<Runtime>,
    in_flight: AtomicBool,
}

impl ErrorReporter {
    #[must_use]
    pub fn new(api: Arc<dyn CoordinatorApi>, runtime: Arc<Runtime>) -> Self {
        Self {
            api,
            runtime,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Logs `message` at a level matching `severity` and ships it to the
    /// coordinator. Never fails: shipping errors are logged and dropped.
    pub async fn report(&self, severity: Severity, message: &str, ctx: ReportContext) {
        match severity {
            Severity::Critical | Severity::Fatal => {
                error!(severity = %severity, task_id = ?ctx.task_id, message);
            }
            Severity::Major | Severity::Minor | Severity::Warning => {
                warn!(severity = %severity, task_id = ?ctx.task_id, message);
            }
            Severity::Info => {
                info!(severity = %severity, task_id = ?ctx.task_id, message);
            }
        }

        let agent_id = self.runtime.agent_id();
        if agent_id == 0 {
            // Not authenticated yet; nothing to address the report to.
            return;
        }

        // Recursion guard: an error raised while a report is in flight is
        // logged only.
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(message, "error raised while reporting; not shipped");
            return;
        }

        let mut other = json!({
            "platform": self.runtime.platform(),
            "version": self.runtime.agent_version(),
        });
        if let Some(category) = ctx.category {
            other["category"] = json!(category);
        }
        if let Some(retryable) = ctx.retryable {
            other["retryable"] = json!(retryable);
        }

        let submission = ErrorSubmission {
            message: message.to_string(),
            severity,
            agent_id,
            task_id: ctx.task_id,
            metadata: ErrorMetadata {
                error_date: Utc::now(),
                other,
            },
        };

        if let Err(err) = self.api.submit_error(agent_id, &submission).await {
            warn!(error = %err, "failed to ship error report");
        }

        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Logs an authentication-related failure with the fields an operator
    /// needs to debug credentials, then ships it.
    pub async fn report_auth_failure(&self, message: &str) {
        error!(
            api_url = %self.runtime.settings().api_url,
            has_token = !self.runtime.settings().api_token.is_empty(),
            message,
        );
        self.report(Severity::Fatal, message, ReportContext::default())
            .await;
    }
}
