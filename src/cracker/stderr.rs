//! Stderr line classification.
//!
//! A pure first-match table: rows are evaluated in declaration order with
//! the most specific patterns first, so a line matches exactly one row and
//! the classification is deterministic.

use std::sync::LazyLock;

use regex::Regex;

use crate::api::Severity;

/// Category attached to classified cracker output and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    HashFormat,
    Device,
    FileAccess,
    Backend,
    Configuration,
    Retryable,
    Info,
    Warning,
    Unknown,
    Success,
    Exhausted,
    Aborted,
    CheckpointAbort,
    RuntimeAbort,
    Watchdog,
    SelfTest,
    Autotune,
    General,
}

impl ErrorCategory {
    /// Wire/metadata string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HashFormat => "hash_format",
            Self::Device => "device",
            Self::FileAccess => "file_access",
            Self::Backend => "backend",
            Self::Configuration => "configuration",
            Self::Retryable => "retryable",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Unknown => "unknown",
            Self::Success => "success",
            Self::Exhausted => "exhausted",
            Self::Aborted => "aborted",
            Self::CheckpointAbort => "checkpoint_abort",
            Self::RuntimeAbort => "runtime_abort",
            Self::Watchdog => "watchdog",
            Self::SelfTest => "self_test",
            Self::Autotune => "autotune",
            Self::General => "general",
        }
    }
}

/// A classified line or exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
}

/// Hash parse failures ("Hash 'x': Token length exception" and kin).
static HASH_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(
        r"(Token length exception|Separator unmatched|Signature unmatched|Hash-encoding exception|Salt-value exception|No hashes loaded)",
    )
    .unwrap();
    re
});

/// File-access failures reported by the cracker.
static FILE_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re =
        Regex::new(r"(No such file or directory|Permission denied|[Cc]annot open|Failed to open)")
            .unwrap();
    re
});

/// Classifies one stderr line.
///
/// Rows are matched in order, most specific first. The same input line
/// always produces the same classification.
#[must_use]
pub fn classify_stderr(line: &str) -> Classification {
    // Hash parse/format errors.
    if HASH_ERROR.is_match(line) {
        return Classification {
            category: ErrorCategory::HashFormat,
            severity: Severity::Critical,
            retryable: false,
        };
    }

    // Device memory exhaustion.
    if line.contains("Not enough allocatable device memory")
        || line.contains("Device memory allocation failed")
    {
        return Classification {
            category: ErrorCategory::Device,
            severity: Severity::Fatal,
            retryable: false,
        };
    }

    // Device warnings and hardware-monitor chatter.
    if line.contains("hwmon")
        || line.contains("Temperature limit")
        || (line.contains("Device #") && (line.contains("WARNING") || line.contains("skipped")))
    {
        return Classification {
            category: ErrorCategory::Device,
            severity: Severity::Warning,
            retryable: true,
        };
    }

    // Missing or unreadable files.
    if FILE_ERROR.is_match(line) {
        return Classification {
            category: ErrorCategory::FileAccess,
            severity: Severity::Critical,
            retryable: false,
        };
    }

    // Backend host-memory exhaustion.
    if line.contains("CL_OUT_OF_HOST_MEMORY")
        || line.contains("CL_OUT_OF_RESOURCES")
        || line.contains("CUDA_ERROR_OUT_OF_MEMORY")
    {
        return Classification {
            category: ErrorCategory::Backend,
            severity: Severity::Fatal,
            retryable: false,
        };
    }

    // Other backend API / driver failures.
    if line.contains("CL_")
        || line.contains("CUDA_ERROR")
        || line.contains("cuInit")
        || line.contains("hipInit")
        || line.contains("nvmlInit")
        || line.contains("ADL_")
    {
        return Classification {
            category: ErrorCategory::Backend,
            severity: Severity::Critical,
            retryable: false,
        };
    }

    // Bad arguments or options.
    if line.contains("Invalid argument")
        || line.contains("Invalid option")
        || line.contains("unrecognized option")
    {
        return Classification {
            category: ErrorCategory::Configuration,
            severity: Severity::Critical,
            retryable: false,
        };
    }

    // Corrupt restore file; cleared by the supervisor and retried.
    if line.contains("Restore file is corrupted") || line.contains("Incompatible restore") {
        return Classification {
            category: ErrorCategory::Retryable,
            severity: Severity::Minor,
            retryable: true,
        };
    }

    // Informational notices.
    if line.contains("Skipping invalid or unsupported") {
        return Classification {
            category: ErrorCategory::Info,
            severity: Severity::Info,
            retryable: true,
        };
    }
    if line.contains("Approaching final keyspace") {
        return Classification {
            category: ErrorCategory::Info,
            severity: Severity::Info,
            retryable: true,
        };
    }

    // Generic warnings.
    if line.starts_with("Warning:") {
        return Classification {
            category: ErrorCategory::Warning,
            severity: Severity::Minor,
            retryable: true,
        };
    }

    // Unmatched hard errors.
    if line.starts_with("ERROR:") {
        return Classification {
            category: ErrorCategory::Unknown,
            severity: Severity::Critical,
            retryable: false,
        };
    }

    Classification {
        category: ErrorCategory::Unknown,
        severity: Severity::Minor,
        retryable: true,
    }
}
