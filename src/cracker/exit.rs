//! Cracker exit-code classification.

use crate::api::Severity;

use super::stderr::{Classification, ErrorCategory};

/// Classifies a cracker exit code into a fixed (category, severity,
/// retryable) triple.
///
/// Explicit match arms are used for each documented code for documentation
/// purposes, even though some return the same value.
#[must_use]
#[allow(clippy::match_same_arms)]
pub fn classify_exit_code(code: i32) -> Classification {
    match code {
        // Cracked everything / clean finish.
        0 => Classification {
            category: ErrorCategory::Success,
            severity: Severity::Info,
            retryable: false,
        },
        // Keyspace fully searched without cracking the remaining hashes.
        1 => Classification {
            category: ErrorCategory::Exhausted,
            severity: Severity::Info,
            retryable: false,
        },
        // User or coordinator abort; the task may be rescheduled.
        2 => Classification {
            category: ErrorCategory::Aborted,
            severity: Severity::Warning,
            retryable: true,
        },
        // Abort at a checkpoint; restore data is intact.
        3 => Classification {
            category: ErrorCategory::CheckpointAbort,
            severity: Severity::Minor,
            retryable: true,
        },
        // Abort on the runtime limit.
        4 => Classification {
            category: ErrorCategory::RuntimeAbort,
            severity: Severity::Minor,
            retryable: true,
        },
        // GPU watchdog alarm.
        -2 => Classification {
            category: ErrorCategory::Watchdog,
            severity: Severity::Fatal,
            retryable: false,
        },
        // Backend runtime failure.
        -3 => Classification {
            category: ErrorCategory::Backend,
            severity: Severity::Fatal,
            retryable: false,
        },
        // Self-test failure.
        -4 => Classification {
            category: ErrorCategory::SelfTest,
            severity: Severity::Fatal,
            retryable: false,
        },
        // Autotune failure.
        -5 => Classification {
            category: ErrorCategory::Autotune,
            severity: Severity::Major,
            retryable: true,
        },
        // -1 and anything undocumented: general error.
        _ => Classification {
            category: ErrorCategory::General,
            severity: Severity::Critical,
            retryable: false,
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_zero_is_success() {
        let c = classify_exit_code(0);
        assert_eq!(c.category, ErrorCategory::Success);
        assert_eq!(c.severity, Severity::Info);
        assert!(!c.retryable);
    }

    #[test]
    fn test_exit_one_is_exhausted() {
        let c = classify_exit_code(1);
        assert_eq!(c.category, ErrorCategory::Exhausted);
        assert_eq!(c.severity, Severity::Info);
        assert!(!c.retryable);
    }

    #[test]
    fn test_abort_family() {
        assert_eq!(classify_exit_code(2).category, ErrorCategory::Aborted);
        assert!(classify_exit_code(2).retryable);
        assert_eq!(
            classify_exit_code(3).category,
            ErrorCategory::CheckpointAbort
        );
        assert!(classify_exit_code(3).retryable);
        assert_eq!(classify_exit_code(4).category, ErrorCategory::RuntimeAbort);
        assert!(classify_exit_code(4).retryable);
    }

    #[test]
    fn test_negative_codes() {
        assert_eq!(classify_exit_code(-1).category, ErrorCategory::General);
        assert_eq!(classify_exit_code(-1).severity, Severity::Critical);
        assert_eq!(classify_exit_code(-2).category, ErrorCategory::Watchdog);
        assert_eq!(classify_exit_code(-3).category, ErrorCategory::Backend);
        assert_eq!(classify_exit_code(-4).category, ErrorCategory::SelfTest);
        assert_eq!(classify_exit_code(-5).category, ErrorCategory::Autotune);
        assert!(classify_exit_code(-5).retryable);
    }

    #[test]
    fn test_unknown_codes_are_general_errors() {
        for code in [5, 99, -99, i32::MIN, i32::MAX] {
            let c = classify_exit_code(code);
            assert_eq!(c.category, ErrorCategory::General, "code {code}");
            assert!(!c.retryable);
        }
    }

    #[test]
    fn test_classification_is_deterministic() {
        for code in -10..10 {
            assert_eq!(classify_exit_code(code), classify_exit_code(code));
        }
    }
}
