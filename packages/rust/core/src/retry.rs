//! Bounded retry over one backend invocation plus extraction.

use std::time::Duration;

use kanjigen_backend::{Backend, InvokeFailure};
use kanjigen_extract::{Extractor, diagnostic_tail};
use kanjigen_shared::{Record, WorkItem};
use tracing::{debug, warn};

/// Characters of the diagnostic shown in retry log lines.
const LOG_ERROR_CHARS: usize = 80;

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Why an attempt (or an item) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The backend executable is missing. Fatal to the whole run.
    ExecutableNotFound,
    /// The backend exited with a non-zero status.
    NonZeroExit,
    /// The backend was killed after exceeding its deadline.
    TimedOut,
    /// The backend could not be started for another reason.
    SpawnFailed,
    /// The backend ran but no JSON object could be recovered.
    ExtractionFailed,
    /// A record was recovered but describes a different item or has the wrong shape.
    ValidationMismatch,
}

impl FailureKind {
    pub fn of(failure: &InvokeFailure) -> Self {
        match failure {
            InvokeFailure::ExecutableNotFound { .. } => Self::ExecutableNotFound,
            InvokeFailure::NonZeroExit { .. } => Self::NonZeroExit,
            InvokeFailure::TimedOut { .. } => Self::TimedOut,
            InvokeFailure::Spawn { .. } => Self::SpawnFailed,
            InvokeFailure::MissingMessage { .. } => Self::ExtractionFailed,
        }
    }

    /// Whether another attempt within the same run may help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::ExecutableNotFound | Self::ValidationMismatch)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutableNotFound => "executable_not_found",
            Self::NonZeroExit => "non_zero_exit",
            Self::TimedOut => "timed_out",
            Self::SpawnFailed => "spawn_failed",
            Self::ExtractionFailed => "extraction_failed",
            Self::ValidationMismatch => "validation_mismatch",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Policy and outcome
// ---------------------------------------------------------------------------

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_secs(1),
        }
    }
}

/// Result of running the retry loop for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptOutcome {
    /// The recovered record, if any attempt succeeded.
    pub record: Option<Record>,
    /// Diagnostic of the last failed attempt; empty on success.
    pub error: String,
    /// Number of invocations made.
    pub attempts: u32,
    /// Kind of the last failure; `None` on success.
    pub failure: Option<FailureKind>,
}

impl AttemptOutcome {
    /// The backend is unusable and the run must stop.
    pub fn is_fatal(&self) -> bool {
        self.failure == Some(FailureKind::ExecutableNotFound)
    }

    pub fn is_success(&self) -> bool {
        self.record.is_some()
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Invokes a backend up to `max_retries + 1` times until a record is extracted.
#[derive(Debug)]
pub struct RetryController {
    extractor: Extractor,
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(extractor: Extractor, policy: RetryPolicy) -> Self {
        Self { extractor, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Same extractor, different policy.
    pub fn with_policy(self, policy: RetryPolicy) -> Self {
        Self { policy, ..self }
    }

    /// Run the attempt loop for `item`.
    ///
    /// Identity validation of the returned record is left to the caller.
    pub async fn run<B: Backend>(
        &self,
        item: &WorkItem,
        backend: &B,
        prompt: &str,
        timeout: Duration,
    ) -> AttemptOutcome {
        let max_attempts = self.policy.max_retries + 1;
        let mut error = String::new();
        let mut failure = None;

        for attempt in 1..=max_attempts {
            let (kind, message) = match backend.invoke(prompt, timeout).await {
                Ok(text) => match self.extractor.extract(&text) {
                    Some(record) => {
                        debug!(id = %item.id, attempt, "record extracted");
                        return AttemptOutcome {
                            record: Some(record),
                            error: String::new(),
                            attempts: attempt,
                            failure: None,
                        };
                    }
                    None => (
                        FailureKind::ExtractionFailed,
                        format!(
                            "json_parse_failed, len={}, tail={}",
                            text.chars().count(),
                            diagnostic_tail(&text)
                        ),
                    ),
                },
                Err(e) => (FailureKind::of(&e), e.to_string()),
            };

            error = message;
            failure = Some(kind);

            if !kind.is_retryable() {
                warn!(id = %item.id, backend = backend.name(), error = %error, "attempt failed, not retrying");
                return AttemptOutcome {
                    record: None,
                    error,
                    attempts: attempt,
                    failure,
                };
            }

            if attempt < max_attempts {
                warn!(
                    id = %item.id,
                    attempt,
                    max_retries = self.policy.max_retries,
                    kind = %kind,
                    error = %truncate(&error, LOG_ERROR_CHARS),
                    "attempt failed, retrying"
                );
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        AttemptOutcome {
            record: None,
            error,
            attempts: max_attempts,
            failure,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
