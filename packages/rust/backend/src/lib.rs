//! Generation backends for kanjigen.
//!
//! A backend turns a prompt into response text by running an external
//! command-line assistant, one process per call. Two variants exist:
//!
//! - [`ClaudeBackend`]: prompt on argv, response is plain stdout
//! - [`CodexBackend`]: prompt on stdin, response is pulled from a JSONL event stream
//!
//! Every invocation yields a [`RawResult`]. Only
//! [`InvokeFailure::ExecutableNotFound`] is fatal to a run; everything else is
//! retried by the caller.

pub mod claude;
pub mod codex;
pub mod launch;
pub mod process;

use std::future::Future;
use std::time::Duration;

use kanjigen_shared::{AppConfig, BackendKind};

pub use claude::ClaudeBackend;
pub use codex::CodexBackend;
pub use process::LaunchSpec;

/// Why a single invocation produced no usable response text.
///
/// The `Display` strings are stored verbatim as an item's `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeFailure {
    /// The backend executable could not be found.
    #[error("executable_not_found={program}")]
    ExecutableNotFound { program: String },

    /// The process exited with a non-zero status.
    #[error("exit_code={code}, stderr_tail={stderr_tail}")]
    NonZeroExit { code: i32, stderr_tail: String },

    /// The process exceeded its deadline and was killed.
    #[error("timeout_after={}s", .after.as_secs())]
    TimedOut { after: Duration },

    /// The process could not be started or waited on for another reason.
    #[error("spawn_failed: {message}")]
    Spawn { message: String },

    /// The process succeeded but its transcript held no assistant message.
    #[error("codex_no_agent_message, len={len}, tail={tail}")]
    MissingMessage { len: usize, tail: String },
}

impl InvokeFailure {
    /// Whether this failure means no further invocation can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ExecutableNotFound { .. })
    }
}

/// Outcome of one invocation: response text or a classified failure.
pub type RawResult = Result<String, InvokeFailure>;

/// A way of turning one prompt into raw response text.
///
/// Implementations spawn one process per call and must kill it when
/// `timeout` elapses. The returned future is `Send` so invocations can run
/// on spawned tasks.
pub trait Backend: Send + Sync {
    /// Short name used in logs (`claude`, `codex`, ...).
    fn name(&self) -> &'static str;

    /// Run the assistant once on `prompt`.
    fn invoke(&self, prompt: &str, timeout: Duration) -> impl Future<Output = RawResult> + Send;
}

// ---------------------------------------------------------------------------
// Configured backend
// ---------------------------------------------------------------------------

/// The backend selected by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredBackend {
    Claude(ClaudeBackend),
    Codex(CodexBackend),
}

impl Backend for ConfiguredBackend {
    fn name(&self) -> &'static str {
        match self {
            Self::Claude(b) => b.name(),
            Self::Codex(b) => b.name(),
        }
    }

    async fn invoke(&self, prompt: &str, timeout: Duration) -> RawResult {
        match self {
            Self::Claude(b) => b.invoke(prompt, timeout).await,
            Self::Codex(b) => b.invoke(prompt, timeout).await,
        }
    }
}

/// Build the backend for `kind` from the `[claude]` / `[codex]` config sections.
pub fn build_backend(kind: BackendKind, config: &AppConfig) -> ConfiguredBackend {
    match kind {
        BackendKind::Claude => ConfiguredBackend::Claude(ClaudeBackend::new(config.claude.clone())),
        BackendKind::Codex => ConfiguredBackend::Codex(CodexBackend::new(config.codex.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_messages_match_diagnostic_format() {
        let timeout = InvokeFailure::TimedOut {
            after: Duration::from_secs(180),
        };
        assert_eq!(timeout.to_string(), "timeout_after=180s");

        let exit = InvokeFailure::NonZeroExit {
            code: 2,
            stderr_tail: "bad flag\\n".into(),
        };
        assert_eq!(exit.to_string(), "exit_code=2, stderr_tail=bad flag\\n");

        let missing = InvokeFailure::MissingMessage {
            len: 12,
            tail: "{}".into(),
        };
        assert_eq!(missing.to_string(), "codex_no_agent_message, len=12, tail={}");
    }

    #[test]
    fn only_missing_executable_is_fatal() {
        assert!(InvokeFailure::ExecutableNotFound {
            program: "claude".into()
        }
        .is_fatal());
        assert!(!InvokeFailure::Spawn {
            message: "denied".into()
        }
        .is_fatal());
        assert!(!InvokeFailure::TimedOut {
            after: Duration::from_secs(1)
        }
        .is_fatal());
    }

    #[test]
    fn build_backend_honours_kind() {
        let config = AppConfig::default();
        assert_eq!(build_backend(BackendKind::Claude, &config).name(), "claude");
        assert_eq!(build_backend(BackendKind::Codex, &config).name(), "codex");
    }
}
