//! Codex CLI backend: prompt on stdin, response pulled from the `--json`
//! event stream.
//!
//! `codex exec --json` prints one JSON event per line. The response is the
//! text of the last completed `agent_message` item, or the `output_text` of a
//! `response.completed` event, whichever appears last.

use std::time::Duration;

use kanjigen_shared::{CodexConfig, escaped_tail};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::launch::{has_approval_override, launch_prefix, user_args};
use crate::process::{self, LaunchSpec};
use crate::{Backend, InvokeFailure, RawResult};

/// Characters of stdout kept when no message could be found.
const TRANSCRIPT_TAIL_CHARS: usize = 300;

/// Runs `codex [args] -a never exec -s <sandbox> --skip-git-repo-check --json -`.
#[derive(Debug, Clone)]
pub struct CodexBackend {
    config: CodexConfig,
}

impl CodexBackend {
    pub fn new(config: CodexConfig) -> Self {
        Self { config }
    }

    /// Command line for one prompt. The prompt itself travels on stdin.
    pub fn launch_spec(&self, prompt: &str) -> LaunchSpec {
        let (program, mut args) = launch_prefix(&self.config.bin);

        let extra = user_args(&self.config.args, self.config.args_str.as_deref());
        let approval_set = has_approval_override(&extra);
        args.extend(extra);
        if !approval_set {
            args.extend(["-a".to_string(), "never".to_string()]);
        }

        args.extend([
            "exec".to_string(),
            "-s".to_string(),
            self.config.sandbox.clone(),
            "--skip-git-repo-check".to_string(),
            "--json".to_string(),
        ]);
        if let Some(model) = &self.config.model {
            args.push("-m".into());
            args.push(model.clone());
        }
        args.push("-".into());

        LaunchSpec {
            program,
            args,
            stdin: Some(prompt.to_string()),
        }
    }
}

impl Backend for CodexBackend {
    fn name(&self) -> &'static str {
        "codex"
    }

    #[instrument(skip_all, fields(backend = "codex", timeout_s = timeout.as_secs()))]
    async fn invoke(&self, prompt: &str, timeout: Duration) -> RawResult {
        let spec = self.launch_spec(prompt);
        let output = process::run(&spec, timeout).await?;

        match extract_agent_message(&output.stdout) {
            Some(message) => {
                debug!(len = message.len(), "codex agent message received");
                Ok(message)
            }
            None => Err(InvokeFailure::MissingMessage {
                len: output.stdout.chars().count(),
                tail: escaped_tail(&output.stdout, TRANSCRIPT_TAIL_CHARS),
            }),
        }
    }
}

/// Last non-empty assistant message in a `--json` transcript.
///
/// Lines that are not JSON objects are skipped.
pub fn extract_agent_message(transcript: &str) -> Option<String> {
    let mut last = None;

    for line in transcript.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        let text = match event.get("type").and_then(Value::as_str) {
            Some("item.completed") => event
                .get("item")
                .filter(|item| item.get("type").and_then(Value::as_str) == Some("agent_message"))
                .and_then(|item| item.get("text")),
            Some("response.completed") => event
                .get("response")
                .and_then(|response| response.get("output_text")),
            _ => None,
        };
        if let Some(text) = text.and_then(Value::as_str).filter(|t| !t.is_empty()) {
            last = Some(text.to_string());
        }
    }

    last
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CodexConfig {
        CodexConfig {
            bin: "kanjigen-no-such-codex".into(),
            ..CodexConfig::default()
        }
    }

    #[test]
    fn default_command_line() {
        let spec = CodexBackend::new(config()).launch_spec("山");
        assert_eq!(
            spec.args,
            vec![
                "-a",
                "never",
                "exec",
                "-s",
                "read-only",
                "--skip-git-repo-check",
                "--json",
                "-"
            ]
        );
        assert_eq!(spec.stdin.as_deref(), Some("山"));
    }

    #[test]
    fn user_approval_flag_suppresses_default() {
        let mut cfg = config();
        cfg.args_str = Some("--yolo".into());
        cfg.model = Some("o4-mini".into());
        let spec = CodexBackend::new(cfg).launch_spec("山");
        assert_eq!(spec.args[0], "--yolo");
        assert!(!spec.args.contains(&"never".to_string()));
        let n = spec.args.len();
        assert_eq!(spec.args[n - 3..], ["-m", "o4-mini", "-"]);
    }

    #[test]
    fn picks_last_agent_message() {
        let transcript = r#"
{"type":"thread.started"}
{"type":"item.completed","item":{"type":"reasoning","text":"thinking"}}
{"type":"item.completed","item":{"type":"agent_message","text":"first"}}
not json at all
{"type":"item.completed","item":{"type":"agent_message","text":"{\"kanji\":\"山\"}"}}
{"type":"turn.completed"}
"#;
        assert_eq!(
            extract_agent_message(transcript).as_deref(),
            Some(r#"{"kanji":"山"}"#)
        );
    }

    #[test]
    fn response_completed_output_text_counts() {
        let transcript = concat!(
            r#"{"type":"item.completed","item":{"type":"agent_message","text":"early"}}"#,
            "\n",
            r#"{"type":"response.completed","response":{"output_text":"final"}}"#,
        );
        assert_eq!(extract_agent_message(transcript).as_deref(), Some("final"));
    }

    #[test]
    fn empty_messages_are_ignored() {
        let transcript = r#"{"type":"item.completed","item":{"type":"agent_message","text":""}}"#;
        assert_eq!(extract_agent_message(transcript), None);
        assert_eq!(extract_agent_message(""), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn transcript_without_message_is_reported() {
        let backend = CodexBackend::new(CodexConfig {
            bin: "true".into(),
            ..CodexConfig::default()
        });
        let err = backend.invoke("山", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, InvokeFailure::MissingMessage { len: 0, .. }));
    }
}
