//! Claude CLI backend: prompt on argv, plain-text response on stdout.

use std::time::Duration;

use kanjigen_shared::ClaudeConfig;
use tracing::{debug, instrument};

use crate::launch::launch_prefix;
use crate::process::{self, LaunchSpec};
use crate::{Backend, RawResult};

/// Runs `claude -p --output-format text ... <prompt>` once per call.
#[derive(Debug, Clone)]
pub struct ClaudeBackend {
    config: ClaudeConfig,
}

impl ClaudeBackend {
    pub fn new(config: ClaudeConfig) -> Self {
        Self { config }
    }

    /// Command line for one prompt.
    pub fn launch_spec(&self, prompt: &str) -> LaunchSpec {
        let (program, mut args) = launch_prefix(&self.config.bin);
        args.extend(self.config.args.iter().cloned());
        if let Some(model) = &self.config.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        args.push(prompt.to_string());
        LaunchSpec {
            program,
            args,
            stdin: None,
        }
    }
}

impl Backend for ClaudeBackend {
    fn name(&self) -> &'static str {
        "claude"
    }

    #[instrument(skip_all, fields(backend = "claude", timeout_s = timeout.as_secs()))]
    async fn invoke(&self, prompt: &str, timeout: Duration) -> RawResult {
        let spec = self.launch_spec(prompt);
        let output = process::run(&spec, timeout).await?;
        debug!(len = output.stdout.len(), "claude response received");
        Ok(output.stdout)
    }
}
