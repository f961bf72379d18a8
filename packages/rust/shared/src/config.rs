//! Application configuration for kanjigen.
//!
//! User config lives at `~/.kanjigen/kanjigen.toml`.
//! Precedence: CLI flags > environment variables > config file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KanjigenError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kanjigen.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kanjigen";

// ---------------------------------------------------------------------------
// BackendKind
// ---------------------------------------------------------------------------

/// Which external generation backend drives a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Claude,
    Codex,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = KanjigenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            other => Err(KanjigenError::config(format!(
                "unknown backend '{other}': expected 'claude' or 'codex'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Config structs (matching kanjigen.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Run defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Claude CLI backend.
    #[serde(default)]
    pub claude: ClaudeConfig,

    /// Codex CLI backend.
    #[serde(default)]
    pub codex: CodexConfig,

    /// Response extraction.
    #[serde(default)]
    pub extract: ExtractConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Durable job store location.
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Identity → grade enumeration used to initialise a fresh store.
    #[serde(default = "default_seed_path")]
    pub seed_path: String,

    /// Prompt template file (`{kanji}` placeholder). Built-in template if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,

    /// Backend used when none is given on the command line.
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Maximum simultaneously in-flight backend invocations.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between attempts of one item.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Reset failed items to pending before each run.
    #[serde(default)]
    pub requeue_failed: bool,

    /// Reject records that do not match the renderer's record shape.
    #[serde(default)]
    pub validate_shape: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            seed_path: default_seed_path(),
            prompt_template: None,
            backend: default_backend(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            requeue_failed: false,
            validate_shape: false,
        }
    }
}

fn default_store_path() -> String {
    "data/kanji_db_v2.json".into()
}
fn default_seed_path() -> String {
    "data/kyoiku_kanji_2020_by_grade.json".into()
}
fn default_backend() -> BackendKind {
    BackendKind::Claude
}
fn default_concurrency() -> usize {
    3
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    1000
}

/// `[claude]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeConfig {
    /// Executable name or path.
    #[serde(default = "default_claude_bin")]
    pub bin: String,

    /// Fixed arguments placed before the prompt.
    #[serde(default = "default_claude_args")]
    pub args: Vec<String>,

    /// Optional `--model` selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Per-attempt timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            bin: default_claude_bin(),
            args: default_claude_args(),
            model: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_claude_bin() -> String {
    "claude".into()
}
fn default_claude_args() -> Vec<String> {
    ["-p", "--output-format", "text", "--max-turns", "3"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_timeout_secs() -> u64 {
    180
}

/// `[codex]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodexConfig {
    /// Executable name or path.
    #[serde(default = "default_codex_bin")]
    pub bin: String,

    /// User-supplied arguments, pre-split. Takes precedence over `args_str`.
    #[serde(default)]
    pub args: Vec<String>,

    /// User-supplied arguments as one shell-style string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_str: Option<String>,

    /// Optional `-m` selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Per-attempt timeout; falls back to `claude.timeout_secs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Value passed to `exec -s`.
    #[serde(default = "default_sandbox")]
    pub sandbox: String,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            bin: default_codex_bin(),
            args: Vec::new(),
            args_str: None,
            model: None,
            timeout_secs: None,
            sandbox: default_sandbox(),
        }
    }
}

fn default_codex_bin() -> String {
    "codex".into()
}
fn default_sandbox() -> String {
    "read-only".into()
}

/// `[extract]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Enable the last-resort structural repair pass.
    #[serde(default = "default_true")]
    pub structural_repair: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            structural_repair: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Resolution helpers
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Per-attempt timeout for the given backend.
    pub fn timeout_for(&self, backend: BackendKind) -> Duration {
        let secs = match backend {
            BackendKind::Claude => self.claude.timeout_secs,
            BackendKind::Codex => self.codex.timeout_secs.unwrap_or(self.claude.timeout_secs),
        };
        Duration::from_secs(secs)
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides using `lookup` as the variable source.
    ///
    /// Empty values are treated as unset.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(kind) = get("KANJI_BACKEND").or_else(|| get("AGENT_TYPE")) {
            match kind.parse() {
                Ok(kind) => self.defaults.backend = kind,
                Err(e) => tracing::warn!(value = %kind, error = %e, "ignoring backend override"),
            }
        }

        if let Some(bin) = get("CLAUDE_BIN") {
            self.claude.bin = bin;
        }
        if let Some(model) = get("CLAUDE_MODEL") {
            self.claude.model = Some(model);
        }
        if let Some(secs) = get("CLAUDE_TIMEOUT_S") {
            match secs.trim().parse() {
                Ok(secs) => self.claude.timeout_secs = secs,
                Err(_) => tracing::warn!(value = %secs, "ignoring non-numeric CLAUDE_TIMEOUT_S"),
            }
        }

        if let Some(bin) = get("CODEX_BIN") {
            self.codex.bin = bin;
        }
        if let Some(model) = get("CODEX_MODEL") {
            self.codex.model = Some(model);
        }
        if let Some(secs) = get("CODEX_TIMEOUT_S") {
            match secs.trim().parse() {
                Ok(secs) => self.codex.timeout_secs = Some(secs),
                Err(_) => tracing::warn!(value = %secs, "ignoring non-numeric CODEX_TIMEOUT_S"),
            }
        }

        // A JSON list wins over the shell-style string, even when it is invalid.
        if let Some(json) = get("CODEX_ARGS_JSON") {
            self.codex.args_str = None;
            self.codex.args = match serde_json::from_str::<Vec<String>>(&json) {
                Ok(args) => args,
                Err(e) => {
                    tracing::warn!(error = %e, "CODEX_ARGS_JSON is not a list of strings, ignoring");
                    Vec::new()
                }
            };
        } else if let Some(args) = get("CODEX_ARGS") {
            self.codex.args.clear();
            self.codex.args_str = Some(args);
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kanjigen/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| KanjigenError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kanjigen/kanjigen.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KanjigenError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| KanjigenError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KanjigenError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| KanjigenError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KanjigenError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("store_path"));
        assert!(toml_str.contains("--max-turns"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.concurrency, 3);
        assert_eq!(parsed.defaults.max_retries, 2);
        assert_eq!(parsed.defaults.backend, BackendKind::Claude);
        assert_eq!(parsed.codex.sandbox, "read-only");
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
[defaults]
backend = "codex"
concurrency = 8

[codex]
args = ["--yolo"]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.backend, BackendKind::Codex);
        assert_eq!(config.defaults.concurrency, 8);
        assert_eq!(config.defaults.retry_delay_ms, 1000);
        assert_eq!(config.codex.args, vec!["--yolo".to_string()]);
        assert_eq!(config.claude.timeout_secs, 180);
        assert!(config.extract.structural_repair);
    }

    #[test]
    fn codex_timeout_falls_back_to_claude() {
        let mut config = AppConfig::default();
        config.claude.timeout_secs = 90;
        assert_eq!(config.timeout_for(BackendKind::Codex), Duration::from_secs(90));
        config.codex.timeout_secs = Some(30);
        assert_eq!(config.timeout_for(BackendKind::Codex), Duration::from_secs(30));
        assert_eq!(config.timeout_for(BackendKind::Claude), Duration::from_secs(90));
    }

    #[test]
    fn env_overrides_backend_and_timeouts() {
        let mut config = AppConfig::default();
        config.apply_env_from(env(&[
            ("AGENT_TYPE", "codex"),
            ("CLAUDE_TIMEOUT_S", "60"),
            ("CODEX_MODEL", "o4-mini"),
        ]));
        assert_eq!(config.defaults.backend, BackendKind::Codex);
        assert_eq!(config.claude.timeout_secs, 60);
        assert_eq!(config.codex.model.as_deref(), Some("o4-mini"));
    }

    #[test]
    fn kanji_backend_wins_over_agent_type() {
        let mut config = AppConfig::default();
        config.apply_env_from(env(&[("KANJI_BACKEND", "claude"), ("AGENT_TYPE", "codex")]));
        assert_eq!(config.defaults.backend, BackendKind::Claude);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_env_from(env(&[("KANJI_BACKEND", "gemini"), ("CLAUDE_TIMEOUT_S", "soon")]));
        assert_eq!(config.defaults.backend, BackendKind::Claude);
        assert_eq!(config.claude.timeout_secs, 180);
    }

    #[test]
    fn codex_args_json_wins_over_string() {
        let mut config = AppConfig::default();
        config.apply_env_from(env(&[
            ("CODEX_ARGS_JSON", r#"["--profile", "fast"]"#),
            ("CODEX_ARGS", "--yolo"),
        ]));
        assert_eq!(config.codex.args, vec!["--profile", "fast"]);
        assert!(config.codex.args_str.is_none());
    }

    #[test]
    fn invalid_codex_args_json_yields_empty_list() {
        let mut config = AppConfig::default();
        config.codex.args = vec!["--stale".into()];
        config.apply_env_from(env(&[("CODEX_ARGS_JSON", r#"{"not": "a list"}"#)]));
        assert!(config.codex.args.is_empty());
    }

    #[test]
    fn codex_args_string_is_kept_raw() {
        let mut config = AppConfig::default();
        config.apply_env_from(env(&[("CODEX_ARGS", "--profile 'my profile'")]));
        assert_eq!(config.codex.args_str.as_deref(), Some("--profile 'my profile'"));
    }

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!("Codex".parse::<BackendKind>().unwrap(), BackendKind::Codex);
        assert!("other".parse::<BackendKind>().is_err());
    }
}
