//! Shared types, error model, and configuration for kanjigen.
//!
//! This crate is the foundation depended on by all other kanjigen crates.
//! It provides:
//! - [`KanjigenError`]: the unified error type
//! - Domain types ([`WorkItem`], [`ItemState`], [`ItemEntry`], [`StoreMeta`], [`Record`])
//! - Configuration ([`AppConfig`], [`BackendKind`], config loading)

pub mod config;
pub mod error;
pub mod text;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackendKind, ClaudeConfig, CodexConfig, DefaultsConfig, ExtractConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{KanjigenError, Result};
pub use text::escaped_tail;
pub use types::{ItemEntry, ItemState, ItemStatus, Record, StoreMeta, WorkItem};
