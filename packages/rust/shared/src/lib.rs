//! Shared types, error model, and configuration for ReportHarvest.
//!
//! This crate is the foundation depended on by all other ReportHarvest crates.
//! It provides:
//! - [`HarvestError`]: the unified error type
//! - Domain types ([`WorkItem`], [`ItemOutcome`], [`RunProgress`], [`PassSummary`])
//! - Configuration ([`AppConfig`], [`HarvestSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, HarvestSettings, NetworkConfig, ReportConfig, RetryConfig, RunConfig,
    SettingsOverrides, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{HarvestError, Result};
pub use types::{ItemOutcome, ItemStage, PassKind, PassSummary, RunProgress, WorkItem};
