//! Configuration loading, validation, and env substitution.
//!
//! Config files: `taskhub.toml`, `taskhub.yaml`, or `taskhub.json`
//! Searched in `./` then `~/.config/taskhub/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values and
//! `TASKHUB_*` overrides for deployment-specific settings.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        CronsConfig, DatabaseConfig, FiresCronConfig, MetricsConfig, QueueStatsCronConfig,
        TaskhubConfig, ThrottleCronConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
