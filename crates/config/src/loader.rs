use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::TaskhubConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "taskhub.toml",
    "taskhub.yaml",
    "taskhub.yml",
    "taskhub.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<TaskhubConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./taskhub.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/taskhub/taskhub.{toml,yaml,yml,json}` (user-global)
///
/// Returns `TaskhubConfig::default()` if no config file is found. Env overrides
/// are applied in every case.
pub fn discover_and_load() -> TaskhubConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                TaskhubConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            TaskhubConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    config
}

/// Apply `TASKHUB_INSTANCE_ID`, `TASKHUB_DATABASE_URL` and `TASKHUB_REDIS_URL`.
pub fn apply_env_overrides(config: &mut TaskhubConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut TaskhubConfig, lookup: impl Fn(&str) -> Option<String>) {
    let lookup = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(id) = lookup("TASKHUB_INSTANCE_ID") {
        config.instance_id = Some(id);
    }
    if let Some(url) = lookup("TASKHUB_DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(url) = lookup("TASKHUB_REDIS_URL") {
        config.redis_url = Some(url);
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/taskhub/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "taskhub").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<TaskhubConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
