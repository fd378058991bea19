//! Config file discovery, loading, merging, and environment variable overlay.

use crate::{AutomationFlags, ConfigError, UsherConfig};
use std::env;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Config files that exist, in load order: system, user, then either the
/// CLI path (when it exists) or `./usher.toml`.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/usher/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("usher/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("usher.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file as a raw table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Merge `overlay` into `base`. Nested tables merge key by key; any other
/// value in the overlay replaces the base value outright.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Turn a merged table into a config, filling defaults and expanding paths.
pub fn from_table(table: toml::Table, origin: Option<&Path>) -> Result<UsherConfig, ConfigError> {
    let mut config: UsherConfig =
        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: origin
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("<merged config>")),
                message: e.to_string(),
            })?;

    config.paths.allow_list = expand_path(&config.paths.allow_list.to_string_lossy());
    config.paths.state_dir = expand_path(&config.paths.state_dir.to_string_lossy());

    Ok(config)
}

/// Parse a single TOML document into a config.
pub fn parse_toml(contents: &str, path: &Path) -> Result<UsherConfig, ConfigError> {
    let table = parse_table(contents, path)?;
    from_table(table, Some(path))
}

fn env_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(
    config: &mut UsherConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    if let Ok(v) = env::var("USHER_ALLOW_LIST") {
        config.paths.allow_list = expand_path(&v);
        sources.env_overrides.push("USHER_ALLOW_LIST".to_string());
    }
    if let Ok(v) = env::var("USHER_STATE_DIR") {
        config.paths.state_dir = expand_path(&v);
        sources.env_overrides.push("USHER_STATE_DIR".to_string());
    }

    if let Ok(v) = env::var("USHER_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("USHER_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over USHER_LOG_LEVEL
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    if let Ok(v) = env::var("USHER_TICK_INTERVAL_MS") {
        if let Ok(ms) = v.parse() {
            config.controller.tick_interval_ms = ms;
            sources.env_overrides.push("USHER_TICK_INTERVAL_MS".to_string());
        }
    }

    // Comma separated flag names, e.g. USHER_FLAGS=admit_known,process_chat
    if let Ok(v) = env::var("USHER_FLAGS") {
        let names: Vec<String> = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        config.automation.flags =
            AutomationFlags::try_from(names).map_err(|message| ConfigError::Invalid {
                key: "USHER_FLAGS".to_string(),
                message,
            })?;
        sources.env_overrides.push("USHER_FLAGS".to_string());
    }
    if let Ok(v) = env::var("USHER_MY_NAME") {
        config.automation.my_participant_name = v;
        sources.env_overrides.push("USHER_MY_NAME".to_string());
    }
    if let Ok(v) = env::var("USHER_PAUSED") {
        if let Some(paused) = env_flag(&v) {
            config.automation.paused = paused;
            sources.env_overrides.push("USHER_PAUSED".to_string());
        }
    }

    Ok(())
}

/// Expand a leading `~/` or `$VAR` in a path. Unset variables are left as written.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        return match directories::BaseDirs::new() {
            Some(dirs) => dirs.home_dir().join(rest),
            None => PathBuf::from(path),
        };
    }
    if let Some(var_and_rest) = path.strip_prefix('$') {
        let (var, rest) = var_and_rest.split_once('/').unwrap_or((var_and_rest, ""));
        if let Ok(value) = env::var(var) {
            let base = PathBuf::from(value);
            return if rest.is_empty() { base } else { base.join(rest) };
        }
    }
    PathBuf::from(path)
}

fn stamp(files: &[PathBuf]) -> Vec<(PathBuf, Option<SystemTime>)> {
    files
        .iter()
        .map(|p| {
            let mtime = std::fs::metadata(p).and_then(|m| m.modified()).ok();
            (p.clone(), mtime)
        })
        .collect()
}

/// Detects config file changes by modification time and reloads on demand.
#[derive(Debug, Clone)]
pub struct ConfigWatch {
    cli_path: Option<PathBuf>,
    stamps: Vec<(PathBuf, Option<SystemTime>)>,
}

impl ConfigWatch {
    /// Start watching the files that produced `sources`.
    pub fn new(cli_path: Option<&Path>, sources: &ConfigSources) -> Self {
        Self {
            cli_path: cli_path.map(Path::to_path_buf),
            stamps: stamp(&sources.files),
        }
    }

    /// True if a config file appeared, vanished, or was modified.
    pub fn changed(&self) -> bool {
        let current = discover_config_files_with_override(self.cli_path.as_deref());
        stamp(&current) != self.stamps
    }

    /// Reload when something changed. Returns `None` if nothing did.
    pub fn reload(&mut self) -> Result<Option<(UsherConfig, ConfigSources)>, ConfigError> {
        if !self.changed() {
            return Ok(None);
        }
        let (config, sources) = UsherConfig::load_with_sources_from(self.cli_path.as_deref())?;
        self.stamps = stamp(&sources.files);
        Ok(Some((config, sources)))
    }
}
