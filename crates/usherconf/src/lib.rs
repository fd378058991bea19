//! Configuration loading for the usher meeting bot.
//!
//! # Configuration Philosophy
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`PathsConfig`, `TelemetryConfig`, `ControllerConfig`):
//!   where files live, how loud the logs are, how the roster scan is paced.
//!
//! - **Automation** (`AutomationConfig`): the policy the bot applies to
//!   participants and chat. It seeds the running session; admin chat
//!   commands can change it until the next reload.
//!
//! # Usage
//!
//! ```rust,no_run
//! use usherconf::UsherConfig;
//!
//! let config = UsherConfig::load().expect("Failed to load config");
//! println!("allow-list: {}", config.paths.allow_list.display());
//! println!("flags: {}", config.automation.flags);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/usher/config.toml` (system)
//! 2. `~/.config/usher/config.toml` (user)
//! 3. `./usher.toml` (local override, or the `--config` path)
//! 4. Environment variables (`USHER_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! allow_list = "~/usher/good_users.txt"
//!
//! [telemetry]
//! log_level = "usher=debug,info"
//!
//! [controller]
//! participant_count_mismatch_retries = 3
//! tick_interval_ms = 5000
//!
//! [automation]
//! flags = ["process_participants", "process_chat", "admit_known", "co_host_known"]
//! unknown_participant_wait_secs = 30
//! my_participant_name = "Usher"
//! waiting_room_announcement_message = "Welcome! The host will let you in shortly."
//! ```

pub mod automation;
pub mod infra;
pub mod loader;

pub use automation::{AutomationConfig, AutomationFlags};
pub use infra::{ControllerConfig, PathsConfig, TelemetryConfig};
pub use loader::{ConfigSources, ConfigWatch, discover_config_files_with_override, expand_path};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value in {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Complete bot configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UsherConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub automation: AutomationConfig,
}

impl UsherConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/usher/config.toml`
    /// 3. `~/.config/usher/config.toml`
    /// 4. `./usher.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./usher.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(merged, config_path)?;
        loader::apply_env_overrides(&mut config, &mut sources)?;

        Ok((config, sources))
    }

    /// Serialize config to a commented TOML template.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# Usher Configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "allow_list = \"{}\"\n",
            self.paths.allow_list.display()
        ));
        output.push_str(&format!(
            "state_dir = \"{}\"\n",
            self.paths.state_dir.display()
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        let c = &self.controller;
        output.push_str("\n[controller]\n");
        output.push_str(&format!(
            "participant_count_mismatch_retries = {}\n",
            c.participant_count_mismatch_retries
        ));
        output.push_str(&format!(
            "disable_participant_paging = {}\n",
            c.disable_participant_paging
        ));
        output.push_str(&format!("max_pages = {}\n", c.max_pages));
        output.push_str(&format!("tick_interval_ms = {}\n", c.tick_interval_ms));
        output.push_str(&format!("wait_poll_ms = {}\n", c.wait_poll_ms));
        output.push_str(&format!("wait_timeout_ms = {}\n", c.wait_timeout_ms));
        output.push_str("# -1 = read once, 0 = every tick, N = every N seconds\n");
        output.push_str(&format!(
            "update_meeting_options_delay_secs = {}\n",
            c.update_meeting_options_delay_secs
        ));

        let a = &self.automation;
        output.push_str("\n[automation]\n");
        output.push_str("flags = [\n");
        for name in a.flags.names() {
            output.push_str(&format!("    \"{}\",\n", name));
        }
        output.push_str("]\n");
        output.push_str(&format!(
            "unknown_participant_wait_secs = {}\n",
            a.unknown_participant_wait_secs
        ));
        output.push_str(&format!(
            "unknown_participant_throttle_secs = {}\n",
            a.unknown_participant_throttle_secs
        ));
        output.push_str(&format!(
            "my_participant_name = {:?}\n",
            a.my_participant_name
        ));
        output.push_str(&format!(
            "waiting_room_announcement_message = {:?}\n",
            a.waiting_room_announcement_message
        ));
        output.push_str(&format!(
            "waiting_room_announcement_delay_secs = {}\n",
            a.waiting_room_announcement_delay_secs
        ));
        output.push_str(&format!("paused = {}\n", a.paused));

        output
    }
}
