//! Infrastructure configuration - paths, logging and controller pacing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths used by the bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Allow-list of known participants, one name per line.
    /// Default: ./good_users.txt
    #[serde(default = "PathsConfig::default_allow_list")]
    pub allow_list: PathBuf,

    /// Base directory for runtime state (replay scripts, logs).
    /// Default: ~/.local/share/usher
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,
}

impl PathsConfig {
    fn default_allow_list() -> PathBuf {
        PathBuf::from("good_users.txt")
    }

    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/usher"))
            .unwrap_or_else(|| PathBuf::from(".local/share/usher"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            allow_list: Self::default_allow_list(),
            state_dir: Self::default_state_dir(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or EnvFilter directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Pacing and tolerance for the roster scan and the tick loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Full rescans attempted when fewer participants are read than the
    /// header count promised. Values below 1 are treated as 1.
    /// Default: 3
    #[serde(default = "ControllerConfig::default_mismatch_retries")]
    pub participant_count_mismatch_retries: u32,

    /// Only read the first page of the participant list.
    /// Default: false
    #[serde(default)]
    pub disable_participant_paging: bool,

    /// Upper bound on pages read in one scan.
    /// Default: 50
    #[serde(default = "ControllerConfig::default_max_pages")]
    pub max_pages: usize,

    /// Interval between ticks.
    /// Default: 5000
    #[serde(default = "ControllerConfig::default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Poll interval while waiting for a control to appear.
    /// Default: 250
    #[serde(default = "ControllerConfig::default_wait_poll_ms")]
    pub wait_poll_ms: u64,

    /// Ceiling for waiting on a control before the surface is declared gone.
    /// Default: 10000
    #[serde(default = "ControllerConfig::default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Meeting option polling: -1 reads once at startup, 0 every tick,
    /// otherwise at most once per this many seconds.
    /// Default: -1
    #[serde(default = "ControllerConfig::default_update_meeting_options_delay_secs")]
    pub update_meeting_options_delay_secs: i64,
}

impl ControllerConfig {
    fn default_mismatch_retries() -> u32 {
        3
    }

    fn default_max_pages() -> usize {
        50
    }

    fn default_tick_interval_ms() -> u64 {
        5000
    }

    fn default_wait_poll_ms() -> u64 {
        250
    }

    fn default_wait_timeout_ms() -> u64 {
        10_000
    }

    fn default_update_meeting_options_delay_secs() -> i64 {
        -1
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            participant_count_mismatch_retries: Self::default_mismatch_retries(),
            disable_participant_paging: false,
            max_pages: Self::default_max_pages(),
            tick_interval_ms: Self::default_tick_interval_ms(),
            wait_poll_ms: Self::default_wait_poll_ms(),
            wait_timeout_ms: Self::default_wait_timeout_ms(),
            update_meeting_options_delay_secs: Self::default_update_meeting_options_delay_secs(),
        }
    }
}
