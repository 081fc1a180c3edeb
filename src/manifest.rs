//! Configuration file parsing for nodewatch
//!
//! Parses `nodewatch.toml` using serde. Every field has a default, so a
//! missing or partial file still yields a usable configuration.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "nodewatch.toml";

/// Load configuration from a file
pub fn load(path: &Path) -> Result<NodewatchConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: NodewatchConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Load an explicit config file, or fall back to `nodewatch.toml` if present
///
/// An explicitly named file must exist. Without one, built-in defaults apply.
pub fn load_or_default(path: Option<&Path>) -> Result<NodewatchConfig> {
    match path {
        Some(path) => load(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                load(default_path)
            } else {
                tracing::debug!("no {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
                Ok(NodewatchConfig::default())
            }
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodewatchConfig {
    /// Escalation thresholds and polling cadence
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Batched reachability probe
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Remote power-cycle command
    #[serde(default)]
    pub actuator: ActuatorConfig,

    /// Session identity command
    #[serde(default)]
    pub session: SessionConfig,
}

impl NodewatchConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.watchdog.failure_limit == 0 {
            return Err(Error::ConfigValidation(
                "watchdog.failure_limit must be at least 1".into(),
            ));
        }

        if self.watchdog.interval == 0 {
            return Err(Error::ConfigValidation(
                "watchdog.interval must be at least 1 second".into(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for host in &self.watchdog.hosts {
            if host.trim().is_empty() {
                return Err(Error::ConfigValidation("Empty host name in watchdog.hosts".into()));
            }
            if !names.insert(host) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate host in watchdog.hosts: {}",
                    host
                )));
            }
        }

        for (section, program) in [
            ("probe", &self.probe.program),
            ("actuator", &self.actuator.program),
            ("session", &self.session.program),
        ] {
            if program.trim().is_empty() {
                return Err(Error::ConfigValidation(format!(
                    "{}.program must not be empty",
                    section
                )));
            }
        }

        Ok(())
    }
}

/// Escalation thresholds and polling cadence
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchdogConfig {
    /// Seconds between poll cycles
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Consecutive failed checks before the first reboot
    #[serde(default = "default_failure_limit")]
    pub failure_limit: u32,

    /// Failed checks after a reboot before rebooting again
    #[serde(default = "default_reboot_limit")]
    pub reboot_limit: u32,

    /// Log escalations without power cycling anything
    #[serde(default)]
    pub dry_run: bool,

    /// Restrict monitoring to these hosts (empty = every host the probe reports)
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl WatchdogConfig {
    /// Get interval as Duration
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            failure_limit: default_failure_limit(),
            reboot_limit: default_reboot_limit(),
            dry_run: false,
            hosts: Vec::new(),
        }
    }
}

fn default_interval() -> u64 {
    60
}

fn default_failure_limit() -> u32 {
    3
}

fn default_reboot_limit() -> u32 {
    5
}

/// Ansible ping probe settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Program to run
    #[serde(default = "default_probe_program")]
    pub program: String,

    /// Inventory file passed with `-i`
    #[serde(default = "default_inventory")]
    pub inventory: String,

    /// Host pattern to ping
    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Timeout in seconds
    #[serde(default = "default_probe_timeout")]
    pub timeout: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            program: default_probe_program(),
            inventory: default_inventory(),
            pattern: default_pattern(),
            timeout: default_probe_timeout(),
        }
    }
}

fn default_probe_program() -> String {
    "ansible".to_string()
}

fn default_inventory() -> String {
    "hosts.dcomp".to_string()
}

fn default_pattern() -> String {
    "all".to_string()
}

fn default_probe_timeout() -> u64 {
    120
}

/// Power-cycle command settings
///
/// The host name is appended after `args`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActuatorConfig {
    #[serde(default = "default_xdc")]
    pub program: String,

    #[serde(default = "default_actuator_args")]
    pub args: Vec<String>,

    #[serde(default = "default_actuator_timeout")]
    pub timeout: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            program: default_xdc(),
            args: default_actuator_args(),
            timeout: default_actuator_timeout(),
        }
    }
}

fn default_actuator_args() -> Vec<String> {
    vec!["power".to_string(), "cycle".to_string()]
}

fn default_actuator_timeout() -> u64 {
    60
}

/// Session identity command settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default = "default_xdc")]
    pub program: String,

    #[serde(default = "default_session_args")]
    pub args: Vec<String>,

    #[serde(default = "default_session_timeout")]
    pub timeout: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            program: default_xdc(),
            args: default_session_args(),
            timeout: default_session_timeout(),
        }
    }
}

fn default_xdc() -> String {
    "xdc".to_string()
}

fn default_session_args() -> Vec<String> {
    vec!["show".to_string(), "tunnel".to_string()]
}

fn default_session_timeout() -> u64 {
    30
}
