//! Recovery actions for unreachable hosts
//!
//! The only recovery the watchdog knows is a remote power cycle, issued
//! through a [`RebootActuator`].

use crate::error::{Error, Result};
use crate::exec;
use crate::manifest::ActuatorConfig;

/// Something that can power-cycle a host
pub trait RebootActuator {
    /// Issue one power-cycle command for `host`
    fn power_cycle(&mut self, host: &str) -> Result<()>;
}

/// Power cycles hosts via `xdc power cycle <host>`
pub struct XdcActuator {
    config: ActuatorConfig,
}

impl XdcActuator {
    pub fn new(config: ActuatorConfig) -> Self {
        Self { config }
    }

    fn args(&self, host: &str) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.push(host.to_string());
        args
    }
}

impl RebootActuator for XdcActuator {
    fn power_cycle(&mut self, host: &str) -> Result<()> {
        let output = exec::run_with_timeout(&self.config.program, &self.args(host), self.config.timeout)
            .map_err(|e| Error::RebootFailed {
                host: host.to_string(),
                message: e.to_string(),
            })?;

        if !output.success() {
            return Err(Error::RebootFailed {
                host: host.to_string(),
                message: format!("{}: {}", output.summary(), output.combined().trim()),
            });
        }

        tracing::debug!(host, "power cycle command accepted");
        Ok(())
    }
}

/// Logs escalations instead of acting on them
#[derive(Debug, Default)]
pub struct DryRunActuator {
    issued: Vec<String>,
}

impl DryRunActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hosts that would have been power cycled, in order
    #[cfg(test)]
    pub fn issued(&self) -> &[String] {
        &self.issued
    }
}

impl RebootActuator for DryRunActuator {
    fn power_cycle(&mut self, host: &str) -> Result<()> {
        tracing::info!(host, "dry run: would power cycle");
        self.issued.push(host.to_string());
        Ok(())
    }
}

/// Actuator chosen at startup
pub enum Actuator {
    Xdc(XdcActuator),
    DryRun(DryRunActuator),
}

impl Actuator {
    /// Build the actuator for a config, honoring dry-run mode
    pub fn from_config(config: &ActuatorConfig, dry_run: bool) -> Self {
        if dry_run {
            Actuator::DryRun(DryRunActuator::new())
        } else {
            Actuator::Xdc(XdcActuator::new(config.clone()))
        }
    }
}

impl RebootActuator for Actuator {
    fn power_cycle(&mut self, host: &str) -> Result<()> {
        match self {
            Actuator::Xdc(a) => a.power_cycle(host),
            Actuator::DryRun(a) => a.power_cycle(host),
        }
    }
}
