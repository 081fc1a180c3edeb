//! nodewatch - testbed node health watchdog
//!
//! Polls the testbed's nodes with a batched ansible ping and power cycles
//! the ones that stay unreachable, without rebooting a node again while it
//! is still coming back up.

mod cli;
mod error;
mod exec;
mod manifest;
mod session;
mod sickbay;
mod warden;

use cli::{Cli, Commands};
use error::Result;
use manifest::NodewatchConfig;
use session::Session;
use sickbay::probe::{AnsibleProbe, ReachabilityProbe};
use sickbay::recovery::{Actuator, RebootActuator};
use sickbay::{HealthMonitor, Limits};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "nodewatch=debug" } else { "nodewatch=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    match cli.command {
        // Commands that don't require config
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            Ok(())
        }

        Commands::Session { json } => {
            let config = manifest::load_or_default(cli.config.as_deref())?;
            let session = Session::detect(&config.session)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&session)?);
            } else {
                println!("Project:         {}", session.project);
                println!("Experiment:      {}", session.experiment);
                println!("Materialization: {}", session.materialization);
            }
            Ok(())
        }

        Commands::Probe { json } => {
            let config = manifest::load_or_default(cli.config.as_deref())?;
            probe(&config, json)
        }

        Commands::Reboot { host, dry_run } => {
            let config = manifest::load_or_default(cli.config.as_deref())?;
            if reboot(&config, &host, dry_run)? {
                println!("Power cycle issued for '{}'", host);
            }
            Ok(())
        }

        Commands::Watch {
            once,
            dry_run,
            interval,
            failure_limit,
            reboot_limit,
        } => {
            let mut config = manifest::load_or_default(cli.config.as_deref())?;

            // CLI flags override the file
            if let Some(interval) = interval {
                config.watchdog.interval = interval;
            }
            if let Some(limit) = failure_limit {
                config.watchdog.failure_limit = limit;
            }
            if let Some(limit) = reboot_limit {
                config.watchdog.reboot_limit = limit;
            }
            config.watchdog.dry_run |= dry_run;
            config.validate()?;

            watch(config, once)
        }
    }
}

/// Run one probe and print per-host status
fn probe(config: &NodewatchConfig, json: bool) -> Result<()> {
    let mut probe =
        AnsibleProbe::new(config.probe.clone()).with_hosts(config.watchdog.hosts.clone());
    let report = probe.probe()?;
    let unreachable = report.unreachable();

    if json {
        let value = serde_json::json!({
            "statuses": report.statuses,
            "unreachable": unreachable,
            "missing": report.missing,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{:<24} {:<16}", "HOST", "STATUS");
    println!("{}", "-".repeat(40));
    for (host, status) in &report.statuses {
        println!("{:<24} {:<16}", host, status);
    }
    for host in &report.missing {
        println!("{:<24} {:<16}", host, "-");
    }
    println!();
    if unreachable.is_empty() {
        println!("All {} hosts reachable", report.statuses.len());
    } else {
        println!(
            "{} of {} hosts unreachable",
            unreachable.len(),
            report.statuses.len()
        );
    }
    Ok(())
}

/// Power cycle one host; returns false when dry-run mode only logged it
fn reboot(config: &NodewatchConfig, host: &str, dry_run: bool) -> Result<bool> {
    let dry_run = dry_run || config.watchdog.dry_run;
    let mut actuator = Actuator::from_config(&config.actuator, dry_run);
    actuator.power_cycle(host)?;
    Ok(!dry_run)
}

/// Check the session, then run the watchdog loop
fn watch(config: NodewatchConfig, once: bool) -> Result<()> {
    // Refuse to start outside a materialization
    let session = Session::detect(&config.session)?;
    tracing::info!(%session, "connected");

    if config.watchdog.dry_run {
        tracing::info!("dry run: no node will be power cycled");
    }

    let probe = AnsibleProbe::new(config.probe.clone()).with_hosts(config.watchdog.hosts.clone());
    let actuator = Actuator::from_config(&config.actuator, config.watchdog.dry_run);
    let limits = Limits {
        failure_limit: config.watchdog.failure_limit,
        reboot_limit: config.watchdog.reboot_limit,
    };

    let monitor = HealthMonitor::new(probe, actuator, limits).with_session(session);
    let interval: Duration = config.watchdog.interval_duration();
    let mut warden = warden::Warden::new(monitor, interval);
    if once {
        warden = warden.with_max_cycles(1);
    }

    let rt = warden::runtime()?;
    let reason = rt.block_on(warden.run());
    tracing::debug!(?reason, cycles = warden.cycles(), "watchdog stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_xdc() -> NodewatchConfig {
        let mut config = NodewatchConfig::default();
        config.actuator.program = "/nonexistent/xdc".into();
        config
    }

    #[test]
    fn test_reboot_honors_config_dry_run() {
        let mut config = unreachable_xdc();
        config.watchdog.dry_run = true;
        assert!(!reboot(&config, "n1", false).unwrap());
    }

    #[test]
    fn test_reboot_flag_dry_run() {
        assert!(!reboot(&unreachable_xdc(), "n1", true).unwrap());
    }

    #[test]
    fn test_reboot_runs_actuator() {
        assert!(reboot(&unreachable_xdc(), "n1", false).is_err());
    }
}
