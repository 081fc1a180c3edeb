//! The Warden - watchdog supervisor loop
//!
//! Runs [`HealthMonitor`] poll cycles back to back with a fixed sleep in
//! between. The sleep races Ctrl+C so an operator can stop the watchdog
//! between cycles; a cycle in progress always runs to completion.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::sickbay::monitor::{CycleReport, HealthMonitor};
use crate::sickbay::probe::ReachabilityProbe;
use crate::sickbay::recovery::RebootActuator;

/// Why the Warden loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Single-cycle mode finished
    Once,
    /// Operator interrupt
    Interrupted,
    /// Configured cycle budget exhausted
    CycleLimit,
}

/// Drives a health monitor on a fixed interval
pub struct Warden<P, A> {
    monitor: HealthMonitor<P, A>,
    interval: Duration,
    max_cycles: Option<u64>,
    cycles: u64,
}

impl<P: ReachabilityProbe, A: RebootActuator> Warden<P, A> {
    /// Create a Warden for a monitor
    pub fn new(monitor: HealthMonitor<P, A>, interval: Duration) -> Self {
        Self {
            monitor,
            interval,
            max_cycles: None,
            cycles: 0,
        }
    }

    /// Stop after this many cycles (1 = single pass)
    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = Some(max_cycles);
        self
    }

    /// Cycles completed so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn monitor(&self) -> &HealthMonitor<P, A> {
        &self.monitor
    }

    /// Run one cycle and count it
    pub fn tick(&mut self) -> CycleReport {
        self.cycles += 1;
        let report = self.monitor.poll_cycle();
        tracing::debug!(
            cycle = self.cycles,
            skipped = report.is_skipped(),
            escalations = report.escalations().len(),
            "cycle complete"
        );
        report
    }

    /// Run the supervisor loop until interrupted or the cycle budget is spent
    pub async fn run(&mut self) -> StopReason {
        let limits = self.monitor.limits();
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            failure_limit = limits.failure_limit,
            reboot_limit = limits.reboot_limit,
            "warden: starting node watchdog"
        );

        loop {
            self.tick();

            if let Some(max) = self.max_cycles {
                if self.cycles >= max {
                    return if max == 1 {
                        StopReason::Once
                    } else {
                        StopReason::CycleLimit
                    };
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "failed to listen for Ctrl+C, stopping");
                    }
                    self.log_shutdown();
                    return StopReason::Interrupted;
                }
            }
        }
    }

    fn log_shutdown(&self) {
        tracing::info!(cycles = self.cycles, "warden: shutting down");
        for state in self.monitor().ledger().iter() {
            tracing::info!(
                host = %state.host,
                failures = state.failure_count(),
                rebooting = state.is_rebooting(),
                waited = state.reboot_wait_count(),
                "dropping in-memory state"
            );
        }
    }
}

/// Build a single-threaded runtime for the Warden loop
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .enable_io()
        .build()
        .map_err(|e| Error::Io(std::io::Error::other(e)))
}
