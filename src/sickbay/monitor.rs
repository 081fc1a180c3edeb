//! Node health monitor
//!
//! Drives one poll cycle at a time: take a reachability snapshot, fold it
//! into the [`HostLedger`], and power cycle whatever the ledger escalates.

use crate::session::Session;
use crate::sickbay::ledger::{Escalation, EscalationKind, HostLedger, Limits};
use crate::sickbay::probe::ReachabilityProbe;
use crate::sickbay::recovery::RebootActuator;
use serde::Serialize;
use std::collections::BTreeSet;

/// Outcome of a single poll cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CycleReport {
    /// The probe failed; nothing changed
    Skipped { reason: String },
    /// A snapshot was applied
    Observed {
        unreachable: BTreeSet<String>,
        /// Hosts with no data this cycle, left untouched
        missing: BTreeSet<String>,
        escalations: Vec<Escalation>,
        /// Hosts whose power-cycle command failed this cycle
        failed_reboots: Vec<String>,
    },
}

impl CycleReport {
    pub fn is_skipped(&self) -> bool {
        matches!(self, CycleReport::Skipped { .. })
    }

    /// Escalations issued this cycle (none when skipped)
    pub fn escalations(&self) -> &[Escalation] {
        match self {
            CycleReport::Skipped { .. } => &[],
            CycleReport::Observed { escalations, .. } => escalations,
        }
    }
}

/// Watches a host set and escalates persistently unreachable hosts to a reboot
pub struct HealthMonitor<P, A> {
    probe: P,
    actuator: A,
    limits: Limits,
    ledger: HostLedger,
    session: Option<Session>,
}

impl<P: ReachabilityProbe, A: RebootActuator> HealthMonitor<P, A> {
    pub fn new(probe: P, actuator: A, limits: Limits) -> Self {
        Self {
            probe,
            actuator,
            limits,
            ledger: HostLedger::new(),
            session: None,
        }
    }

    /// Attach the session, used to log fully qualified node names
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn ledger(&self) -> &HostLedger {
        &self.ledger
    }

    #[cfg(test)]
    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Run one poll cycle
    ///
    /// Never returns an error: a failed probe skips the cycle and a failed
    /// reboot is logged against its host only.
    pub fn poll_cycle(&mut self) -> CycleReport {
        let report = match self.probe.probe() {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    tracked = self.ledger.len(),
                    "reachability check failed, leaving host state unchanged"
                );
                return CycleReport::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        let unreachable = report.unreachable();
        let escalations = self.ledger.observe(&unreachable, &report.missing, self.limits);

        let mut failed_reboots = Vec::new();
        for escalation in &escalations {
            if !self.escalate(escalation) {
                failed_reboots.push(escalation.host.clone());
            }
        }

        self.log_state();

        CycleReport::Observed {
            unreachable,
            missing: report.missing,
            escalations,
            failed_reboots,
        }
    }

    /// Issue the reboot for one escalation; the ledger has already moved on
    fn escalate(&mut self, escalation: &Escalation) -> bool {
        let host = escalation.host.as_str();
        let name = self.qualified(host);

        match escalation.kind {
            EscalationKind::Initial => {
                tracing::warn!(
                    host,
                    node = %name,
                    failures = self.limits.failure_limit,
                    "restarting host"
                );
            }
            EscalationKind::Repeat { waited } => {
                tracing::warn!(
                    host,
                    node = %name,
                    checks = waited,
                    "host hasn't come back after reboot, rebooting again"
                );
            }
        }

        match self.actuator.power_cycle(host) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(host, error = %e, "error rebooting node");
                false
            }
        }
    }

    fn qualified(&self, host: &str) -> String {
        match &self.session {
            Some(session) => session.qualify(host),
            None => host.to_string(),
        }
    }

    fn log_state(&self) {
        if self.ledger.is_empty() {
            tracing::info!("all hosts are fine");
            return;
        }

        let failing = self.ledger.failing();
        if !failing.is_empty() {
            tracing::warn!(hosts = ?failing, "bad hosts");
        }

        let rebooting = self.ledger.rebooting();
        if !rebooting.is_empty() {
            tracing::warn!(hosts = ?rebooting, "nodes rebooting");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::manifest::ProbeConfig;
    use crate::sickbay::probe::{AnsibleProbe, ProbeReport};
    use crate::sickbay::recovery::DryRunActuator;
    use std::collections::VecDeque;

    /// Plays back a fixed sequence of probe results
    struct ScriptedProbe {
        rounds: VecDeque<Result<ProbeReport>>,
    }

    impl ScriptedProbe {
        fn new() -> Self {
            Self {
                rounds: VecDeque::new(),
            }
        }

        /// Queue a round where `down` are unreachable and `up` answered
        fn round(mut self, up: &[&str], down: &[&str]) -> Self {
            let statuses = up
                .iter()
                .map(|h| (*h, "SUCCESS"))
                .chain(down.iter().map(|h| (*h, "UNREACHABLE!")));
            self.rounds.push_back(Ok(ProbeReport::from_statuses(statuses)));
            self
        }

        fn rounds(mut self, n: usize, up: &[&str], down: &[&str]) -> Self {
            for _ in 0..n {
                self = self.round(up, down);
            }
            self
        }

        fn failure(mut self) -> Self {
            self.rounds
                .push_back(Err(Error::ProbeFailed("ssh: connection refused".into())));
            self
        }
    }

    impl ReachabilityProbe for ScriptedProbe {
        fn probe(&mut self) -> Result<ProbeReport> {
            self.rounds
                .pop_front()
                .unwrap_or_else(|| Err(Error::ProbeFailed("script exhausted".into())))
        }
    }

    /// Records reboots and fails for selected hosts
    #[derive(Default)]
    struct FlakyActuator {
        issued: Vec<String>,
        broken: Vec<String>,
    }

    impl RebootActuator for FlakyActuator {
        fn power_cycle(&mut self, host: &str) -> Result<()> {
            self.issued.push(host.to_string());
            if self.broken.iter().any(|h| h == host) {
                return Err(Error::RebootFailed {
                    host: host.to_string(),
                    message: "exit 1".into(),
                });
            }
            Ok(())
        }
    }

    fn limits(failure_limit: u32, reboot_limit: u32) -> Limits {
        Limits {
            failure_limit,
            reboot_limit,
        }
    }

    fn run(monitor: &mut HealthMonitor<ScriptedProbe, DryRunActuator>, cycles: usize) -> Vec<CycleReport> {
        (0..cycles).map(|_| monitor.poll_cycle()).collect()
    }

    #[test]
    fn test_single_reboot_on_third_failure() {
        let probe = ScriptedProbe::new().rounds(3, &["y"], &["x"]);
        let mut monitor = HealthMonitor::new(probe, DryRunActuator::new(), limits(3, 5));

        let reports = run(&mut monitor, 3);

        assert!(reports[0].escalations().is_empty());
        assert!(reports[1].escalations().is_empty());
        assert_eq!(reports[2].escalations().len(), 1);
        assert_eq!(monitor.actuator().issued(), ["x"]);
        assert!(monitor.ledger().get("x").unwrap().is_rebooting());
    }

    #[test]
    fn test_recovery_before_limit_issues_no_reboot() {
        let probe = ScriptedProbe::new()
            .rounds(2, &[], &["x"])
            .round(&["x"], &[]);
        let mut monitor = HealthMonitor::new(probe, DryRunActuator::new(), limits(3, 5));

        run(&mut monitor, 3);

        assert!(monitor.actuator().issued().is_empty());
        assert!(monitor.ledger().get("x").is_none());
    }

    #[test]
    fn test_one_extra_reboot_after_reboot_limit() {
        let reboot_limit = 2;
        // 3 cycles to the first reboot, then reboot_limit + 1 more down cycles
        let probe = ScriptedProbe::new().rounds(3 + reboot_limit as usize + 1, &[], &["x"]);
        let mut monitor = HealthMonitor::new(probe, DryRunActuator::new(), limits(3, reboot_limit));

        let reports = run(&mut monitor, 3 + reboot_limit as usize + 1);

        assert_eq!(monitor.actuator().issued(), ["x", "x"]);
        assert_eq!(
            reports.last().unwrap().escalations()[0].kind,
            EscalationKind::Repeat { waited: 3 }
        );
        let state = monitor.ledger().get("x").unwrap();
        assert!(state.is_rebooting());
        assert_eq!(state.reboot_wait_count(), 0);
    }

    #[test]
    fn test_probe_failure_leaves_state_unchanged() {
        let probe = ScriptedProbe::new().rounds(2, &[], &["x"]).failure().round(&[], &["x"]);
        let mut monitor = HealthMonitor::new(probe, DryRunActuator::new(), limits(3, 5));

        run(&mut monitor, 2);
        let before = monitor.ledger().get("x").cloned();

        let skipped = monitor.poll_cycle();
        assert!(skipped.is_skipped());
        assert_eq!(monitor.ledger().get("x").cloned(), before);
        assert!(monitor.actuator().issued().is_empty());

        // the failed probe did not count toward the limit, the next one does
        let report = monitor.poll_cycle();
        assert_eq!(report.escalations().len(), 1);
    }

    #[test]
    fn test_reachable_host_is_forgotten() {
        let probe = ScriptedProbe::new()
            .rounds(4, &["b"], &["a"])
            .round(&["a", "b"], &[]);
        let mut monitor = HealthMonitor::new(probe, DryRunActuator::new(), limits(3, 5));

        run(&mut monitor, 4);
        assert!(monitor.ledger().get("a").unwrap().is_rebooting());

        monitor.poll_cycle();
        assert!(monitor.ledger().is_empty());
    }

    #[test]
    fn test_failed_reboot_is_isolated_to_host() {
        let probe = ScriptedProbe::new().round(&[], &["bad", "good"]);
        let actuator = FlakyActuator {
            broken: vec!["bad".into()],
            ..Default::default()
        };
        let mut monitor = HealthMonitor::new(probe, actuator, limits(1, 5));

        let report = monitor.poll_cycle();

        assert_eq!(monitor.actuator().issued, vec!["bad", "good"]);
        match report {
            CycleReport::Observed { failed_reboots, .. } => {
                assert_eq!(failed_reboots, vec!["bad"]);
            }
            other => panic!("unexpected report: {:?}", other),
        }
        // the transition stands even though the command failed
        assert!(monitor.ledger().get("bad").unwrap().is_rebooting());
    }

    #[test]
    fn test_failed_reboot_not_retried_before_reboot_limit() {
        let probe = ScriptedProbe::new().rounds(4, &[], &["bad"]);
        let actuator = FlakyActuator {
            broken: vec!["bad".into()],
            ..Default::default()
        };
        let mut monitor = HealthMonitor::new(probe, actuator, limits(1, 5));

        for _ in 0..4 {
            monitor.poll_cycle();
        }

        assert_eq!(monitor.actuator().issued.len(), 1);
    }

    #[test]
    fn test_silent_listed_host_never_rebooted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ansible");
        std::fs::write(&path, "#!/bin/sh\necho 'n1 | SUCCESS => {}'\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let probe = AnsibleProbe::new(ProbeConfig {
            program: path.display().to_string(),
            timeout: 5,
            ..ProbeConfig::default()
        })
        .with_hosts(vec!["n1".into(), "n2".into()]);
        let mut monitor = HealthMonitor::new(probe, DryRunActuator::new(), limits(3, 5));

        for _ in 0..3 {
            match monitor.poll_cycle() {
                CycleReport::Observed { missing, escalations, .. } => {
                    assert!(missing.contains("n2"));
                    assert!(escalations.is_empty());
                }
                other => panic!("unexpected report: {:?}", other),
            }
        }

        assert!(monitor.actuator().issued().is_empty());
        assert!(monitor.ledger().is_empty());
    }

    #[test]
    fn test_silent_host_keeps_failure_count() {
        let silent = ProbeReport {
            missing: ["x".to_string()].into(),
            ..ProbeReport::default()
        };
        let mut probe = ScriptedProbe::new().rounds(2, &[], &["x"]);
        probe.rounds.push_back(Ok(silent));
        let probe = probe.round(&[], &["x"]);
        let mut monitor = HealthMonitor::new(probe, DryRunActuator::new(), limits(3, 5));

        run(&mut monitor, 3);
        assert_eq!(monitor.ledger().get("x").unwrap().failure_count(), 2);
        assert!(monitor.actuator().issued().is_empty());

        let report = monitor.poll_cycle();
        assert_eq!(report.escalations().len(), 1);
    }

    #[test]
    fn test_session_qualifies_names() {
        let session = Session::parse("Materialization: proj exp mat").unwrap();
        let monitor = HealthMonitor::new(ScriptedProbe::new(), DryRunActuator::new(), limits(3, 5))
            .with_session(session);
        assert_eq!(monitor.qualified("n1"), "n1.mat.exp.proj");
    }

    #[test]
    fn test_cycle_report_serializes() {
        let report = CycleReport::Skipped {
            reason: "timeout".into(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "timeout");
    }
}
