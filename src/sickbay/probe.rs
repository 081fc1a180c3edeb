//! Batched reachability probing
//!
//! The probe answers one question per cycle: which hosts are unreachable
//! right now. The production probe runs the ansible ping module in one-line
//! mode and scrapes `<host> | <STATUS> => ...` lines.

use crate::error::{Error, Result};
use crate::exec;
use crate::manifest::ProbeConfig;
use regex::Regex;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

/// Status string ansible prints for a host that answered the ping
pub const SUCCESS: &str = "SUCCESS";

static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<host>[^.\s]+)\S*\s+\|\s+(?P<status>\S+)\s").expect("valid status line regex")
});

/// Source of reachability snapshots
pub trait ReachabilityProbe {
    /// Check every host in one batch
    ///
    /// An `Err` means "no information this cycle", never "everything is down".
    fn probe(&mut self) -> Result<ProbeReport>;
}

/// Per-host statuses from one batched probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    /// Raw status per short host name
    pub statuses: BTreeMap<String, String>,
    /// Allow-listed hosts that printed no status line
    pub missing: BTreeSet<String>,
}

impl ProbeReport {
    /// Parse ansible `--one-line` output
    ///
    /// Host names are shortened to the part before the first dot. Lines that
    /// are not status lines (warnings, blank lines) are ignored. When several
    /// lines shorten to the same name, a failure status beats `SUCCESS`.
    pub fn parse(output: &str) -> Self {
        let mut statuses = BTreeMap::new();
        for caps in output.lines().filter_map(|line| STATUS_LINE.captures(line)) {
            let status = caps["status"].to_string();
            match statuses.entry(caps["host"].to_string()) {
                Entry::Vacant(entry) => {
                    entry.insert(status);
                }
                Entry::Occupied(mut entry) => {
                    if entry.get() == SUCCESS {
                        entry.insert(status);
                    }
                }
            }
        }
        Self {
            statuses,
            missing: BTreeSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Hosts whose status is anything other than `SUCCESS`
    pub fn unreachable(&self) -> BTreeSet<String> {
        self.statuses
            .iter()
            .filter(|(_, status)| status.as_str() != SUCCESS)
            .map(|(host, _)| host.clone())
            .collect()
    }

    /// Restrict the report to an allow-list of hosts
    ///
    /// Listed hosts that did not report go to [`ProbeReport::missing`]. They
    /// are neither reachable nor unreachable this cycle.
    pub fn restrict_to(mut self, hosts: &[String]) -> Self {
        if hosts.is_empty() {
            return self;
        }
        let mut statuses = BTreeMap::new();
        let mut missing = BTreeSet::new();
        for host in hosts {
            match self.statuses.remove(host) {
                Some(status) => {
                    statuses.insert(host.clone(), status);
                }
                None => {
                    missing.insert(host.clone());
                }
            }
        }
        Self { statuses, missing }
    }
}

/// Reachability probe backed by `ansible -m ping`
pub struct AnsibleProbe {
    config: ProbeConfig,
    hosts: Vec<String>,
}

impl AnsibleProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            hosts: Vec::new(),
        }
    }

    /// Only consider these hosts (empty = all reported hosts)
    pub fn with_hosts(mut self, hosts: Vec<String>) -> Self {
        self.hosts = hosts;
        self
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-m".to_string(),
            "ping".to_string(),
            "-i".to_string(),
            self.config.inventory.clone(),
            "--one-line".to_string(),
            self.config.pattern.clone(),
        ]
    }
}

impl ReachabilityProbe for AnsibleProbe {
    fn probe(&mut self) -> Result<ProbeReport> {
        // ansible exits non-zero whenever a host is unreachable, so the exit
        // code says nothing about whether the probe itself worked
        let output = exec::run_with_timeout(&self.config.program, &self.args(), self.config.timeout)
            .map_err(|e| Error::ProbeFailed(e.to_string()))?;

        let report = ProbeReport::parse(&output.stdout);
        if report.is_empty() {
            let detail = output.combined();
            let first_line = detail.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            return Err(Error::ProbeFailed(format!(
                "no host status lines in output ({}): {}",
                output.summary(),
                first_line
            )));
        }

        let report = report.restrict_to(&self.hosts);
        if !report.missing.is_empty() {
            tracing::warn!(hosts = ?report.missing, "no status reported for listed hosts");
        }
        tracing::debug!(hosts = report.statuses.len(), "probe complete");
        Ok(report)
    }
}

#[cfg(test)]
impl ProbeReport {
    /// Build a report directly from host/status pairs
    pub fn from_statuses<I, H, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = (H, S)>,
        H: Into<String>,
        S: Into<String>,
    {
        Self {
            statuses: statuses
                .into_iter()
                .map(|(h, s)| (h.into(), s.into()))
                .collect(),
            missing: BTreeSet::new(),
        }
    }
}
