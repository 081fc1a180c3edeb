//! Per-host failure bookkeeping
//!
//! The ledger holds one entry per host currently considered unhealthy and
//! applies a reachability snapshot to it, producing the escalations the
//! monitor must act on. It never talks to the outside world.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Escalation thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Consecutive failed checks before the first reboot
    pub failure_limit: u32,
    /// Failed checks after a reboot before rebooting again (exceeded, not reached)
    pub reboot_limit: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            failure_limit: 3,
            reboot_limit: 5,
        }
    }
}

/// Where an unhealthy host is in its escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum HostPhase {
    /// Unreachable, no reboot issued yet
    Failing { failures: u32 },
    /// Reboot issued, waiting for the host to come back
    Rebooting { waited: u32 },
}

/// Bookkeeping for one unhealthy host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostState {
    pub host: String,
    #[serde(flatten)]
    pub phase: HostPhase,
}

impl HostState {
    fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            phase: HostPhase::Failing { failures: 0 },
        }
    }

    /// Consecutive failed checks (0 once rebooting)
    pub fn failure_count(&self) -> u32 {
        match self.phase {
            HostPhase::Failing { failures } => failures,
            HostPhase::Rebooting { .. } => 0,
        }
    }

    /// Whether a reboot has been issued for this host
    pub fn is_rebooting(&self) -> bool {
        matches!(self.phase, HostPhase::Rebooting { .. })
    }

    /// Failed checks since the last reboot was issued
    pub fn reboot_wait_count(&self) -> u32 {
        match self.phase {
            HostPhase::Failing { .. } => 0,
            HostPhase::Rebooting { waited } => waited,
        }
    }
}

/// Why a reboot is being issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    /// Host crossed `failure_limit`
    Initial,
    /// Host stayed down past `reboot_limit` after an earlier reboot
    Repeat { waited: u32 },
}

/// A reboot the monitor must issue this cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Escalation {
    pub host: String,
    pub kind: EscalationKind,
}

impl fmt::Display for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EscalationKind::Initial => write!(f, "{} (initial)", self.host),
            EscalationKind::Repeat { waited } => {
                write!(f, "{} (repeat after {} checks)", self.host, waited)
            }
        }
    }
}

/// Table of unhealthy hosts, keyed by host name
#[derive(Debug, Default, Clone)]
pub struct HostLedger {
    hosts: BTreeMap<String, HostState>,
}

impl HostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one reachability snapshot and return the reboots it triggers
    ///
    /// `unknown` hosts had no data this cycle; their entries are left as they are.
    /// Everything else is computed from `unreachable`:
    /// 1. unreachable hosts bump their wait counter (rebooting) or failure counter
    /// 2. tracked hosts that are neither unreachable nor unknown are forgotten
    /// 3. failing hosts at `failure_limit` move to rebooting with a fresh wait counter
    /// 4. rebooting hosts past `reboot_limit` are rebooted again and reset
    ///
    /// Only hosts in `unreachable` can escalate.
    pub fn observe(
        &mut self,
        unreachable: &BTreeSet<String>,
        unknown: &BTreeSet<String>,
        limits: Limits,
    ) -> Vec<Escalation> {
        for host in unreachable {
            let state = self
                .hosts
                .entry(host.clone())
                .or_insert_with(|| HostState::new(host));
            state.phase = match state.phase {
                HostPhase::Failing { failures } => HostPhase::Failing {
                    failures: failures.saturating_add(1),
                },
                HostPhase::Rebooting { waited } => HostPhase::Rebooting {
                    waited: waited.saturating_add(1),
                },
            };
        }

        self.hosts
            .retain(|host, _| unreachable.contains(host) || unknown.contains(host));

        let mut escalations = Vec::new();

        for state in self.hosts.values_mut() {
            if !unreachable.contains(&state.host) {
                continue;
            }
            if let HostPhase::Failing { failures } = state.phase {
                if failures >= limits.failure_limit {
                    state.phase = HostPhase::Rebooting { waited: 0 };
                    escalations.push(Escalation {
                        host: state.host.clone(),
                        kind: EscalationKind::Initial,
                    });
                }
            }
        }

        for state in self.hosts.values_mut() {
            if !unreachable.contains(&state.host) {
                continue;
            }
            if let HostPhase::Rebooting { waited } = state.phase {
                if waited > limits.reboot_limit {
                    state.phase = HostPhase::Rebooting { waited: 0 };
                    escalations.push(Escalation {
                        host: state.host.clone(),
                        kind: EscalationKind::Repeat { waited },
                    });
                }
            }
        }

        escalations
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// All tracked hosts in name order
    pub fn iter(&self) -> impl Iterator<Item = &HostState> {
        self.hosts.values()
    }

    /// Hosts still counting failures, with their counts
    pub fn failing(&self) -> BTreeMap<&str, u32> {
        self.hosts
            .values()
            .filter_map(|s| match s.phase {
                HostPhase::Failing { failures } => Some((s.host.as_str(), failures)),
                HostPhase::Rebooting { .. } => None,
            })
            .collect()
    }

    /// Hosts waiting on a reboot, with checks waited so far
    pub fn rebooting(&self) -> BTreeMap<&str, u32> {
        self.hosts
            .values()
            .filter_map(|s| match s.phase {
                HostPhase::Rebooting { waited } => Some((s.host.as_str(), waited)),
                HostPhase::Failing { .. } => None,
            })
            .collect()
    }
}

#[cfg(test)]
impl HostLedger {
    /// State of a single host, if it is being tracked
    pub fn get(&self, host: &str) -> Option<&HostState> {
        self.hosts.get(host)
    }
}
