//! Health monitoring and recovery for testbed nodes
//!
//! Provides:
//! - Batched reachability probing (ansible ping)
//! - Per-host failure bookkeeping with reboot escalation
//! - Recovery actions (remote power cycle)

pub mod ledger;
pub mod monitor;
pub mod probe;
pub mod recovery;

pub use ledger::Limits;
pub use monitor::HealthMonitor;
