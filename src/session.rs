//! Testbed session identity
//!
//! The watchdog only operates while attached to a materialization. The
//! session tool prints a line such as
//! `Materialization: <project> <experiment> <materialization>`.

use crate::error::{Error, Result};
use crate::exec;
use crate::manifest::SessionConfig;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

static MATERIALIZATION_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Materialization:\s+(\S+)\s+(\S+)\s+(\S+)").expect("valid materialization regex")
});

/// The materialization the monitor is attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub project: String,
    pub experiment: String,
    pub materialization: String,
}

impl Session {
    /// Query the session tool and parse its output
    pub fn detect(config: &SessionConfig) -> Result<Self> {
        let output = exec::run_with_timeout(&config.program, &config.args, config.timeout)?;
        if !output.success() {
            tracing::debug!(
                status = %output.summary(),
                output = %output.combined().trim(),
                "session tool reported no tunnel"
            );
            return Err(Error::NotAttached);
        }

        Self::parse(&output.combined())
    }

    /// Extract the session from tool output (first matching line wins)
    pub fn parse(output: &str) -> Result<Self> {
        output
            .lines()
            .find_map(|line| MATERIALIZATION_LINE.captures(line))
            .map(|caps| Session {
                project: caps[1].to_string(),
                experiment: caps[2].to_string(),
                materialization: caps[3].to_string(),
            })
            .ok_or(Error::SessionUnparsed)
    }

    /// Fully qualified testbed name of a node in this materialization
    pub fn qualify(&self, host: &str) -> String {
        format!(
            "{}.{}.{}.{}",
            host, self.materialization, self.experiment, self.project
        )
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.project, self.experiment, self.materialization
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tunnel_output() {
        let output = "\
Tunnel: up
Materialization: dcomp map-exp real
Endpoint: 10.0.0.1
";
        let session = Session::parse(output).unwrap();
        assert_eq!(session.project, "dcomp");
        assert_eq!(session.experiment, "map-exp");
        assert_eq!(session.materialization, "real");
        assert_eq!(session.to_string(), "dcomp map-exp real");
    }

    #[test]
    fn test_parse_without_materialization() {
        let err = Session::parse("Tunnel: up\nEndpoint: 10.0.0.1\n").unwrap_err();
        assert!(matches!(err, Error::SessionUnparsed));
    }

    #[test]
    fn test_parse_requires_line_start() {
        assert!(Session::parse("  Materialization: a b c").is_err());
    }

    #[test]
    fn test_qualify() {
        let session = Session::parse("Materialization: proj exp mat").unwrap();
        assert_eq!(session.qualify("node1"), "node1.mat.exp.proj");
    }

    #[test]
    fn test_detect_not_attached() {
        let config = SessionConfig {
            program: "sh".into(),
            args: vec!["-c".into(), "echo 'no tunnel'; exit 1".into()],
            timeout: 5,
        };
        assert!(matches!(Session::detect(&config), Err(Error::NotAttached)));
    }

    #[test]
    fn test_detect_attached() {
        let config = SessionConfig {
            program: "sh".into(),
            args: vec!["-c".into(), "echo 'Materialization: p e m'".into()],
            timeout: 5,
        };
        let session = Session::detect(&config).unwrap();
        assert_eq!(session.materialization, "m");
    }
}
