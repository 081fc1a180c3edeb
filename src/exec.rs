//! External command execution with timeout enforcement
//!
//! Every tool the watchdog drives (ansible, xdc) is invoked through
//! [`run_with_timeout`], which captures combined output and kills the
//! child once the deadline passes.

use crate::error::{Error, Result};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How often a running child is polled for exit
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Captured result of a finished command
#[derive(Debug)]
pub struct CommandOutput {
    /// Exit status of the process
    pub status: ExitStatus,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Combined output (stdout followed by stderr)
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Short description of the exit status for log lines
    pub fn summary(&self) -> String {
        match self.status.code() {
            Some(code) => format!("exit {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Render a program and its arguments for log and error messages
pub fn display_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Run `program args...`, waiting at most `timeout_secs` seconds
///
/// Output pipes are drained on background threads so a chatty child cannot
/// block on a full pipe while we wait for it. The child leads its own process
/// group; on timeout the whole group is killed, so helpers it spawned (ssh
/// for ansible) die with it and release the pipes. A process that escaped
/// the group can still hold a pipe open; its reader thread is then left
/// behind rather than waited on.
pub fn run_with_timeout(program: &str, args: &[String], timeout_secs: u64) -> Result<CommandOutput> {
    let command = display_command(program, args);
    tracing::debug!(command = %command, timeout_secs, "spawning command");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(|source| Error::CommandSpawn {
            command: command.clone(),
            source,
        })?;

    let stdout_reader = child.stdout.take().map(drain);
    let stderr_reader = child.stderr.take().map(drain);

    let timeout = Duration::from_secs(timeout_secs);
    let start = Instant::now();

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() > timeout {
                    if kill_group(&mut child) {
                        join(stdout_reader);
                        join(stderr_reader);
                    }
                    return Err(Error::CommandTimeout {
                        command,
                        secs: timeout_secs,
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                return Err(Error::CommandFailed {
                    command,
                    message: format!("Failed to wait for process: {}", e),
                });
            }
        }
    };

    Ok(CommandOutput {
        status,
        stdout: join(stdout_reader),
        stderr: join(stderr_reader),
    })
}

/// Kill the child's process group and reap the child
///
/// Returns true when the group signal was delivered.
fn kill_group(child: &mut Child) -> bool {
    let group = Pid::from_raw(child.id() as i32);
    let delivered = match killpg(group, Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(pgid = %group, error = %e, "failed to kill process group");
            let _ = child.kill();
            false
        }
    };
    let _ = child.wait(); // Reap the zombie
    delivered
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join(reader: Option<thread::JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
