//! Command execution inside network namespaces
//!
//! Provides:
//! - The `CommandRunner` capability used by birds for shell commands,
//!   config checks and launching the routing daemon
//! - An implementation on top of `ip netns exec`
//! - Line-by-line capture of command output into the log

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use tracing::info;

/// Result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (`None` if killed by a signal)
    pub code: Option<i32>,
    /// Standard output, split into lines
    pub stdout: Vec<String>,
    /// Standard error, split into lines
    pub stderr: Vec<String>,
}

impl CommandOutput {
    pub fn from_output(output: &Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: split_lines(&output.stdout),
            stderr: split_lines(&output.stderr),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Emit captured output into the log stream
    pub fn log(&self) {
        for line in &self.stdout {
            info!(stream = "stdout", "{}", line);
        }
        for line in &self.stderr {
            info!(stream = "stderr", "{}", line);
        }
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}

/// Render an argument vector for log and error messages
pub fn describe(argv: &[String]) -> String {
    argv.join(" ")
}

/// Runs programs inside a network namespace
pub trait CommandRunner {
    /// Run to completion, capturing output
    fn run(&self, ns: &str, argv: &[String]) -> Result<CommandOutput>;

    /// Start a long-running program with piped stdout and stderr
    fn spawn(&self, ns: &str, argv: &[String]) -> Result<Child>;
}

/// `CommandRunner` using `ip netns exec`
#[derive(Debug, Clone)]
pub struct NetnsExec {
    ip: PathBuf,
}

impl Default for NetnsExec {
    fn default() -> Self {
        Self::new()
    }
}

impl NetnsExec {
    pub fn new() -> Self {
        Self {
            ip: PathBuf::from("ip"),
        }
    }

    fn command(&self, ns: &str, argv: &[String]) -> Result<Command> {
        if argv.is_empty() {
            return Err(Error::CommandFailed {
                command: format!("ip netns exec {}", ns),
                message: "Empty command".to_string(),
            });
        }

        let mut cmd = Command::new(&self.ip);
        cmd.args(["netns", "exec", ns])
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(cmd)
    }
}

impl CommandRunner for NetnsExec {
    fn run(&self, ns: &str, argv: &[String]) -> Result<CommandOutput> {
        let output = self
            .command(ns, argv)?
            .output()
            .map_err(|e| Error::CommandFailed {
                command: describe(argv),
                message: format!("Failed to execute in {}: {}", ns, e),
            })?;
        Ok(CommandOutput::from_output(&output))
    }

    fn spawn(&self, ns: &str, argv: &[String]) -> Result<Child> {
        self.command(ns, argv)?
            .spawn()
            .map_err(|e| Error::CommandFailed {
                command: describe(argv),
                message: format!("Failed to spawn in {}: {}", ns, e),
            })
    }
}
