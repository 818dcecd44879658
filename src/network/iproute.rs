//! Host network table access
//!
//! `HostNet` is the single seam through which bridges, interfaces and birds
//! touch the kernel's device and namespace table. `IpRoute2` implements it
//! by driving iproute2's `ip` command, using its JSON output for queries.

use crate::error::{Error, Result};
use ipnet::IpNet;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::{Command, Output};
use tracing::debug;

/// Operations on the host's devices and network namespaces
///
/// `ns` of `None` addresses the host (initial) namespace.
pub trait HostNet {
    /// Check whether a named network namespace exists
    fn netns_exists(&self, ns: &str) -> Result<bool>;

    /// Create a named network namespace
    fn create_netns(&self, ns: &str) -> Result<()>;

    /// Remove a named network namespace
    fn delete_netns(&self, ns: &str) -> Result<()>;

    /// Check whether a link is visible
    fn link_exists(&self, ns: Option<&str>, name: &str) -> Result<bool>;

    /// Create a bridge device in the host namespace
    fn create_bridge(&self, name: &str) -> Result<()>;

    /// Create a veth pair in the host namespace in a single request
    fn create_veth(&self, name: &str, peer: &str) -> Result<()>;

    /// Set a link administratively up
    fn set_link_up(&self, ns: Option<&str>, name: &str) -> Result<()>;

    /// Attach a host link to a bridge as a port
    fn set_master(&self, port: &str, bridge: &str) -> Result<()>;

    /// Move a host link into a namespace
    fn set_netns(&self, name: &str, ns: &str) -> Result<()>;

    /// Assign an address to a link; assigning an existing address is not an error
    fn add_address(&self, ns: Option<&str>, name: &str, addr: &IpNet) -> Result<()>;

    /// Delete a link
    fn delete_link(&self, ns: Option<&str>, name: &str) -> Result<()>;
}

/// `ip -j link show` entry
#[derive(Debug, Deserialize)]
struct LinkEntry {
    ifname: String,
}

/// `ip -j netns list` entry
#[derive(Debug, Deserialize)]
struct NetnsEntry {
    name: String,
}

/// `HostNet` backed by the iproute2 `ip` utility
#[derive(Debug, Clone)]
pub struct IpRoute2 {
    binary: PathBuf,
}

impl Default for IpRoute2 {
    fn default() -> Self {
        Self::new()
    }
}

impl IpRoute2 {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ip"),
        }
    }

    /// Build the argument vector for an `ip` invocation
    fn args(ns: Option<&str>, rest: &[&str]) -> Vec<String> {
        let mut args = Vec::with_capacity(rest.len() + 2);
        if let Some(ns) = ns {
            args.push("-n".to_string());
            args.push(ns.to_string());
        }
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }

    fn run(&self, ns: Option<&str>, rest: &[&str]) -> Result<(String, Output)> {
        let args = Self::args(ns, rest);
        let command = format!("{} {}", self.binary.display(), args.join(" "));
        debug!(%command, "running");

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(|e| Error::CommandFailed {
                command: command.clone(),
                message: e.to_string(),
            })?;

        Ok((command, output))
    }

    /// Run `ip`, mapping a failed exit status to the matching error kind
    fn run_checked(&self, ns: Option<&str>, rest: &[&str], device: &str) -> Result<Output> {
        let (command, output) = self.run(ns, rest)?;
        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(&command, stderr.trim(), ns, device))
    }
}

/// Map iproute2's error text onto the error taxonomy
fn classify_failure(command: &str, stderr: &str, ns: Option<&str>, device: &str) -> Error {
    if stderr.contains("Cannot open network namespace") {
        return Error::NamespaceNotFound(ns.unwrap_or_default().to_string());
    }
    if stderr.contains("Cannot find device") || stderr.contains("does not exist") {
        return Error::InterfaceNotFound(device.to_string());
    }
    Error::CommandFailed {
        command: command.to_string(),
        message: stderr.to_string(),
    }
}

fn parse_links(json: &str) -> Result<Vec<String>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<LinkEntry> = serde_json::from_str(json).map_err(|e| Error::CommandFailed {
        command: "ip -j link show".to_string(),
        message: format!("unexpected output: {}", e),
    })?;
    Ok(entries.into_iter().map(|e| e.ifname).collect())
}

fn parse_netns(json: &str) -> Result<Vec<String>> {
    // `ip -j netns list` prints nothing at all when there are no namespaces
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<NetnsEntry> = serde_json::from_str(json).map_err(|e| Error::CommandFailed {
        command: "ip -j netns list".to_string(),
        message: format!("unexpected output: {}", e),
    })?;
    Ok(entries.into_iter().map(|e| e.name).collect())
}

impl HostNet for IpRoute2 {
    fn netns_exists(&self, ns: &str) -> Result<bool> {
        let output = self.run_checked(None, &["-j", "netns", "list"], ns)?;
        let names = parse_netns(&String::from_utf8_lossy(&output.stdout))?;
        Ok(names.iter().any(|n| n == ns))
    }

    fn create_netns(&self, ns: &str) -> Result<()> {
        let (command, output) = self.run(None, &["netns", "add", ns])?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("File exists") {
            return Err(Error::NamespaceExists(ns.to_string()));
        }
        Err(Error::CommandFailed {
            command,
            message: stderr.trim().to_string(),
        })
    }

    fn delete_netns(&self, ns: &str) -> Result<()> {
        let (command, output) = self.run(None, &["netns", "del", ns])?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such file or directory") {
            return Err(Error::NamespaceNotFound(ns.to_string()));
        }
        Err(Error::CommandFailed {
            command,
            message: stderr.trim().to_string(),
        })
    }

    fn link_exists(&self, ns: Option<&str>, name: &str) -> Result<bool> {
        match self.run_checked(ns, &["-j", "link", "show", "dev", name], name) {
            Ok(output) => {
                let links = parse_links(&String::from_utf8_lossy(&output.stdout))?;
                Ok(links.iter().any(|l| l == name))
            }
            Err(Error::InterfaceNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_bridge(&self, name: &str) -> Result<()> {
        self.run_checked(None, &["link", "add", "name", name, "type", "bridge"], name)?;
        Ok(())
    }

    fn create_veth(&self, name: &str, peer: &str) -> Result<()> {
        self.run_checked(
            None,
            &["link", "add", name, "type", "veth", "peer", "name", peer],
            name,
        )?;
        Ok(())
    }

    fn set_link_up(&self, ns: Option<&str>, name: &str) -> Result<()> {
        self.run_checked(ns, &["link", "set", "dev", name, "up"], name)?;
        Ok(())
    }

    fn set_master(&self, port: &str, bridge: &str) -> Result<()> {
        // Either side missing reports "Cannot find device"; name the bridge
        // only when the port is known to exist
        let device = if self.link_exists(None, port)? { bridge } else { port };
        self.run_checked(None, &["link", "set", "dev", port, "master", bridge], device)?;
        Ok(())
    }

    fn set_netns(&self, name: &str, ns: &str) -> Result<()> {
        match self.run_checked(None, &["link", "set", "dev", name, "netns", ns], name) {
            // `ip link set netns` reports a missing namespace in its own words
            Err(Error::CommandFailed { message, .. })
                if message.contains("Invalid \"netns\" value") =>
            {
                Err(Error::NamespaceNotFound(ns.to_string()))
            }
            other => other.map(|_| ()),
        }
    }

    fn add_address(&self, ns: Option<&str>, name: &str, addr: &IpNet) -> Result<()> {
        let addr = addr.to_string();
        match self.run_checked(ns, &["addr", "add", &addr, "dev", name], name) {
            Err(Error::CommandFailed { message, .. }) if message.contains("File exists") => {
                debug!(device = name, %addr, "address already assigned");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    fn delete_link(&self, ns: Option<&str>, name: &str) -> Result<()> {
        self.run_checked(ns, &["link", "del", "dev", name], name)?;
        Ok(())
    }
}
