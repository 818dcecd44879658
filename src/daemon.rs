//! Birds: a namespace running one routing daemon
//!
//! A `Daemon` owns its namespace, the interfaces inside it, the shell
//! commands run around bring-up and teardown, and the routing daemon
//! process. Bring-up stops at the first failing step. Teardown is best
//! effort and only touches what bring-up actually created.

pub mod state;

use crate::error::{Error, Result};
use crate::exec::describe;
use crate::host::Host;
use crate::manifest::device_name;
use crate::network::{Interface, wait_for_link};
use crate::process::{RoutingProcess, StopOutcome};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use state::{Lifecycle, State};
use std::fs;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const LOOPBACK: &str = "lo";

fn loopback_addresses() -> [IpNet; 2] {
    [
        IpNet::V4(Ipv4Net::new_assert(Ipv4Addr::LOCALHOST, 8)),
        IpNet::V6(Ipv6Net::new_assert(Ipv6Addr::LOCALHOST, 128)),
    ]
}

/// Files a routing daemon uses, all keyed by the bird's namespace id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub config: PathBuf,
    pub socket: PathBuf,
    pub pid: PathBuf,
}

impl Artifacts {
    pub fn new(scratch: &Path, ns: &str) -> Self {
        Self {
            config: scratch.join(format!("{}.conf", ns)),
            socket: scratch.join(format!("{}.ctl", ns)),
            pid: scratch.join(format!("{}.pid", ns)),
        }
    }

    /// Remove whatever exists, returning failures other than "not found"
    fn remove(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for path in [&self.config, &self.socket, &self.pid] {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => errors.push(format!("{}: {}", path.display(), e)),
            }
        }
        errors
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// A namespace hosting one routing daemon
#[derive(Debug)]
pub struct Daemon {
    name: String,
    ns: String,
    interfaces: Vec<Box<dyn Interface>>,
    up_commands: Vec<String>,
    down_commands: Vec<String>,
    routing_config: Option<String>,
    process: Option<RoutingProcess>,
    artifacts: Option<Artifacts>,
    lifecycle: Lifecycle,
    /// Namespace was created by this bird
    ns_created: bool,
    /// Interfaces whose bring-up was attempted
    raised: usize,
}

impl Daemon {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ns: device_name(name),
            interfaces: Vec::new(),
            up_commands: Vec::new(),
            down_commands: Vec::new(),
            routing_config: None,
            process: None,
            artifacts: None,
            lifecycle: Lifecycle::new(),
            ns_created: false,
            raised: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace id derived from the name
    pub fn namespace(&self) -> &str {
        &self.ns
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    pub fn interfaces(&self) -> &[Box<dyn Interface>] {
        &self.interfaces
    }

    pub fn up_commands(&self) -> &[String] {
        &self.up_commands
    }

    pub fn down_commands(&self) -> &[String] {
        &self.down_commands
    }

    pub fn routing_config(&self) -> Option<&str> {
        self.routing_config.as_deref()
    }

    /// Pid of the routing daemon while the handle is held
    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().and_then(RoutingProcess::id)
    }

    fn invalid_state(&self, operation: &str) -> Error {
        Error::InvalidState {
            name: self.name.clone(),
            state: self.state().to_string(),
            operation: operation.to_string(),
        }
    }

    fn ensure_built(&self, operation: &str) -> Result<()> {
        if self.state() == State::Built {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    pub fn add_interface(&mut self, interface: Box<dyn Interface>) -> Result<()> {
        self.ensure_built("add an interface")?;
        if self.interfaces.iter().any(|i| i.name() == interface.name()) {
            return Err(Error::DuplicateInterface {
                daemon: self.name.clone(),
                interface: interface.name().to_string(),
            });
        }
        self.interfaces.push(interface);
        Ok(())
    }

    pub fn add_up_command(&mut self, command: impl Into<String>) -> Result<()> {
        self.ensure_built("add an up command")?;
        self.up_commands.push(command.into());
        Ok(())
    }

    pub fn add_down_command(&mut self, command: impl Into<String>) -> Result<()> {
        self.ensure_built("add a down command")?;
        self.down_commands.push(command.into());
        Ok(())
    }

    /// Set the routing daemon configuration. Blank text means no daemon.
    pub fn set_routing_config(&mut self, config: impl Into<String>) -> Result<()> {
        self.ensure_built("set the routing config")?;
        let config = config.into();
        self.routing_config = if config.trim().is_empty() {
            None
        } else {
            Some(config)
        };
        Ok(())
    }

    /// Bring the bird up
    ///
    /// Steps in order: namespace, loopback, interfaces, up commands,
    /// routing daemon. The first failure aborts the remaining steps.
    pub fn up(&mut self, host: &mut Host<'_>) -> Result<()> {
        self.lifecycle
            .start()
            .map_err(|_| self.invalid_state("start"))?;
        info!(bird = %self.name, ns = %self.ns, "Bringing up bird");

        if host.net.netns_exists(&self.ns)? {
            return Err(Error::NamespaceExists(self.ns.clone()));
        }
        host.net.create_netns(&self.ns)?;
        self.ns_created = true;

        self.loopback_up(host)?;

        for i in 0..self.interfaces.len() {
            self.raised = i + 1;
            self.interfaces[i].up(host)?;
        }

        self.run_commands(host, "up", &self.up_commands);
        self.start_routing(host)?;

        self.lifecycle
            .started()
            .map_err(|_| self.invalid_state("finish starting"))?;
        info!(bird = %self.name, pid = ?self.process_id(), "Bird up");
        Ok(())
    }

    fn loopback_up(&self, host: &Host<'_>) -> Result<()> {
        let ns = Some(self.ns.as_str());
        wait_for_link(host.net, ns, LOOPBACK, host.wait_policy())?;
        host.net.set_link_up(ns, LOOPBACK)?;
        for addr in loopback_addresses() {
            host.net.add_address(ns, LOOPBACK, &addr)?;
        }
        Ok(())
    }

    /// Run shell commands in the namespace. Failures are logged, not returned.
    fn run_commands(&self, host: &Host<'_>, phase: &str, commands: &[String]) {
        for command in commands {
            info!(bird = %self.name, phase, command = %command, "Running command");
            let argv = vec!["bash".to_string(), "-c".to_string(), command.clone()];
            match host.exec.run(&self.ns, &argv) {
                Ok(output) => {
                    output.log();
                    if !output.success() {
                        warn!(
                            bird = %self.name,
                            phase,
                            command = %command,
                            code = ?output.code,
                            "Command failed"
                        );
                    }
                }
                Err(e) => warn!(bird = %self.name, phase, error = %e, "Command could not be run"),
            }
        }
    }

    fn start_routing(&mut self, host: &Host<'_>) -> Result<()> {
        let Some(config) = self.routing_config.as_deref() else {
            debug!(bird = %self.name, "No routing config, not starting a routing daemon");
            return Ok(());
        };

        let artifacts = Artifacts::new(&host.settings.scratch_dir, &self.ns);
        fs::write(&artifacts.config, config)?;

        match self.check_routing_config(host, &artifacts) {
            Ok(()) => {}
            Err(e @ Error::InvalidRoutingConfig { .. }) => {
                warn!(bird = %self.name, error = %e, "Routing daemon will not be started");
                self.routing_config = None;
                for failure in artifacts.remove() {
                    warn!(bird = %self.name, "Failed to remove {}", failure);
                }
                return Ok(());
            }
            Err(e) => {
                self.artifacts = Some(artifacts);
                return Err(e);
            }
        }

        let bird = path_arg(&host.settings.bird_binary);
        let argv = vec![
            bird,
            "-c".to_string(),
            path_arg(&artifacts.config),
            "-f".to_string(),
            "-s".to_string(),
            path_arg(&artifacts.socket),
            "-P".to_string(),
            path_arg(&artifacts.pid),
        ];
        self.artifacts = Some(artifacts);

        debug!(bird = %self.name, command = %describe(&argv), "Launching routing daemon");
        let child = host.exec.spawn(&self.ns, &argv)?;
        self.process = Some(RoutingProcess::adopt(child, &self.name));
        Ok(())
    }

    /// Syntax-check the written config with the routing daemon binary
    fn check_routing_config(&self, host: &Host<'_>, artifacts: &Artifacts) -> Result<()> {
        let argv = vec![
            path_arg(&host.settings.bird_binary),
            "-c".to_string(),
            path_arg(&artifacts.config),
            "-p".to_string(),
        ];
        let output = host.exec.run(&self.ns, &argv)?;
        output.log();

        if output.success() {
            Ok(())
        } else {
            Err(Error::InvalidRoutingConfig {
                daemon: self.name.clone(),
                code: output.code,
            })
        }
    }

    /// Tear the bird down
    ///
    /// Every step runs even if an earlier one failed; failures are collected
    /// into `Error::Teardown`. A bird that was never started, or is already
    /// down, is left alone.
    pub fn down(&mut self, host: &mut Host<'_>) -> Result<()> {
        if matches!(self.state(), State::Built | State::Down) {
            debug!(bird = %self.name, state = %self.state(), "Nothing to tear down");
            return Ok(());
        }
        self.lifecycle
            .stop()
            .map_err(|_| self.invalid_state("stop"))?;
        info!(bird = %self.name, ns = %self.ns, "Tearing down bird");

        let mut errors = Vec::new();

        if let Some(mut process) = self.process.take() {
            debug!(bird = %self.name, running = process.is_running(), "Stopping routing daemon");
            match process.ensure_stopped(host.settings.stop_timeout()) {
                StopOutcome::AlreadyExited => {
                    warn!(bird = %self.name, "Routing daemon was already gone")
                }
                outcome => debug!(bird = %self.name, ?outcome, "Routing daemon released"),
            }
        }
        if let Some(artifacts) = self.artifacts.take() {
            errors.extend(artifacts.remove());
        }

        if self.ns_created {
            self.run_commands(host, "down", &self.down_commands);

            for interface in self.interfaces.iter_mut().take(self.raised) {
                if let Err(e) = interface.down(host) {
                    error!(bird = %self.name, interface = interface.name(), error = %e, "Failed to remove interface");
                    errors.push(format!("{}: {}", interface.name(), e));
                }
            }
            self.raised = 0;

            if let Err(e) = host.net.delete_netns(&self.ns) {
                error!(bird = %self.name, error = %e, "Failed to remove namespace");
                errors.push(e.to_string());
            }
            self.ns_created = false;
        }

        self.lifecycle
            .stopped()
            .map_err(|_| self.invalid_state("finish stopping"))?;

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown(errors))
        }
    }
}
