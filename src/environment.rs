//! Environment orchestrator
//!
//! Owns every bridge and bird of a run, in the order they were added.
//! Bring-up creates bridges first, then birds. Teardown follows the
//! configured `TeardownOrder` and never stops early.

use crate::daemon::Daemon;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::manifest::{BirdDef, EnvironmentDef, TeardownOrder, interface_name};
use crate::network::{Bridge, BridgeInterface, Interface};
use tracing::{debug, error, info, warn};

pub struct Environment<'a> {
    host: Host<'a>,
    bridges: Vec<Bridge>,
    daemons: Vec<Daemon>,
    teardown: TeardownOrder,
}

impl<'a> Environment<'a> {
    pub fn new(host: Host<'a>) -> Self {
        let teardown = host.settings.teardown_order;
        Self {
            host,
            bridges: Vec::new(),
            daemons: Vec::new(),
            teardown,
        }
    }

    /// Register every bridge and bird of a topology
    ///
    /// Nothing on the host is touched.
    pub fn from_topology(host: Host<'a>, def: &EnvironmentDef) -> Result<Self> {
        let mut env = Self::new(host);
        for name in &def.bridges {
            env.add_bridge(name);
        }
        for (name, bird) in &def.birds {
            env.add_daemon(name, bird)?;
        }
        Ok(env)
    }

    pub fn bridges(&self) -> &[Bridge] {
        &self.bridges
    }

    pub fn daemons(&self) -> &[Daemon] {
        &self.daemons
    }

    pub fn bridge(&self, name: &str) -> Option<&Bridge> {
        self.bridges.iter().find(|b| b.name() == name)
    }

    pub fn daemon(&self, name: &str) -> Option<&Daemon> {
        self.daemons.iter().find(|d| d.name() == name)
    }

    /// Register a bridge. Returns false if one with this name exists.
    pub fn add_bridge(&mut self, name: &str) -> bool {
        if self.bridge(name).is_some() {
            debug!(bridge = %name, "Bridge already registered");
            return false;
        }
        self.bridges.push(Bridge::new(name));
        true
    }

    /// Register a bird. Returns false if one with this name exists.
    ///
    /// Bridge references are resolved here: a bird naming a bridge that has
    /// not been registered is rejected before anything is built.
    pub fn add_daemon(&mut self, name: &str, def: &BirdDef) -> Result<bool> {
        if self.daemon(name).is_some() {
            debug!(bird = %name, "Bird already registered");
            return Ok(false);
        }

        let mut daemon = Daemon::new(name);
        for (index, iface) in def.interfaces.iter().enumerate() {
            let bridge_name = iface.bridge.as_deref().ok_or_else(|| {
                Error::ConfigValidation(format!(
                    "Interface {} of bird '{}' has no bridge",
                    index, name
                ))
            })?;
            let bridge = self
                .bridge(bridge_name)
                .ok_or_else(|| Error::UnknownBridge {
                    daemon: name.to_string(),
                    bridge: bridge_name.to_string(),
                })?;

            let mut interface = BridgeInterface::new(
                &interface_name(name, index),
                daemon.namespace(),
                bridge.ifname(),
            );
            for addr in iface.parsed_addresses()? {
                interface.add_address(addr);
            }
            daemon.add_interface(Box::new(interface))?;
        }

        for command in &def.up {
            daemon.add_up_command(command.as_str())?;
        }
        for command in &def.down {
            daemon.add_down_command(command.as_str())?;
        }
        if let Some(config) = &def.bird {
            daemon.set_routing_config(config.as_str())?;
        }

        self.daemons.push(daemon);
        Ok(true)
    }

    /// Bring up every bridge, then every bird, in insertion order
    ///
    /// Stops at the first failure. Call `down` regardless of the outcome;
    /// it only tears down what was brought up.
    pub fn up(&mut self) -> Result<()> {
        info!(
            bridges = self.bridges.len(),
            birds = self.daemons.len(),
            "Bringing up environment"
        );

        for bridge in &mut self.bridges {
            bridge.up(&self.host)?;
        }
        for daemon in &mut self.daemons {
            daemon.up(&mut self.host)?;
        }

        info!("Environment up");
        Ok(())
    }

    /// Tear everything down, collecting failures instead of stopping
    pub fn down(&mut self) -> Result<()> {
        info!(order = ?self.teardown, "Tearing down environment");

        let mut errors = Vec::new();
        match self.teardown {
            TeardownOrder::BridgesFirst => {
                self.down_bridges(&mut errors);
                self.down_daemons(&mut errors);
            }
            TeardownOrder::DaemonsFirst => {
                self.down_daemons(&mut errors);
                self.down_bridges(&mut errors);
            }
        }

        if self.host.names.issued() > 0 {
            warn!(
                names = self.host.names.issued(),
                "Host-side veth names still issued after teardown"
            );
        }

        if errors.is_empty() {
            info!("Environment down");
            Ok(())
        } else {
            Err(Error::Teardown(errors))
        }
    }

    fn down_bridges(&mut self, errors: &mut Vec<String>) {
        for bridge in &mut self.bridges {
            if !bridge.is_up() {
                continue;
            }
            if let Err(e) = bridge.down(&self.host) {
                error!(bridge = %bridge.name(), error = %e, "Failed to remove bridge");
                errors.push(format!("bridge {}: {}", bridge.name(), e));
            }
        }
    }

    fn down_daemons(&mut self, errors: &mut Vec<String>) {
        for daemon in &mut self.daemons {
            match daemon.down(&mut self.host) {
                Ok(()) => {}
                Err(Error::Teardown(failures)) => errors.extend(
                    failures
                        .into_iter()
                        .map(|f| format!("bird {}: {}", daemon.name(), f)),
                ),
                Err(e) => {
                    error!(bird = %daemon.name(), error = %e, "Failed to tear down bird");
                    errors.push(format!("bird {}: {}", daemon.name(), e));
                }
            }
        }
    }

    /// Print what `up` would create, without touching the host
    pub fn print_plan(&self) {
        println!("=== CHECK - No changes will be made ===\n");

        println!("Bridges ({}):", self.bridges().len());
        for bridge in self.bridges() {
            println!("  [BRIDGE] {} -> {}", bridge.name(), bridge.ifname());
        }

        println!("\nBirds ({}):", self.daemons().len());
        for daemon in self.daemons() {
            println!("  [BIRD] {} (namespace {})", daemon.name(), daemon.namespace());
            for interface in daemon.interfaces() {
                let addresses: Vec<String> =
                    interface.addresses().iter().map(|a| a.to_string()).collect();
                println!(
                    "          Interface: {} [{}]",
                    interface.name(),
                    addresses.join(", ")
                );
            }
            for command in daemon.up_commands() {
                println!("          Up: {}", command);
            }
            for command in daemon.down_commands() {
                println!("          Down: {}", command);
            }
            let routing = if daemon.routing_config().is_some() {
                "yes"
            } else {
                "no"
            };
            println!("          Routing daemon: {}", routing);
        }

        println!("\nTeardown order: {:?}", self.teardown);
    }
}
