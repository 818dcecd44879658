//! Interfaces that birds own inside their namespaces
//!
//! `Interface` carries the generic bring-up protocol: materialize the device
//! on the host, move it into the namespace, then address and activate it
//! there. Variants only decide how the device is materialized.

use crate::error::{Error, Result};
use crate::host::Host;
use crate::network::wait_for_link;
use ipnet::IpNet;
use std::fmt;
use tracing::{debug, info, warn};

/// A network interface owned by a bird
pub trait Interface: fmt::Debug {
    /// Name of the device inside the namespace
    fn name(&self) -> &str;

    /// Namespace the device ends up in
    fn namespace(&self) -> &str;

    /// Addresses applied on the next `up`
    fn addresses(&self) -> &[IpNet];

    /// Queue an address. Has no effect on the host until the next `up`.
    fn add_address(&mut self, addr: IpNet);

    /// Materialize the device in the host namespace
    fn create(&mut self, host: &mut Host<'_>) -> Result<()>;

    /// Create the device, move it into the namespace, address it and
    /// bring it up
    fn up(&mut self, host: &mut Host<'_>) -> Result<()> {
        self.create(host)?;

        let ns = self.namespace().to_string();
        let name = self.name().to_string();
        host.net.set_netns(&name, &ns)?;
        wait_for_link(host.net, Some(ns.as_str()), &name, host.wait_policy())?;

        for addr in self.addresses() {
            debug!(ns = %ns, interface = %name, address = %addr, "Adding address");
            host.net.add_address(Some(ns.as_str()), &name, addr)?;
        }
        host.net.set_link_up(Some(ns.as_str()), &name)?;

        info!(ns = %ns, interface = %name, "Interface up");
        Ok(())
    }

    /// Remove the device from inside its namespace
    fn down(&mut self, host: &mut Host<'_>) -> Result<()> {
        host.net.delete_link(Some(self.namespace()), self.name())
    }
}

/// Interface connected to a host bridge through a veth pair
///
/// The namespace end carries the logical name; the host end gets a short
/// random name and becomes a port of the bridge.
#[derive(Debug, Clone)]
pub struct BridgeInterface {
    name: String,
    ns: String,
    addresses: Vec<IpNet>,
    /// Host device name of the bridge
    bridge: String,
    /// Host-side veth end, once created
    host_side: Option<String>,
}

impl BridgeInterface {
    pub fn new(name: &str, ns: &str, bridge: &str) -> Self {
        Self {
            name: name.to_string(),
            ns: ns.to_string(),
            addresses: Vec::new(),
            bridge: bridge.to_string(),
            host_side: None,
        }
    }

    #[cfg(test)]
    pub fn host_side(&self) -> Option<&str> {
        self.host_side.as_deref()
    }
}

impl Interface for BridgeInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.ns
    }

    fn addresses(&self) -> &[IpNet] {
        &self.addresses
    }

    fn add_address(&mut self, addr: IpNet) {
        self.addresses.push(addr);
    }

    fn create(&mut self, host: &mut Host<'_>) -> Result<()> {
        // Never leave a veth behind that has no bridge to join
        if !host.net.link_exists(None, &self.bridge)? {
            return Err(Error::InterfaceNotFound(self.bridge.clone()));
        }

        let host_side = host.names.allocate(host.net)?;
        debug!(
            interface = %self.name,
            host_side = %host_side,
            bridge = %self.bridge,
            "Creating veth pair"
        );

        if let Err(e) = host.net.create_veth(&host_side, &self.name) {
            host.names.release(&host_side);
            return Err(e);
        }
        self.host_side = Some(host_side.clone());

        let policy = host.wait_policy();
        wait_for_link(host.net, None, &self.name, policy)?;
        wait_for_link(host.net, None, &host_side, policy)?;

        host.net.set_link_up(None, &host_side)?;
        host.net.set_master(&host_side, &self.bridge)?;
        Ok(())
    }

    fn down(&mut self, host: &mut Host<'_>) -> Result<()> {
        let Some(host_side) = self.host_side.take() else {
            return host.net.delete_link(Some(self.ns.as_str()), &self.name);
        };
        host.names.release(&host_side);

        let result = host.net.delete_link(Some(self.ns.as_str()), &self.name);
        let missing = matches!(
            result,
            Err(Error::InterfaceNotFound(_)) | Err(Error::NamespaceNotFound(_))
        );

        // Bring-up stopped before the move; the pair is still on the host
        if missing && host.net.link_exists(None, &host_side)? {
            warn!(
                interface = %self.name,
                host_side = %host_side,
                "Interface never reached its namespace, removing host side"
            );
            return host.net.delete_link(None, &host_side);
        }
        result
    }
}
