//! Host bridge devices
//!
//! A bridge lives in the host namespace for the duration of a run. Birds'
//! interfaces attach their host-side veth ends to it as ports.

use crate::error::Result;
use crate::host::Host;
use crate::manifest::device_name;
use crate::network::wait_for_link;
use tracing::info;

/// A logical bridge and its host device
#[derive(Debug, Clone)]
pub struct Bridge {
    /// Logical name from the topology (e.g., "lan")
    name: String,
    /// Host device name (e.g., "vb_lan")
    ifname: String,
    /// Set once the device has been created
    active: bool,
}

impl Bridge {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ifname: device_name(name),
            active: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    /// True once `up` created the device and until `down` removed it
    pub fn is_up(&self) -> bool {
        self.active
    }

    /// Create the bridge device, wait for it and bring it up
    pub fn up(&mut self, host: &Host) -> Result<()> {
        info!(bridge = %self.name, device = %self.ifname, "Creating bridge");

        host.net.create_bridge(&self.ifname)?;
        // The device may exist even if the wait below times out
        self.active = true;

        wait_for_link(host.net, None, &self.ifname, host.wait_policy())?;
        host.net.set_link_up(None, &self.ifname)?;
        Ok(())
    }

    /// Remove the bridge device
    ///
    /// A bridge that was never brought up yields the device layer's
    /// not-found error.
    pub fn down(&mut self, host: &Host) -> Result<()> {
        info!(bridge = %self.name, device = %self.ifname, "Removing bridge");

        let result = host.net.delete_link(None, &self.ifname);
        self.active = false;
        result
    }
}
