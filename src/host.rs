//! Host context handed to every lifecycle operation
//!
//! Bundles the host capabilities (device table, command runner) with the
//! per-run name allocator and settings, so no operation reaches for ambient
//! global state.

use crate::exec::CommandRunner;
use crate::manifest::Settings;
use crate::network::{HostNet, NameAllocator, WaitPolicy};

pub struct Host<'a> {
    /// Device and namespace table
    pub net: &'a dyn HostNet,
    /// Runs programs inside namespaces
    pub exec: &'a dyn CommandRunner,
    /// Host-side veth names handed out during this run
    pub names: NameAllocator,
    pub settings: Settings,
}

impl<'a> Host<'a> {
    pub fn new(net: &'a dyn HostNet, exec: &'a dyn CommandRunner, settings: Settings) -> Self {
        Self {
            net,
            exec,
            names: NameAllocator::default(),
            settings,
        }
    }

    /// Bounded wait used for every device creation
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::new(self.settings.device_timeout(), self.settings.poll_interval())
    }
}
