//! Network device management for virtual topologies
//!
//! Provides:
//! - The `HostNet` capability over the host's device and namespace table
//! - Bounded waits for devices the kernel creates asynchronously
//! - Short unique names for host-side veth ends
//! - Bridges and the interfaces birds plug into them

pub mod bridge;
pub mod interface;
pub mod iproute;
pub mod names;
pub mod wait;

pub use bridge::Bridge;
pub use interface::{BridgeInterface, Interface};
pub use iproute::{HostNet, IpRoute2};
pub use names::NameAllocator;
pub use wait::{WaitPolicy, wait_for_link};
