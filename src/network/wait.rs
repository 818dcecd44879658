//! Bounded waits for devices to become visible
//!
//! Link creation returns before the kernel has necessarily published the
//! device, so every creation step polls until the device shows up or the
//! policy's timeout elapses.

use crate::error::{Error, Result};
use crate::network::HostNet;
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// How long and how often to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            interval: Duration::from_millis(50),
        }
    }
}

impl WaitPolicy {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Poll `probe` until it reports true
///
/// Returns `Error::DeviceTimeout` naming `device` once the timeout elapses.
/// Probe errors are returned immediately.
pub fn wait_until<F>(device: &str, policy: WaitPolicy, mut probe: F) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    let start = Instant::now();
    loop {
        if probe()? {
            trace!(device, elapsed = ?start.elapsed(), "device visible");
            return Ok(());
        }

        if start.elapsed() >= policy.timeout {
            return Err(Error::DeviceTimeout {
                device: device.to_string(),
                timeout_ms: policy.timeout.as_millis() as u64,
            });
        }

        thread::sleep(policy.interval);
    }
}

/// Wait until a link is visible in `ns` (or the host when `None`)
pub fn wait_for_link(
    net: &dyn HostNet,
    ns: Option<&str>,
    name: &str,
    policy: WaitPolicy,
) -> Result<()> {
    wait_until(name, policy, || net.link_exists(ns, name))
}
