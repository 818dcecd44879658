//! Collision-free names for host-visible devices
//!
//! Host-side veth ends need names that are unique on the host, short enough
//! for the kernel, and unrelated to the logical names in the topology.

use crate::error::{Error, Result};
use crate::network::HostNet;
use rand::{Rng, rng};
use std::collections::HashSet;

/// Default prefix for host-side veth names
pub const VETH_PREFIX: &str = "vbh";

/// Give up after this many colliding candidates
const MAX_ATTEMPTS: usize = 32;

/// Issues random short device names and remembers what it handed out
#[derive(Debug, Clone)]
pub struct NameAllocator {
    prefix: String,
    issued: HashSet<String>,
}

impl Default for NameAllocator {
    fn default() -> Self {
        Self::new(VETH_PREFIX)
    }
}

impl NameAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            issued: HashSet::new(),
        }
    }

    fn candidate(&self) -> String {
        format!("{}{:08x}", self.prefix, rng().random::<u32>())
    }

    /// Allocate a name that neither this allocator nor the host has in use
    pub fn allocate(&mut self, net: &dyn HostNet) -> Result<String> {
        for _ in 0..MAX_ATTEMPTS {
            let name = self.candidate();
            if self.issued.contains(&name) || net.link_exists(None, &name)? {
                continue;
            }
            self.issued.insert(name.clone());
            return Ok(name);
        }

        Err(Error::NamesExhausted(self.prefix.clone()))
    }

    /// Return a name to the pool
    pub fn release(&mut self, name: &str) -> bool {
        self.issued.remove(name)
    }

    /// Number of names currently handed out
    pub fn issued(&self) -> usize {
        self.issued.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeNet;

    #[test]
    fn test_names_are_unique_and_short() {
        let net = FakeNet::new();
        let mut names = NameAllocator::default();

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let name = names.allocate(&net).unwrap();
            assert!(name.starts_with(VETH_PREFIX));
            assert!(name.len() < libc::IF_NAMESIZE);
            assert!(seen.insert(name));
        }
        assert_eq!(names.issued(), 200);
    }

    #[test]
    fn test_release() {
        let net = FakeNet::new();
        let mut names = NameAllocator::new("vbt");

        let name = names.allocate(&net).unwrap();
        assert!(names.release(&name));
        assert!(!names.release(&name));
        assert_eq!(names.issued(), 0);
    }

    #[test]
    fn test_exhausted_when_host_has_every_name() {
        let net = FakeNet::new();
        net.claim_all_links();
        let mut names = NameAllocator::default();

        assert!(matches!(
            names.allocate(&net),
            Err(Error::NamesExhausted(prefix)) if prefix == VETH_PREFIX
        ));
    }
}
