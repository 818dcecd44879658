//! Topology file parsing for virtualbird
//!
//! Parses the environment description (YAML or TOML) using serde. Only the
//! shape is checked here; [`Topology::validate`] rejects anything that would
//! fail later at device creation so that no host state is touched.

use crate::error::{Error, Result};
use ipnet::IpNet;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix shared by every host-visible device and namespace we create
pub const DEVICE_PREFIX: &str = "vb_";

/// Load a topology from a file
///
/// `.toml` files are parsed as TOML, everything else as YAML.
pub fn load(path: &Path) -> Result<Topology> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let topology = if is_toml {
        Topology::from_toml(&content)?
    } else {
        Topology::from_yaml(&content)?
    };

    topology.validate()?;

    Ok(topology)
}

/// Root of a topology file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Topology {
    /// Bridges and birds to create
    #[serde(default)]
    pub environment: EnvironmentDef,

    /// Runtime knobs
    #[serde(default)]
    pub settings: Settings,
}

impl Topology {
    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to an empty mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate the topology
    pub fn validate(&self) -> Result<()> {
        let env = &self.environment;

        let mut bridges = HashSet::new();
        for bridge in &env.bridges {
            check_device_name(&device_name(bridge), "bridge", bridge)?;
            bridges.insert(bridge.as_str());
        }

        for (name, bird) in &env.birds {
            check_device_name(&device_name(name), "bird", name)?;

            for (index, intf) in bird.interfaces.iter().enumerate() {
                let ifname = interface_name(name, index);
                check_device_name(&ifname, "interface", &ifname)?;

                let bridge = intf.bridge.as_deref().ok_or_else(|| {
                    Error::ConfigValidation(format!(
                        "Interface {} of bird '{}' has no bridge",
                        index, name
                    ))
                })?;
                if !bridges.contains(bridge) {
                    return Err(Error::UnknownBridge {
                        daemon: name.clone(),
                        bridge: bridge.to_string(),
                    });
                }

                intf.parsed_addresses()?;
            }
        }

        if self.settings.device_timeout_ms == 0 {
            return Err(Error::ConfigValidation(
                "device_timeout_ms must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// The `environment` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentDef {
    /// Bridge names, in creation order (duplicates are ignored)
    #[serde(default)]
    pub bridges: Vec<String>,

    /// Bird definitions keyed by name, in document order
    #[serde(default, deserialize_with = "ordered_birds")]
    pub birds: Vec<(String, BirdDef)>,
}

/// A single bird (routing daemon host) definition
///
/// Every key is optional: a bare `r1:` entry is a namespace with only
/// loopback and no routing process.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BirdDef {
    #[serde(default)]
    pub interfaces: Vec<InterfaceDef>,

    /// Shell commands run inside the namespace after interfaces are up
    #[serde(default)]
    pub up: Vec<String>,

    /// Shell commands run inside the namespace before interfaces go down
    #[serde(default)]
    pub down: Vec<String>,

    /// BIRD configuration text
    #[serde(default)]
    pub bird: Option<String>,
}

/// An interface of a bird
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterfaceDef {
    /// Bridge to attach to
    pub bridge: Option<String>,

    /// Addresses in CIDR notation
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl InterfaceDef {
    /// Parse the configured addresses
    pub fn parsed_addresses(&self) -> Result<Vec<IpNet>> {
        self.addresses.iter().map(|a| parse_address(a)).collect()
    }
}

/// Parse a CIDR address such as `10.0.0.1/24`
pub fn parse_address(addr: &str) -> Result<IpNet> {
    addr.trim().parse().map_err(|e: ipnet::AddrParseError| Error::InvalidAddress {
        address: addr.to_string(),
        message: e.to_string(),
    })
}

/// Order in which `Environment::down` tears things down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TeardownOrder {
    /// Remove bridges, then birds (mirrors bring-up order)
    BridgesFirst,
    /// Remove birds, then the bridges their veths were attached to
    #[default]
    DaemonsFirst,
}

/// Runtime settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How long to wait for the kernel to show a freshly created device
    pub device_timeout_ms: u64,

    /// Poll interval while waiting for a device
    pub poll_interval_ms: u64,

    /// Grace period between SIGTERM and SIGKILL for bird
    pub stop_timeout_ms: u64,

    /// BIRD binary
    pub bird_binary: PathBuf,

    /// Directory for per-bird config, control socket and pid file
    pub scratch_dir: PathBuf,

    /// Teardown ordering
    pub teardown_order: TeardownOrder,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_timeout_ms: 5000,
            poll_interval_ms: 50,
            stop_timeout_ms: 5000,
            bird_binary: PathBuf::from("bird"),
            scratch_dir: PathBuf::from("/tmp"),
            teardown_order: TeardownOrder::default(),
        }
    }
}

impl Settings {
    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Host device (or namespace) name for a logical bridge or bird name
pub fn device_name(name: &str) -> String {
    format!("{}{}", DEVICE_PREFIX, name)
}

/// Name of the `index`th interface of bird `bird`
pub fn interface_name(bird: &str, index: usize) -> String {
    format!("{}-eth{}", bird, index)
}

/// Check that a device name fits the kernel's interface name rules
fn check_device_name(device: &str, kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ConfigValidation(format!("Empty {} name", kind)));
    }

    // IF_NAMESIZE includes the trailing NUL
    if device.len() >= libc::IF_NAMESIZE {
        return Err(Error::ConfigValidation(format!(
            "{} name '{}' is too long: '{}' exceeds {} characters",
            kind,
            name,
            device,
            libc::IF_NAMESIZE - 1
        )));
    }

    if device
        .chars()
        .any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control())
    {
        return Err(Error::ConfigValidation(format!(
            "{} name '{}' contains characters not allowed in device names",
            kind, name
        )));
    }

    Ok(())
}

/// Deserialize the `birds` mapping keeping document order
fn ordered_birds<'de, D>(deserializer: D) -> std::result::Result<Vec<(String, BirdDef)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct BirdsVisitor;

    impl<'de> Visitor<'de> for BirdsVisitor {
        type Value = Vec<(String, BirdDef)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a mapping of bird name to bird definition")
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut birds: Vec<(String, BirdDef)> = Vec::new();
            while let Some((name, def)) = map.next_entry::<String, Option<BirdDef>>()? {
                if birds.iter().any(|(existing, _)| *existing == name) {
                    return Err(de::Error::custom(format!("duplicate bird '{}'", name)));
                }
                birds.push((name, def.unwrap_or_default()));
            }
            Ok(birds)
        }
    }

    deserializer.deserialize_any(BirdsVisitor)
}
