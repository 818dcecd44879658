//! In-memory host doubles for lifecycle tests
//!
//! `FakeNet` models just enough of the kernel's device and namespace table
//! (veth peers die together, deleting a namespace destroys its links, bridge
//! ports lose their master) to check what a run leaves behind.
//! `RecordingRunner` records every command and spawns a harmless real
//! process in place of the routing daemon.

use crate::error::{Error, Result};
use crate::exec::{CommandOutput, CommandRunner, describe};
use crate::manifest::Settings;
use crate::network::HostNet;
use ipnet::IpNet;
use std::collections::HashSet;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

/// Settings with short waits and artifacts under `scratch`
pub fn fast_settings(scratch: &Path) -> Settings {
    Settings {
        device_timeout_ms: 40,
        poll_interval_ms: 5,
        stop_timeout_ms: 500,
        scratch_dir: scratch.to_path_buf(),
        ..Settings::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Loopback,
    Bridge,
    Veth { peer: String },
}

#[derive(Debug, Clone)]
pub struct FakeLink {
    pub ns: Option<String>,
    pub name: String,
    pub kind: LinkKind,
    pub up: bool,
    pub addresses: Vec<IpNet>,
    pub master: Option<String>,
}

#[derive(Debug, Default)]
struct NetState {
    namespaces: Vec<String>,
    links: Vec<FakeLink>,
    hidden: HashSet<String>,
    claim_all: bool,
    calls: Vec<String>,
}

impl NetState {
    fn find(&self, ns: Option<&str>, name: &str) -> Option<usize> {
        self.links
            .iter()
            .position(|l| l.ns.as_deref() == ns && l.name == name)
    }

    fn find_mut(&mut self, ns: Option<&str>, name: &str) -> Result<&mut FakeLink> {
        if let Some(ns) = ns
            && !self.namespaces.iter().any(|n| n == ns)
        {
            return Err(Error::NamespaceNotFound(ns.to_string()));
        }
        let idx = self
            .find(ns, name)
            .ok_or_else(|| Error::InterfaceNotFound(name.to_string()))?;
        Ok(&mut self.links[idx])
    }

    fn host_name_taken(&self, name: &str) -> bool {
        self.find(None, name).is_some()
    }

    fn remove(&mut self, idx: usize) {
        let link = self.links.remove(idx);
        match link.kind {
            LinkKind::Veth { peer } => self.links.retain(|l| l.name != peer),
            LinkKind::Bridge => {
                for port in &mut self.links {
                    if port.master.as_deref() == Some(link.name.as_str()) {
                        port.master = None;
                    }
                }
            }
            LinkKind::Loopback => {}
        }
    }
}

/// In-memory `HostNet`
#[derive(Debug, Default)]
pub struct FakeNet {
    state: Mutex<NetState>,
}

fn scoped(ns: Option<&str>, name: &str) -> String {
    match ns {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}

impl FakeNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never report `name` as visible
    pub fn hide(&self, name: &str) {
        self.state.lock().unwrap().hidden.insert(name.to_string());
    }

    /// Report every host link name as taken
    pub fn claim_all_links(&self) {
        self.state.lock().unwrap().claim_all = true;
    }

    /// Pre-create a namespace outside of any lifecycle
    pub fn add_namespace(&self, ns: &str) {
        self.state.lock().unwrap().namespaces.push(ns.to_string());
    }

    /// Every mutating call, in order
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.state.lock().unwrap().namespaces.clone()
    }

    pub fn links(&self) -> Vec<FakeLink> {
        self.state.lock().unwrap().links.clone()
    }

    pub fn link(&self, ns: Option<&str>, name: &str) -> Option<FakeLink> {
        let state = self.state.lock().unwrap();
        state.find(ns, name).map(|idx| state.links[idx].clone())
    }

    /// True when nothing created by a run is left
    pub fn is_clean(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.namespaces.is_empty() && state.links.is_empty()
    }

    fn record(&self, state: &mut NetState, call: String) {
        state.calls.push(call);
    }
}

impl HostNet for FakeNet {
    fn netns_exists(&self, ns: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().namespaces.iter().any(|n| n == ns))
    }

    fn create_netns(&self, ns: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.namespaces.iter().any(|n| n == ns) {
            return Err(Error::NamespaceExists(ns.to_string()));
        }
        self.record(&mut state, format!("netns add {}", ns));
        state.namespaces.push(ns.to_string());
        state.links.push(FakeLink {
            ns: Some(ns.to_string()),
            name: "lo".to_string(),
            kind: LinkKind::Loopback,
            up: false,
            addresses: Vec::new(),
            master: None,
        });
        Ok(())
    }

    fn delete_netns(&self, ns: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.namespaces.iter().any(|n| n == ns) {
            return Err(Error::NamespaceNotFound(ns.to_string()));
        }
        self.record(&mut state, format!("netns del {}", ns));
        state.namespaces.retain(|n| n != ns);
        while let Some(idx) = state.links.iter().position(|l| l.ns.as_deref() == Some(ns)) {
            state.remove(idx);
        }
        Ok(())
    }

    fn link_exists(&self, ns: Option<&str>, name: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if state.claim_all {
            return Ok(true);
        }
        if state.hidden.contains(name) {
            return Ok(false);
        }
        Ok(state.find(ns, name).is_some())
    }

    fn create_bridge(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.host_name_taken(name) {
            return Err(Error::CommandFailed {
                command: format!("ip link add name {} type bridge", name),
                message: "RTNETLINK answers: File exists".to_string(),
            });
        }
        self.record(&mut state, format!("bridge add {}", name));
        state.links.push(FakeLink {
            ns: None,
            name: name.to_string(),
            kind: LinkKind::Bridge,
            up: false,
            addresses: Vec::new(),
            master: None,
        });
        Ok(())
    }

    fn create_veth(&self, name: &str, peer: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.host_name_taken(name) || state.host_name_taken(peer) {
            return Err(Error::CommandFailed {
                command: format!("ip link add {} type veth peer name {}", name, peer),
                message: "RTNETLINK answers: File exists".to_string(),
            });
        }
        self.record(&mut state, format!("veth add {} {}", name, peer));
        for (end, other) in [(name, peer), (peer, name)] {
            state.links.push(FakeLink {
                ns: None,
                name: end.to_string(),
                kind: LinkKind::Veth {
                    peer: other.to_string(),
                },
                up: false,
                addresses: Vec::new(),
                master: None,
            });
        }
        Ok(())
    }

    fn set_link_up(&self, ns: Option<&str>, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.find_mut(ns, name)?.up = true;
        self.record(&mut state, format!("link up {}", scoped(ns, name)));
        Ok(())
    }

    fn set_master(&self, port: &str, bridge: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let is_bridge = state
            .find(None, bridge)
            .is_some_and(|idx| state.links[idx].kind == LinkKind::Bridge);
        if !is_bridge {
            return Err(Error::InterfaceNotFound(bridge.to_string()));
        }
        state.find_mut(None, port)?.master = Some(bridge.to_string());
        self.record(&mut state, format!("master {} {}", port, bridge));
        Ok(())
    }

    fn set_netns(&self, name: &str, ns: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.namespaces.iter().any(|n| n == ns) {
            return Err(Error::NamespaceNotFound(ns.to_string()));
        }
        let link = state.find_mut(None, name)?;
        link.ns = Some(ns.to_string());
        link.up = false;
        link.master = None;
        self.record(&mut state, format!("netns set {} {}", name, ns));
        Ok(())
    }

    fn add_address(&self, ns: Option<&str>, name: &str, addr: &IpNet) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let link = state.find_mut(ns, name)?;
        if !link.addresses.contains(addr) {
            link.addresses.push(*addr);
        }
        self.record(&mut state, format!("addr add {} {}", scoped(ns, name), addr));
        Ok(())
    }

    fn delete_link(&self, ns: Option<&str>, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.find_mut(ns, name)?;
        let idx = state
            .find(ns, name)
            .ok_or_else(|| Error::InterfaceNotFound(name.to_string()))?;
        state.remove(idx);
        self.record(&mut state, format!("link del {}", scoped(ns, name)));
        Ok(())
    }
}

#[derive(Debug)]
struct RunnerState {
    runs: Vec<(String, Vec<String>)>,
    spawns: Vec<(String, Vec<String>)>,
    failures: Vec<(String, i32)>,
    program: Vec<String>,
}

/// `CommandRunner` that records calls instead of entering namespaces
#[derive(Debug)]
pub struct RecordingRunner {
    state: Mutex<RunnerState>,
}

impl Default for RecordingRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingRunner {
    /// Spawned daemons are `sleep 30`
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RunnerState {
                runs: Vec::new(),
                spawns: Vec::new(),
                failures: Vec::new(),
                program: vec!["sleep".to_string(), "30".to_string()],
            }),
        }
    }

    /// Commands whose text contains `pattern` exit with `code`
    pub fn fail_when(&self, pattern: &str, code: i32) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((pattern.to_string(), code));
    }

    /// Spawned daemons exit right away
    pub fn spawn_exiting(&self) {
        self.state.lock().unwrap().program = vec!["true".to_string()];
    }

    pub fn runs(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn spawns(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().spawns.clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, ns: &str, argv: &[String]) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.runs.push((ns.to_string(), argv.to_vec()));

        let text = describe(argv);
        let code = state
            .failures
            .iter()
            .find(|(pattern, _)| text.contains(pattern.as_str()))
            .map(|(_, code)| *code)
            .unwrap_or(0);

        Ok(CommandOutput {
            code: Some(code),
            stdout: vec![format!("ran {}", text)],
            stderr: Vec::new(),
        })
    }

    fn spawn(&self, ns: &str, argv: &[String]) -> Result<Child> {
        let mut state = self.state.lock().unwrap();
        state.spawns.push((ns.to_string(), argv.to_vec()));

        Command::new(&state.program[0])
            .args(&state.program[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(Error::from)
    }
}
