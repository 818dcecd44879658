//! Bird lifecycle state machine
//!
//! A bird is built, brought up once and torn down once. There is no
//! restart in place: a torn-down bird stays `Down`.

use state_machines::state_machine;
use std::fmt;

state_machine! {
    name: DaemonMachine,
    dynamic: true,
    initial: Built,
    states: [Built, Starting, Up, Stopping, Down],
    events {
        start {
            transition: { from: Built, to: Starting }
        }
        started {
            transition: { from: Starting, to: Up }
        }
        stop {
            transition: { from: [Starting, Up], to: Stopping }
        }
        stopped {
            transition: { from: Stopping, to: Down }
        }
    }
}

/// Plain state enum for callers that don't care about the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Built,
    Starting,
    Up,
    Stopping,
    Down,
}

impl State {
    /// Parse the machine's state name
    pub fn from_name(s: &str) -> Self {
        match s {
            "Starting" => State::Starting,
            "Up" => State::Up,
            "Stopping" => State::Stopping,
            "Down" => State::Down,
            _ => State::Built,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Built => "built",
            State::Starting => "starting",
            State::Up => "up",
            State::Stopping => "stopping",
            State::Down => "down",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one bird (dynamic dispatch, unit context)
pub struct Lifecycle {
    machine: DynamicDaemonMachine<()>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Lifecycle").field(&self.state()).finish()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            machine: DaemonMachine::new(()).into_dynamic(),
        }
    }

    pub fn state(&self) -> State {
        State::from_name(self.machine.current_state())
    }

    pub fn start(&mut self) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(DaemonMachineEvent::Start)
    }

    pub fn started(&mut self) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(DaemonMachineEvent::Started)
    }

    pub fn stop(&mut self) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(DaemonMachineEvent::Stop)
    }

    pub fn stopped(&mut self) -> Result<(), state_machines::DynamicError> {
        self.machine.handle(DaemonMachineEvent::Stopped)
    }
}
