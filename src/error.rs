//! Unified error types for virtualbird

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for virtualbird operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Topology errors
    #[error("Failed to read topology file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse TOML topology: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to parse YAML topology: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Topology validation failed: {0}")]
    ConfigValidation(String),

    #[error("Bird '{daemon}' references unknown bridge '{bridge}'")]
    UnknownBridge { daemon: String, bridge: String },

    #[error("Bird '{daemon}' already has an interface named '{interface}'")]
    DuplicateInterface { daemon: String, interface: String },

    #[error("Invalid address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    // Device errors
    #[error("Timed out after {timeout_ms}ms waiting for device '{device}'")]
    DeviceTimeout { device: String, timeout_ms: u64 },

    #[error("No free device name with prefix '{0}'")]
    NamesExhausted(String),

    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("Namespace '{0}' already exists")]
    NamespaceExists(String),

    #[error("Namespace '{0}' not found")]
    NamespaceNotFound(String),

    #[error("Command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },

    // Lifecycle errors
    #[error("Bird '{daemon}' has an invalid routing config (check exited with {code:?})")]
    InvalidRoutingConfig { daemon: String, code: Option<i32> },

    #[error("Bird '{name}' cannot {operation} while {state}")]
    InvalidState {
        name: String,
        state: String,
        operation: String,
    },

    #[error("Teardown finished with {} error(s): {}", .0.len(), .0.join("; "))]
    Teardown(Vec<String>),
}

/// Result type alias for virtualbird operations
pub type Result<T> = std::result::Result<T, Error>;
