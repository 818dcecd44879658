//! Command-line interface for virtualbird
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::manifest::{Settings, TeardownOrder};
use clap::Parser;
use std::path::PathBuf;

/// virtualbird - throwaway BIRD test networks in Linux namespaces
#[derive(Parser, Debug)]
#[command(name = "virtualbird")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Topology file (YAML, or TOML with a .toml extension)
    pub config: PathBuf,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,

    /// Validate the topology and print the plan without touching the host
    #[arg(long)]
    pub check: bool,

    /// Override the teardown order from the topology file
    #[arg(long, value_enum)]
    pub teardown_order: Option<TeardownOrder>,

    /// Override the BIRD binary
    #[arg(long)]
    pub bird_binary: Option<PathBuf>,

    /// Override the directory for BIRD config, socket and pid files
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Apply command-line overrides on top of file settings
    pub fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(order) = self.teardown_order {
            settings.teardown_order = order;
        }
        if let Some(bird) = &self.bird_binary {
            settings.bird_binary = bird.clone();
        }
        if let Some(dir) = &self.scratch_dir {
            settings.scratch_dir = dir.clone();
        }
    }
}
