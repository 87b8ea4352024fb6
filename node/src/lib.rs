//! Chord ring node library
//!
//! A simplified Chord node: every peer knows only its successor and
//! predecessor, lookups walk the ring one hop at a time, and join/leave are
//! explicit four- and two-message handshakes. One TCP connection carries one
//! request and one reply. The library backs the `chordring-node` binary and
//! the integration test harness.

pub mod command;
pub mod error;
pub mod network_client;
pub mod node;
pub mod transport;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// Re-export main types for public API
pub use command::Command;
pub use error::{ConfigError, JoinStep, NodeError, TransportError};
pub use network_client::{NetworkClient, TcpNetworkClient};
pub use node::{ChordNode, Lifecycle, Timeouts, CONTROL_TIMEOUT, HOP_MARGIN, LOOKUP_TIMEOUT};

// Re-export from lib crate for convenience
pub use chordring_lib::{FailureCause, HopFailure, Message, MessageType, NodeInfo, Position};

pub const CONFIG_PATH_VAR: &str = "CHORD_CONFIG";
pub const NODE_ADDRESS_VAR: &str = "NODE_ADDRESS";
pub const BOOTSTRAP_ADDRESS_VAR: &str = "BOOTSTRAP_ADDRESS";

fn default_address() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_lookup_timeout() -> Duration {
    LOOKUP_TIMEOUT
}

fn default_control_timeout() -> Duration {
    CONTROL_TIMEOUT
}

/// Configuration for a ChordNode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_address")]
    pub address: String,
    /// Peer to join through; a new ring is created when absent.
    #[serde(default)]
    pub bootstrap: Option<String>,
    #[serde(default = "default_lookup_timeout", with = "humantime_serde")]
    pub lookup_timeout: Duration,
    #[serde(default = "default_control_timeout", with = "humantime_serde")]
    pub control_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            bootstrap: None,
            lookup_timeout: LOOKUP_TIMEOUT,
            control_timeout: CONTROL_TIMEOUT,
        }
    }
}

impl Config {
    /// Loads the file named by `CHORD_CONFIG`, or falls back to
    /// `NODE_ADDRESS` / `BOOTSTRAP_ADDRESS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            return Self::from_file(path);
        }
        Ok(Self {
            address: std::env::var(NODE_ADDRESS_VAR).unwrap_or_else(|_| default_address()),
            bootstrap: std::env::var(BOOTSTRAP_ADDRESS_VAR).ok(),
            ..Self::default()
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            lookup: self.lookup_timeout,
            control: self.control_timeout,
        }
    }
}

impl ChordNode<TcpNetworkClient> {
    /// Create a ChordNode from config with the TCP network client. The
    /// bootstrap peer, if any, is joined when the node runs.
    pub fn from_config(config: &Config) -> Self {
        let node = ChordNode::new(config.address.clone(), Arc::new(TcpNetworkClient::new()))
            .with_timeouts(config.timeouts());
        if let Some(bootstrap) = &config.bootstrap {
            node.join_group(bootstrap.clone());
        }
        node
    }
}
