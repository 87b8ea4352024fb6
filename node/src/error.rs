use std::fmt;
use std::time::Duration;

use chordring_lib::{FailureCause, HopFailure, Position};
use thiserror::Error;

/// Failure of a single request/reply exchange with a peer.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("could not connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no reply from {address} within {after:?}")]
    Timeout { address: String, after: Duration },

    #[error("I/O error talking to {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol error from {address}: {reason}")]
    Protocol { address: String, reason: String },

    /// A later hop of a lookup chain failed; `address` is where it broke.
    #[error("lookup chain broke at {address}: {cause}")]
    Unresolved { address: String, cause: FailureCause },
}

impl TransportError {
    pub fn protocol(address: impl Into<String>, reason: impl Into<String>) -> Self {
        TransportError::Protocol {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// The peer the failed exchange was addressed to.
    pub fn address(&self) -> &str {
        match self {
            TransportError::Connect { address, .. }
            | TransportError::Timeout { address, .. }
            | TransportError::Io { address, .. }
            | TransportError::Protocol { address, .. }
            | TransportError::Unresolved { address, .. } => address,
        }
    }

    /// Wire form of this failure, relayed back along a lookup chain.
    pub fn hop_failure(&self) -> HopFailure {
        let cause = match self {
            TransportError::Connect { .. } | TransportError::Io { .. } => FailureCause::Unreachable,
            TransportError::Timeout { .. } => FailureCause::Timeout,
            TransportError::Protocol { .. } => FailureCause::Protocol,
            TransportError::Unresolved { cause, .. } => *cause,
        };
        HopFailure {
            address: self.address().to_string(),
            cause,
        }
    }
}

/// The join handshake step that was in flight when a join failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStep {
    FindSuccessor,
    GetPredecessor,
    SetPredecessor,
    SetSuccessor,
}

impl fmt::Display for JoinStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            JoinStep::FindSuccessor => "lookup of own position",
            JoinStep::GetPredecessor => "fetch of successor's predecessor",
            JoinStep::SetPredecessor => "update of successor's predecessor",
            JoinStep::SetSuccessor => "update of predecessor's successor",
        };
        f.write_str(step)
    }
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("could not bind listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lookup of key {key} failed: {source}")]
    Lookup {
        key: Position,
        #[source]
        source: TransportError,
    },

    #[error("node has no ring pointers yet")]
    NotInRing,

    #[error("join via {bootstrap} failed during {step}: {source}")]
    JoinFailed {
        bootstrap: String,
        step: JoinStep,
        #[source]
        source: TransportError,
    },

    #[error("leave notification to {peer} failed: {source}")]
    LeaveFailed {
        peer: String,
        #[source]
        source: TransportError,
    },

    #[error("node is already part of a ring")]
    AlreadyJoined,

    #[error("node is not running")]
    NotRunning,

    #[error("node has left the ring")]
    Stopped,

    #[error("malformed request: {0}")]
    Protocol(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
