use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::ring::Position;

/// Address payload carried by messages: a peer and its ring position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: Position,
    pub address: String,
}

impl NodeInfo {
    pub fn new(id: Position, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }

    /// Builds the payload for `address` at its hashed position.
    pub fn from_address(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            id: crate::ring::position_of(&address),
            address,
        }
    }
}

/// The four message types that may cross the wire. A reply carries the
/// same type as the request it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Lookup,
    GetPredecessor,
    SetPredecessor,
    SetSuccessor,
}

/// Why a hop further down a lookup chain could not answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCause {
    Unreachable,
    Timeout,
    Protocol,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cause = match self {
            FailureCause::Unreachable => "unreachable",
            FailureCause::Timeout => "timed out",
            FailureCause::Protocol => "protocol mismatch",
        };
        f.write_str(cause)
    }
}

/// The peer a lookup chain broke at, reported back to the origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HopFailure {
    pub address: String,
    pub cause: FailureCause,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageType,
    // Only meaningful for Lookup
    pub key: Position,
    // Owner for Lookup replies, the node being communicated otherwise
    pub result: Option<NodeInfo>,
    // Address that started a Lookup chain; forwarded unchanged on every hop
    pub origin: Option<String>,
    // Time left for a Lookup chain; each hop forwards with less
    pub budget: Option<Duration>,
    // Set on a Lookup reply instead of `result` when the chain broke
    pub failure: Option<HopFailure>,
}

impl Message {
    fn new(kind: MessageType) -> Self {
        Self {
            kind,
            key: 0,
            result: None,
            origin: None,
            budget: None,
            failure: None,
        }
    }

    pub fn lookup(key: Position, origin: impl Into<String>) -> Self {
        Self {
            key,
            origin: Some(origin.into()),
            ..Self::new(MessageType::Lookup)
        }
    }

    pub fn lookup_reply(key: Position, owner: NodeInfo) -> Self {
        Self {
            key,
            result: Some(owner),
            ..Self::new(MessageType::Lookup)
        }
    }

    /// Lookup reply for a chain that broke at `failure.address`.
    pub fn lookup_failed(key: Position, failure: HopFailure) -> Self {
        Self {
            key,
            failure: Some(failure),
            ..Self::new(MessageType::Lookup)
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn get_predecessor() -> Self {
        Self::new(MessageType::GetPredecessor)
    }

    pub fn predecessor_reply(predecessor: Option<NodeInfo>) -> Self {
        Self {
            result: predecessor,
            ..Self::new(MessageType::GetPredecessor)
        }
    }

    pub fn set_predecessor(node: NodeInfo) -> Self {
        Self {
            result: Some(node),
            ..Self::new(MessageType::SetPredecessor)
        }
    }

    pub fn set_successor(node: NodeInfo) -> Self {
        Self {
            result: Some(node),
            ..Self::new(MessageType::SetSuccessor)
        }
    }

    /// Acknowledgement for a request that needs no payload in its reply.
    pub fn ack(kind: MessageType) -> Self {
        Self::new(kind)
    }
}
