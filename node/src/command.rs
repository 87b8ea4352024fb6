//! Operator commands accepted by the driver on stdin.
//!
//! `insert,<value>,<key>`, `query,<value>`, `delete,<value>` are routed by the
//! ring position of `<value>`, so a query lands on the node an insert of the
//! same value went to. `query,*` asks for the ring description instead.

use chordring_lib::{key_of, Position};
use std::str::FromStr;
use thiserror::Error;

use crate::network_client::NetworkClient;
use crate::node::{ChordNode, Lifecycle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Insert { value: String, key: String },
    Query { value: String },
    QueryAll,
    Delete { value: String },
    Depart { node: Option<Position> },
    Join,
    Status,
    Graph,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{command} needs a {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
    #[error("invalid node id: {0}")]
    InvalidNodeId(String),
}

fn required(
    field: Option<&str>,
    command: &'static str,
    argument: &'static str,
) -> Result<String, CommandError> {
    match field.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(CommandError::MissingArgument { command, argument }),
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }
        let mut fields = line.split(',');
        let option = fields.next().map(str::trim).unwrap_or_default();

        match option {
            "insert" => Ok(Command::Insert {
                value: required(fields.next(), "insert", "value")?,
                key: required(fields.next(), "insert", "key")?,
            }),
            "query" => {
                let value = required(fields.next(), "query", "value")?;
                if value == "*" {
                    Ok(Command::QueryAll)
                } else {
                    Ok(Command::Query { value })
                }
            }
            "delete" => Ok(Command::Delete {
                value: required(fields.next(), "delete", "value")?,
            }),
            "depart" => {
                let node = match fields.next().map(str::trim) {
                    Some(id) if !id.is_empty() => Some(
                        id.parse::<Position>()
                            .map_err(|_| CommandError::InvalidNodeId(id.to_string()))?,
                    ),
                    _ => None,
                };
                Ok(Command::Depart { node })
            }
            "join" => Ok(Command::Join),
            "status" => Ok(Command::Status),
            "graph" => Ok(Command::Graph),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

impl Command {
    /// Ring position the command must be routed to, if it routes at all.
    pub fn routing_key(&self) -> Option<Position> {
        match self {
            Command::Insert { value, .. } | Command::Query { value } | Command::Delete { value } => {
                Some(key_of(value))
            }
            _ => None,
        }
    }
}

/// Result of running one command against a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub output: String,
    /// The node has stopped and the driver should exit.
    pub stop: bool,
    pub failed: bool,
}

impl Executed {
    fn output(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            stop: false,
            failed: false,
        }
    }

    fn failed(output: impl Into<String>) -> Self {
        Self {
            failed: true,
            ..Self::output(output)
        }
    }
}

impl Command {
    pub async fn execute<T: NetworkClient>(&self, node: &ChordNode<T>) -> Executed {
        match self {
            Command::Insert { .. } | Command::Query { .. } | Command::Delete { .. } => {
                let Some(key) = self.routing_key() else {
                    return Executed::output("");
                };
                match node.find_owner(key).await {
                    Ok(owner) => {
                        Executed::output(format!("key {} -> {} ({})", key, owner.address, owner.id))
                    }
                    Err(e) => Executed::failed(e.to_string()),
                }
            }
            Command::QueryAll | Command::Status => Executed::output(node.to_string()),
            Command::Graph => Executed::output(node.graphviz().trim_end()),
            Command::Join => Executed::output(format!(
                "start another chordring-node with BOOTSTRAP_ADDRESS={}",
                node.info.address
            )),
            Command::Depart { node: Some(id) } if *id != node.info.id => Executed::output(format!(
                "node {} is not this node ({})",
                id, node.info.id
            )),
            // The node stops whether or not its neighbours were told
            Command::Depart { .. } => match node.leave().await {
                Ok(()) => Executed {
                    stop: true,
                    ..Executed::output("left the ring")
                },
                Err(e) => Executed {
                    stop: node.lifecycle() == Lifecycle::Stopped,
                    ..Executed::failed(e.to_string())
                },
            },
        }
    }
}
