// Shared Rust library
pub mod messages;
pub mod ring;

pub use messages::{FailureCause, HopFailure, Message, MessageType, NodeInfo};
pub use ring::{is_between, key_of, position_of, Position};
