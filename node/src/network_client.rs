use async_trait::async_trait;
use chordring_lib::Message;
use log::{debug, error};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::TransportError;
use crate::transport::{read_message, write_message};

/// Sends one message to a peer and waits for its single reply.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkClient: Send + Sync + 'static {
    async fn call_node(
        &self,
        address: &str,
        message: Message,
        limit: Duration,
    ) -> Result<Message, TransportError>;
}

/// Opens a fresh TCP connection for every call and closes it after the reply.
/// Failed calls are never retried here; the caller decides what a failure means.
#[derive(Debug, Default, Clone)]
pub struct TcpNetworkClient;

impl TcpNetworkClient {
    pub fn new() -> Self {
        Self
    }

    async fn exchange(
        stream: &mut TcpStream,
        address: &str,
        message: &Message,
    ) -> Result<Message, TransportError> {
        write_message(stream, message, address).await?;
        read_message(stream, address).await
    }
}

#[async_trait]
impl NetworkClient for TcpNetworkClient {
    async fn call_node(
        &self,
        address: &str,
        message: Message,
        limit: Duration,
    ) -> Result<Message, TransportError> {
        debug!("Attempting to connect to {} with timeout {:?}", address, limit);

        let mut stream = match timeout(limit, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                error!("Failed to connect to {}: {}", address, source);
                return Err(TransportError::Connect {
                    address: address.to_string(),
                    source,
                });
            }
            Err(_) => {
                error!("Connection to {} timed out after {:?}", address, limit);
                return Err(TransportError::Timeout {
                    address: address.to_string(),
                    after: limit,
                });
            }
        };

        debug!("Sending message to {}: {:?}", address, message);
        match timeout(limit, Self::exchange(&mut stream, address, &message)).await {
            Ok(Ok(response)) => {
                debug!("Received response from {}: {:?}", address, response);
                Ok(response)
            }
            Ok(Err(e)) => {
                error!("Exchange with {} failed: {}", address, e);
                Err(e)
            }
            Err(_) => {
                error!("No reply from {} within {:?}", address, limit);
                Err(TransportError::Timeout {
                    address: address.to_string(),
                    after: limit,
                })
            }
        }
    }
}
