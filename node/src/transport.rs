//! Framing for the one-message-per-connection wire protocol.
//!
//! Every frame is a 4-byte big-endian length followed by a bincode-encoded
//! [`Message`]. A connection carries exactly one request and one reply.

use chordring_lib::Message;
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::TransportError;

pub const MAX_FRAME_LEN: usize = 64 * 1024;

pub fn encode_message(message: &Message) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(message)
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, bincode::Error> {
    bincode::deserialize(bytes)
}

pub async fn write_message<W>(
    writer: &mut W,
    message: &Message,
    peer: &str,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let body = encode_message(message)
        .map_err(|e| TransportError::protocol(peer, format!("failed to encode message: {}", e)))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(TransportError::protocol(
            peer,
            format!("message of {} bytes exceeds frame limit", body.len()),
        ));
    }

    let io_error = |source| TransportError::Io {
        address: peer.to_string(),
        source,
    };
    // Bounded by MAX_FRAME_LEN above
    writer.write_u32(body.len() as u32).await.map_err(io_error)?;
    writer.write_all(&body).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)?;
    Ok(())
}

pub async fn read_message<R>(reader: &mut R, peer: &str) -> Result<Message, TransportError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(TransportError::protocol(
                peer,
                "connection closed without a message",
            ));
        }
        Err(source) => {
            return Err(TransportError::Io {
                address: peer.to_string(),
                source,
            })
        }
    };
    if len > MAX_FRAME_LEN {
        return Err(TransportError::protocol(
            peer,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::protocol(peer, "truncated frame")
        } else {
            TransportError::Io {
                address: peer.to_string(),
                source,
            }
        }
    })?;

    decode_message(&body)
        .map_err(|e| TransportError::protocol(peer, format!("undecodable message: {}", e)))
}

/// Reads the single request carried by an accepted connection.
pub async fn read_request(stream: &mut TcpStream) -> Result<Message, TransportError> {
    let peer = peer_label(stream);
    let request = read_message(stream, &peer).await?;
    debug!("Received request from {}: {:?}", peer, request);
    Ok(request)
}

/// Writes the reply to a request read with [`read_request`].
pub async fn write_reply(stream: &mut TcpStream, reply: &Message) -> Result<(), TransportError> {
    let peer = peer_label(stream);
    debug!("Sending reply to {}: {:?}", peer, reply);
    write_message(stream, reply, &peer).await
}

pub(crate) fn peer_label(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown peer".to_string())
}
