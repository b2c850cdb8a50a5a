//! Length-framed JSON codec.
//!
//! Frame layout: 4-byte big-endian payload length, then the JSON payload.
//! Reads return `None` on a cleanly closed connection.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::message::{Envelope, Message};
use super::{ProtocolError, PROTOCOL_VERSION};

/// Upper bound on a single frame. Documents travel base64-encoded inside
/// frames, so this also caps stored document size.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Reads one raw frame. `None` means the peer closed the connection.
async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge { len });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Writes one raw frame.
async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
        });
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads and decodes one message, validating the envelope version.
/// `None` means the peer closed the connection.
pub async fn read_message<R, M>(reader: &mut R) -> Result<Option<M>, ProtocolError>
where
    R: AsyncRead + Unpin,
    M: Message + DeserializeOwned,
{
    let Some(payload) = read_frame(reader).await? else {
        return Ok(None);
    };
    let envelope: Envelope<M> = serde_json::from_slice(&payload)?;
    if envelope.v != PROTOCOL_VERSION {
        return Err(ProtocolError::Version { got: envelope.v });
    }
    Ok(Some(envelope.msg))
}

/// Encodes and writes one message with the current envelope version.
pub async fn write_message<W, M>(writer: &mut W, msg: &M) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    M: Message + Serialize,
{
    let payload = serde_json::to_vec(&Envelope {
        v: PROTOCOL_VERSION,
        msg,
    })?;
    write_frame(writer, &payload).await
}
