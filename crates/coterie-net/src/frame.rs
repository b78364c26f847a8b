//! Wire framing: a 4-byte big-endian length prefix followed by a
//! postcard-encoded [`Message`].

use coterie_types::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::NetError;

/// Upper bound on an encoded message. A message is a handful of varints,
/// so anything larger is a corrupt or hostile stream.
pub const MAX_FRAME_SIZE: usize = 256;

/// Encode `msg` and write it as one frame.
pub async fn write_frame<W>(writer: &mut W, msg: &Message) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let payload =
        postcard::to_allocvec(msg).map_err(|e| NetError::Serialization(e.to_string()))?;

    writer
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>, NetError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    postcard::from_bytes(&payload)
        .map(Some)
        .map_err(|e| NetError::Serialization(e.to_string()))
}
