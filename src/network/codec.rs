use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::NetworkError;
use crate::RequestCode;
use crate::Result;

/// Envelope of every frame on the wire.
///
/// `opaque` pairs a response with its request on a shared connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RemotingCommand {
    pub code: RequestCode,
    pub opaque: u64,
    pub response: bool,
    pub body: Vec<u8>,
}

impl RemotingCommand {
    pub fn request(
        code: RequestCode,
        body: Vec<u8>,
    ) -> Self {
        Self {
            code,
            opaque: 0,
            response: false,
            body,
        }
    }

    /// Response frame answering `self`.
    pub fn response_to(
        &self,
        body: Vec<u8>,
    ) -> Self {
        Self {
            code: self.code,
            opaque: self.opaque,
            response: true,
            body,
        }
    }
}

pub fn encode_body<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Writes one frame: a big-endian `u32` length followed by the encoded
/// command.
pub async fn write_frame<W>(
    writer: &mut W,
    command: &RemotingCommand,
    max_frame_bytes: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_body(command)?;
    if bytes.len() > max_frame_bytes || bytes.len() > u32::MAX as usize {
        return Err(NetworkError::FrameTooLarge {
            size: bytes.len(),
            limit: max_frame_bytes,
        }
        .into());
    }
    writer
        .write_u32(bytes.len() as u32)
        .await
        .map_err(NetworkError::Io)?;
    writer.write_all(&bytes).await.map_err(NetworkError::Io)?;
    writer.flush().await.map_err(NetworkError::Io)?;
    Ok(())
}

/// Reads one frame; `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(
    reader: &mut R,
    max_frame_bytes: usize,
) -> Result<Option<RemotingCommand>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(NetworkError::Io(e).into()),
    };
    if len > max_frame_bytes {
        return Err(NetworkError::FrameTooLarge {
            size: len,
            limit: max_frame_bytes,
        }
        .into());
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(NetworkError::Io)?;
    decode_body(&buf).map(Some)
}
