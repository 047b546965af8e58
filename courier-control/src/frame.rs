//! Length-prefixed bincode frames
//!
//! Every message on the control socket is a big-endian `u32` length followed
//! by that many bytes of bincode. Both sides bound the length they accept
//! before allocating.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{ControlError, Result};

/// Largest request the server reads (1MB)
pub const MAX_REQUEST_SIZE: u32 = 1_000_000;

/// Largest response the client reads (10MB), enough for a full repository
/// listing
pub const MAX_RESPONSE_SIZE: u32 = 10_000_000;

const fn config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Read one frame and decode it
///
/// # Errors
/// [`ControlError::ConnectionClosed`] if the peer hung up before a frame
/// started, [`ControlError::FrameTooLarge`] if the declared length exceeds
/// `limit`, otherwise I/O or decoding failures
pub async fn read_frame<T, R>(reader: &mut R, limit: u32) -> Result<T>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ControlError::ConnectionClosed
        } else {
            ControlError::Io(e)
        }
    })?;

    let len = u32::from_be_bytes(len_buf);
    if len > limit {
        return Err(ControlError::FrameTooLarge {
            size: u64::from(len),
            limit,
        });
    }

    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes).await?;

    let (value, _) = bincode::serde::decode_from_slice(&bytes, config())?;
    Ok(value)
}

/// Encode `value` and write it as one frame
///
/// # Errors
/// [`ControlError::FrameTooLarge`] if the encoded value exceeds `limit`,
/// otherwise I/O or encoding failures
pub async fn write_frame<T, W>(writer: &mut W, value: &T, limit: u32) -> Result<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = bincode::serde::encode_to_vec(value, config())?;
    let len = u32::try_from(bytes.len())
        .ok()
        .filter(|len| *len <= limit)
        .ok_or(ControlError::FrameTooLarge {
            size: bytes.len() as u64,
            limit,
        })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;

    Ok(())
}
