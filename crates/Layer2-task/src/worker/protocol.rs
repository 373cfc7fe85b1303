//! Parent <-> worker wire format
//!
//! One frame each way over the child's stdin/stdout: a 4-byte big-endian
//! length followed by a JSON document.

use crate::task::TaskId;
use mpdispatch_foundation::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame either side accepts
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// What the parent asks the worker to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task_id: TaskId,
    pub computation: String,
    pub payload: serde_json::Value,
}

/// Write one frame and flush
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    write_frame_within(writer, message, MAX_FRAME_LEN).await
}

/// Write one frame of at most `max_len` body bytes
///
/// An oversized body is rejected with `Error::Protocol` before anything is
/// written, so the stream stays usable.
pub(crate) async fn write_frame_within<W, T>(
    writer: &mut W,
    message: &T,
    max_len: u32,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= max_len)
        .ok_or_else(|| {
            Error::Protocol(format!(
                "frame of {} bytes exceeds the {} byte limit",
                body.len(),
                max_len
            ))
        })?;

    writer.write_u32(len).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame
///
/// A stream that ends before the length prefix is reported as
/// `Error::Worker`, since that is what a crashed worker looks like.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::Worker(
                "channel closed before a result was sent".to_string(),
            ));
        }
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!(
            "frame length {} exceeds the {} byte limit",
            len, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Protocol(format!("channel closed mid-frame ({} bytes expected)", len))
        } else {
            Error::Io(e)
        }
    })?;

    serde_json::from_slice(&body)
        .map_err(|e| Error::Protocol(format!("malformed frame: {}", e)))
}
