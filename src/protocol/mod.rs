//! Wire protocol: per-message header, connection preamble, unit framing.
//!
//! One connection carries exactly one preamble followed by zero or more
//! header/body unit pairs:
//!
//! ```text
//! {"MagicNumber":3927900,"CodecType":"application/msgpack"}\n
//! [u32 BE len][header unit][u32 BE len][body unit]
//! [u32 BE len][header unit][u32 BE len][body unit]
//! ...
//! ```
//!
//! The preamble is a single JSON line so the acceptor can read it before any
//! codec has been agreed on. Every unit after it is encoded by the
//! negotiated codec and length-prefixed, which keeps units self-delimiting
//! under any payload encoding.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, RpcError};

/// Protocol identifier carried by every preamble.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Upper bound for a single encoded unit (16 MiB).
pub const MAX_UNIT_SIZE: usize = 16 * 1024 * 1024;

/// Per-message metadata, encoded by the negotiated codec as its own unit.
///
/// Requests leave `error` empty. A response reuses the `seq` of the request
/// it answers and reports dispatch or handler failures through `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Target in `"Service.Method"` form, split at the last `.`.
    #[serde(rename = "ServiceMethod")]
    pub service_method: String,
    /// Client-assigned request id; 0 is reserved as invalid.
    #[serde(rename = "Seq")]
    pub seq: u64,
    /// Empty on success and on every request.
    #[serde(rename = "Error")]
    pub error: String,
}

impl Header {
    /// Header for an outgoing request.
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }
}

/// The once-per-connection handshake record. Always JSON, independent of
/// the codec it negotiates. The magic number is a protocol constant, not an
/// option: [`Preamble::new`] is the only way to build one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preamble {
    #[serde(rename = "MagicNumber")]
    pub magic_number: u32,
    #[serde(rename = "CodecType")]
    pub codec_type: String,
}

impl Preamble {
    pub fn new(codec_type: impl Into<String>) -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: codec_type.into(),
        }
    }
}

/// Write the preamble as one newline-terminated JSON line and flush it.
pub async fn write_preamble<W>(writer: &mut W, preamble: &Preamble) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(preamble)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the preamble line. `reader` must be the buffered reader that will
/// carry the rest of the connection, so no frame bytes are lost past the
/// newline.
pub async fn read_preamble<R>(reader: &mut R) -> Result<Preamble>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    Ok(serde_json::from_slice(&line)?)
}

/// Read one length-prefixed unit: `[u32 BE len][payload]`.
pub async fn read_unit<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_UNIT_SIZE {
        return Err(RpcError::FrameTooLarge(len, MAX_UNIT_SIZE));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Append one length-prefixed unit to `buf`. Callers assemble a full
/// header+body frame this way before a single write.
pub fn put_unit(buf: &mut Vec<u8>, unit: &[u8]) {
    buf.extend_from_slice(&(unit.len() as u32).to_be_bytes());
    buf.extend_from_slice(unit);
}
