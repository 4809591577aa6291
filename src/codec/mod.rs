//! Codec module - payload formats, per-connection codec traits, registry.
//!
//! A codec wraps one byte stream and turns it into a sequence of
//! header/body units. The two halves are split at construction so a
//! connection can read and write concurrently:
//!
//! - [`CodecReader`] decodes headers and hands body units out as raw bytes.
//! - [`CodecWriter`] emits header + body as one flushed frame.
//!
//! Typed values enter and leave body units through [`Encoding`], the value
//! format negotiated for the connection. The shipped codecs are
//! [`MsgPackCodec`] (default) and [`JsonCodec`]; third-party codecs are
//! registered by name with [`register_codec`].

mod framed;
mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Result, RpcError};
use crate::protocol::Header;

/// Codec name of the default self-describing binary codec.
pub const MSGPACK_CODEC: &str = "application/msgpack";

/// Codec name of the JSON codec.
pub const JSON_CODEC: &str = "application/json";

/// A bidirectional byte stream a codec can be installed over.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// Payload value format negotiated for a connection.
///
/// Body units are opaque bytes to the framing layer; this is how typed
/// values get in and out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Self-describing binary, struct-as-map (`rmp_serde::to_vec_named`).
    MsgPack,
    /// UTF-8 JSON.
    Json,
}

impl Encoding {
    /// Encode a value to payload bytes.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            Encoding::MsgPack => Ok(rmp_serde::to_vec_named(value)?),
            Encoding::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Decode payload bytes to a value.
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            Encoding::MsgPack => Ok(rmp_serde::from_slice(bytes)?),
            Encoding::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

/// Read half of a connection's codec.
#[async_trait]
pub trait CodecReader: Send {
    /// Decode the next header unit.
    async fn read_header(&mut self) -> Result<Header>;

    /// Read the next body unit as raw payload bytes. Dropping the result is
    /// the discard path; the unit is consumed either way, so framing holds.
    async fn read_body(&mut self) -> Result<Bytes>;

    /// Value format for body payloads on this connection.
    fn encoding(&self) -> Encoding;
}

/// Write half of a connection's codec.
#[async_trait]
pub trait CodecWriter: Send {
    /// Encode `header` and write header unit + body unit as one flushed
    /// frame. Any mid-frame failure closes the writer so a half-written
    /// frame can never be followed by another.
    async fn write(&mut self, header: &Header, body: &[u8]) -> Result<()>;

    /// Shut down the write side of the underlying stream.
    async fn close(&mut self) -> Result<()>;

    /// Value format for body payloads on this connection.
    fn encoding(&self) -> Encoding;
}

/// Constructor stored in the registry for one codec name.
pub type NewCodecFn = fn(Box<dyn ByteStream>) -> (Box<dyn CodecReader>, Box<dyn CodecWriter>);

static CODECS: LazyLock<RwLock<HashMap<String, NewCodecFn>>> = LazyLock::new(|| {
    let mut map: HashMap<String, NewCodecFn> = HashMap::new();
    map.insert(MSGPACK_CODEC.to_string(), MsgPackCodec::new);
    map.insert(JSON_CODEC.to_string(), JsonCodec::new);
    RwLock::new(map)
});

/// Register a codec constructor under `name`. Registration is one-shot per
/// name; re-registering fails and the existing entry stays.
pub fn register_codec(name: &str, new_codec: NewCodecFn) -> Result<()> {
    let mut map = CODECS.write().unwrap_or_else(|e| e.into_inner());
    if map.contains_key(name) {
        return Err(RpcError::CodecAlreadyRegistered(name.to_string()));
    }
    map.insert(name.to_string(), new_codec);
    Ok(())
}

/// Look up the constructor registered under `name`.
pub fn lookup_codec(name: &str) -> Option<NewCodecFn> {
    CODECS
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(name)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct TestStruct {
        id: u32,
        name: String,
    }

    #[test]
    fn test_msgpack_roundtrip() {
        let value = TestStruct {
            id: 42,
            name: "test".to_string(),
        };
        let bytes = Encoding::MsgPack.encode(&value).unwrap();
        let decoded: TestStruct = Encoding::MsgPack.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_msgpack_structs_are_maps() {
        // to_vec_named keeps field names on the wire; a struct must encode
        // as a fixmap (0x8X), not a positional fixarray (0x9X).
        let value = TestStruct {
            id: 1,
            name: "x".to_string(),
        };
        let bytes = Encoding::MsgPack.encode(&value).unwrap();
        assert_eq!(bytes[0] & 0xF0, 0x80, "expected map format, got {:02X}", bytes[0]);
    }

    #[test]
    fn test_json_roundtrip() {
        let value = TestStruct {
            id: 7,
            name: "json".to_string(),
        };
        let bytes = Encoding::Json.encode(&value).unwrap();
        let decoded: TestStruct = Encoding::Json.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<TestStruct> = Encoding::MsgPack.decode(b"not valid msgpack");
        assert!(result.is_err());
    }

    #[test]
    fn test_builtin_codecs_registered() {
        assert!(lookup_codec(MSGPACK_CODEC).is_some());
        assert!(lookup_codec(JSON_CODEC).is_some());
        assert!(lookup_codec("application/unknown").is_none());
    }

    #[test]
    fn test_register_codec_is_one_shot() {
        assert!(register_codec("application/test-oneshot", MsgPackCodec::new).is_ok());
        let err = register_codec("application/test-oneshot", JsonCodec::new).unwrap_err();
        assert!(matches!(err, RpcError::CodecAlreadyRegistered(_)));
        // The first registration survives.
        assert!(lookup_codec("application/test-oneshot").is_some());
    }
}
